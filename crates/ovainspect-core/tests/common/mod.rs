//! Shared fixtures: in-memory tar archives, sparse VMDK images, and OVF descriptors.

#![allow(dead_code)]

/// Size of a tar block.
pub const BLOCK: usize = 512;

/// Sector size used by the VMDK fixtures.
pub const SECTOR: usize = 512;

/// Grain size (in sectors) used by the VMDK fixtures.
pub const GRAIN_SIZE: u64 = 128;

/// Build a ustar header with an octal size field.
pub fn tar_header(name: &str, size: u64) -> Vec<u8> {
    let mut header = vec![0u8; BLOCK];
    header[..name.len()].copy_from_slice(name.as_bytes());
    header[100..107].copy_from_slice(b"0000644");
    header[124..135].copy_from_slice(format!("{:011o}", size).as_bytes());
    header[156] = b'0';
    header[257..263].copy_from_slice(b"ustar\0");
    header
}

/// Build a header whose size uses the GNU base-256 encoding.
pub fn tar_header_base256(name: &str, size: u64) -> Vec<u8> {
    let mut header = tar_header(name, 0);
    header[124..136].fill(0);
    header[124] = 0x80;
    header[128..136].copy_from_slice(&size.to_be_bytes());
    header
}

/// Builds a tar archive in memory.
#[derive(Default)]
pub struct ArchiveBuilder {
    data: Vec<u8>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry with its payload, padded to the block size.
    pub fn add_file(mut self, name: &str, content: &[u8]) -> Self {
        self.data
            .extend_from_slice(&tar_header(name, content.len() as u64));
        self.push_padded(content);
        self
    }

    /// Append a pre-built header followed by a padded payload.
    pub fn add_raw(mut self, header: Vec<u8>, content: &[u8]) -> Self {
        self.data.extend_from_slice(&header);
        self.push_padded(content);
        self
    }

    fn push_padded(&mut self, content: &[u8]) {
        self.data.extend_from_slice(content);
        let padding = (BLOCK - content.len() % BLOCK) % BLOCK;
        self.data.extend(std::iter::repeat(0u8).take(padding));
    }

    /// Finish with the two zeroed end-of-archive blocks.
    pub fn finish(mut self) -> Vec<u8> {
        self.data.extend(std::iter::repeat(0u8).take(2 * BLOCK));
        self.data
    }

    /// Finish without end-of-archive blocks.
    pub fn finish_without_trailer(self) -> Vec<u8> {
        self.data
    }
}

fn sparse_header(capacity: u64, gd_offset: u64) -> Vec<u8> {
    let mut header = vec![0u8; SECTOR];
    header[0..4].copy_from_slice(&0x564D444Bu32.to_le_bytes());
    header[4..8].copy_from_slice(&1u32.to_le_bytes());
    header[12..20].copy_from_slice(&capacity.to_le_bytes());
    header[20..28].copy_from_slice(&GRAIN_SIZE.to_le_bytes());
    header[44..48].copy_from_slice(&512u32.to_le_bytes());
    header[56..64].copy_from_slice(&gd_offset.to_le_bytes());
    header
}

/// Build a hosted sparse VMDK with one grain table.
///
/// Layout: header (sector 0), grain directory (sector 1), grain table
/// (sectors 2-5), then grain data. `grains` pairs a grain index with the
/// sector its data lives at; data sectors must be 6 or higher.
pub fn sparse_vmdk(capacity_sectors: u64, grains: &[(u64, u32)]) -> Vec<u8> {
    let mut image = sparse_header(capacity_sectors, 1);
    image.extend_from_slice(&layout_tables(grains));
    pad_to_grains(&mut image, grains);
    image
}

/// Build a streamOptimized-style VMDK whose directory is located by the footer.
pub fn stream_optimized_vmdk(capacity_sectors: u64, grains: &[(u64, u32)]) -> Vec<u8> {
    let mut image = sparse_header(capacity_sectors, u64::MAX);
    image.extend_from_slice(&layout_tables(grains));
    pad_to_grains(&mut image, grains);
    // Footer marker, footer, end-of-stream marker
    image.extend(std::iter::repeat(0u8).take(SECTOR));
    image.extend_from_slice(&sparse_header(capacity_sectors, 1));
    image.extend(std::iter::repeat(0u8).take(SECTOR));
    image
}

fn layout_tables(grains: &[(u64, u32)]) -> Vec<u8> {
    let mut directory = vec![0u8; SECTOR];
    directory[0..4].copy_from_slice(&2u32.to_le_bytes());

    let mut table = vec![0u8; 4 * SECTOR];
    for &(index, sector) in grains {
        let at = index as usize * 4;
        table[at..at + 4].copy_from_slice(&sector.to_le_bytes());
    }

    directory.extend_from_slice(&table);
    directory
}

fn pad_to_grains(image: &mut Vec<u8>, grains: &[(u64, u32)]) {
    let end = grains
        .iter()
        .map(|&(_, sector)| (sector as usize + GRAIN_SIZE as usize) * SECTOR)
        .max()
        .unwrap_or(0);
    if image.len() < end {
        image.resize(end, 0xAB);
    }
}

/// A VMware-style OVF 1.0 descriptor: 1 vCPU, 2 GiB RAM, one network, one
/// 10 GiB disk at position 0.
pub const SAMPLE_OVF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope vmw:buildId="build-1" xmlns="http://schemas.dmtf.org/ovf/envelope/1" xmlns:ovf="http://schemas.dmtf.org/ovf/envelope/1" xmlns:rasd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_ResourceAllocationSettingData" xmlns:vmw="http://www.vmware.com/schema/ovf" xmlns:vssd="http://schemas.dmtf.org/wbem/wscim/1/cim-schema/2/CIM_VirtualSystemSettingData">
  <References>
    <File ovf:href="TestVM-disk1.vmdk" ovf:id="file1" ovf:size="68608"/>
  </References>
  <DiskSection>
    <Info>Virtual disk information</Info>
    <Disk ovf:capacity="10" ovf:capacityAllocationUnits="GigaBytes" ovf:diskId="vmdisk1" ovf:fileRef="file1" ovf:format="http://www.vmware.com/interfaces/specifications/vmdk.html#streamOptimized"/>
  </DiskSection>
  <NetworkSection>
    <Info>The list of logical networks</Info>
    <Network ovf:name="VM Network">
      <Description>The VM Network network</Description>
    </Network>
  </NetworkSection>
  <VirtualSystem ovf:id="TestVM">
    <Info>A virtual machine</Info>
    <Name>TestVM</Name>
    <OperatingSystemSection ovf:id="94" vmw:osType="ubuntu64Guest">
      <Info>The kind of installed guest operating system</Info>
      <Description>Ubuntu Linux (64-bit)</Description>
    </OperatingSystemSection>
    <VirtualHardwareSection>
      <Info>Virtual hardware requirements</Info>
      <System>
        <vssd:ElementName>Virtual Hardware Family</vssd:ElementName>
        <vssd:InstanceID>0</vssd:InstanceID>
        <vssd:VirtualSystemIdentifier>TestVM</vssd:VirtualSystemIdentifier>
        <vssd:VirtualSystemType>vmx-13</vssd:VirtualSystemType>
      </System>
      <Item>
        <rasd:AllocationUnits>hertz * 10^6</rasd:AllocationUnits>
        <rasd:Description>Number of Virtual CPUs</rasd:Description>
        <rasd:ElementName>1 virtual CPU(s)</rasd:ElementName>
        <rasd:InstanceID>1</rasd:InstanceID>
        <rasd:ResourceType>3</rasd:ResourceType>
        <rasd:VirtualQuantity>1</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:AllocationUnits>byte * 2^20</rasd:AllocationUnits>
        <rasd:Description>Memory Size</rasd:Description>
        <rasd:ElementName>2048MB of memory</rasd:ElementName>
        <rasd:InstanceID>2</rasd:InstanceID>
        <rasd:ResourceType>4</rasd:ResourceType>
        <rasd:VirtualQuantity>2048</rasd:VirtualQuantity>
      </Item>
      <Item>
        <rasd:Address>0</rasd:Address>
        <rasd:Description>SCSI Controller</rasd:Description>
        <rasd:ElementName>SCSI Controller 0</rasd:ElementName>
        <rasd:InstanceID>3</rasd:InstanceID>
        <rasd:ResourceSubType>VirtualSCSI</rasd:ResourceSubType>
        <rasd:ResourceType>6</rasd:ResourceType>
      </Item>
      <Item>
        <rasd:AddressOnParent>0</rasd:AddressOnParent>
        <rasd:ElementName>Hard Disk 1</rasd:ElementName>
        <rasd:HostResource>ovf:/disk/vmdisk1</rasd:HostResource>
        <rasd:InstanceID>4</rasd:InstanceID>
        <rasd:Parent>3</rasd:Parent>
        <rasd:ResourceType>17</rasd:ResourceType>
      </Item>
      <Item>
        <rasd:AddressOnParent>7</rasd:AddressOnParent>
        <rasd:AutomaticAllocation>true</rasd:AutomaticAllocation>
        <rasd:Connection>VM Network</rasd:Connection>
        <rasd:Description>VmxNet3 ethernet adapter on &quot;VM Network&quot;</rasd:Description>
        <rasd:ElementName>Network adapter 1</rasd:ElementName>
        <rasd:InstanceID>5</rasd:InstanceID>
        <rasd:ResourceSubType>VmxNet3</rasd:ResourceSubType>
        <rasd:ResourceType>10</rasd:ResourceType>
      </Item>
    </VirtualHardwareSection>
  </VirtualSystem>
</Envelope>
"#;
