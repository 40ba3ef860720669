//! OVF descriptor parsing.
//!
//! This module normalizes an OVF (Open Virtualization Format) XML descriptor
//! into a [`VmDescriptor`]: VM name and description, CPU count, memory size,
//! attached networks, and the disks that the hardware section places on a
//! controller.
//!
//! Disks are correlated in two passes. `DiskSection` declares each disk with
//! its capacity; a hardware item of resource type 17 then assigns it a
//! position. Declared disks that never receive a position are dropped.

use std::collections::BTreeMap;
use std::str::FromStr;

use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::{Error, Result};
use crate::xml::{parse_xml, XmlNode, XmlValue};

/// Description given to a disk whose hardware item has none.
pub const DEFAULT_DISK_DESCRIPTION: &str = "No description";

/// Hardware item groups under `VirtualHardwareSection`, in processing order.
const HARDWARE_GROUPS: [&str; 3] = ["Item", "StorageItem", "EthernetPortItem"];

/// A virtual disk declared in the descriptor and placed by the hardware section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    /// Virtual capacity in bytes.
    pub capacity_bytes: u64,
    /// `href` of the referenced file, usually the disk image's entry name.
    pub path: Option<String>,
    /// Description from the hardware item.
    pub description_label: String,
    /// Caption (or element name) from the hardware item.
    pub name_label: String,
    /// Address of the disk on its parent controller.
    pub position: u32,
}

/// VM metadata extracted from one OVF descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmDescriptor {
    /// The virtual system identifier.
    pub name_label: String,
    /// Annotation, or the operating system description.
    pub description_label: Option<String>,
    /// Number of virtual CPUs.
    pub n_cpus: Option<u32>,
    /// Memory size in bytes.
    pub memory_bytes: Option<u64>,
    /// Automatically connected networks, in document order.
    pub networks: Vec<String>,
    /// Placed disks keyed by disk id.
    pub disks: BTreeMap<String, DiskRecord>,
}

/// CIM resource type of a hardware item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    /// Code 3.
    Processor,
    /// Code 4.
    Memory,
    /// Code 10.
    EthernetAdapter,
    /// Code 17.
    DiskDrive,
    /// Any other code; ignored.
    Other(u16),
}

impl From<u16> for ResourceType {
    fn from(code: u16) -> Self {
        match code {
            3 => ResourceType::Processor,
            4 => ResourceType::Memory,
            10 => ResourceType::EthernetAdapter,
            17 => ResourceType::DiskDrive,
            other => ResourceType::Other(other),
        }
    }
}

impl ResourceType {
    /// Parses the text of a `ResourceType` element.
    pub fn parse(text: &str) -> Option<Self> {
        text.trim().parse::<u16>().ok().map(Self::from)
    }
}

/// Converts an OVF allocation unit into a byte multiplier.
///
/// Two notations are understood:
/// - power-of-two suffix, e.g. `byte * 2^20`,
/// - a leading prefix letter, e.g. `KB`, `MegaBytes`, `GB`, `terabytes`.
///
/// Returns `None` for anything else, including plain `byte`.
pub fn allocation_unit_factor(unit: &str) -> Option<u64> {
    let unit = unit.trim();

    if let Some((_, exponent)) = unit.rsplit_once('^') {
        if !exponent.is_empty() && exponent.bytes().all(|b| b.is_ascii_digit()) {
            return exponent
                .parse::<u32>()
                .ok()
                .and_then(|exponent| 2u64.checked_pow(exponent));
        }
    }

    match unit.chars().next()?.to_ascii_lowercase() {
        'k' => Some(1 << 10),
        'm' => Some(1 << 20),
        'g' => Some(1 << 30),
        't' => Some(1 << 40),
        _ => None,
    }
}

/// Extracts the disk id from a `HostResource` such as `ovf:/disk/vmdisk1`.
pub fn disk_reference(host_resource: &str) -> Option<&str> {
    let rest = host_resource.strip_prefix("ovf:").unwrap_or(host_resource);
    rest.strip_prefix("/disk/").filter(|id| !id.is_empty())
}

/// A declared disk awaiting its hardware item.
struct PendingDisk {
    capacity_bytes: u64,
    path: Option<String>,
    description_label: String,
    name_label: String,
    position: Option<u32>,
}

/// Parses an OVF descriptor.
///
/// # Arguments
///
/// * `xml` - The descriptor text.
/// * `sink` - Receives unresolved disk associations and dropped disks.
///
/// # Errors
///
/// - [`Error::Xml`] if the text is not well-formed XML.
/// - [`Error::MalformedDescriptor`] if `Envelope`, `DiskSection`,
///   `References`, `VirtualSystem` or its hardware section is missing, or a
///   numeric value cannot be parsed.
/// - [`Error::UnsupportedAllocationUnit`] if memory is given in an unknown unit.
pub fn parse_ovf(xml: &str, sink: &DiagnosticSink) -> Result<VmDescriptor> {
    let doc = parse_xml(xml)?;

    let envelope = required(&doc, "Envelope")?;
    let disk_section = required(envelope, "DiskSection")?;
    let references = required(envelope, "References")?;
    let system = required(envelope, "VirtualSystem")?;
    let hardware = required(system, "VirtualHardwareSection")?;

    let mut descriptor = VmDescriptor {
        name_label: name_label(system, hardware)?,
        description_label: description_label(system),
        ..Default::default()
    };

    let mut disks = declare_disks(disk_section, references)?;

    for group in HARDWARE_GROUPS {
        for item in hardware.all(group).filter_map(XmlValue::as_node) {
            apply_item(item, &mut descriptor, &mut disks, sink)?;
        }
    }

    for (disk_id, disk) in disks {
        match disk.position {
            Some(position) => {
                descriptor.disks.insert(
                    disk_id,
                    DiskRecord {
                        capacity_bytes: disk.capacity_bytes,
                        path: disk.path,
                        description_label: disk.description_label,
                        name_label: disk.name_label,
                        position,
                    },
                );
            }
            None => sink.emit(Diagnostic::OrphanDisk { disk_id }),
        }
    }

    Ok(descriptor)
}

fn required<'a>(parent: &'a XmlNode, name: &str) -> Result<&'a XmlNode> {
    parent
        .node(name)
        .ok_or_else(|| Error::descriptor(format!("missing {} element", name)))
}

fn name_label(system: &XmlNode, hardware: &XmlNode) -> Result<String> {
    hardware
        .node("System")
        .and_then(|s| s.text_of("VirtualSystemIdentifier"))
        .or_else(|| system.text_of("id"))
        .map(str::to_string)
        .ok_or_else(|| Error::descriptor("missing VirtualSystemIdentifier"))
}

fn description_label(system: &XmlNode) -> Option<String> {
    let non_empty = |text: &&str| !text.is_empty();
    system
        .node("AnnotationSection")
        .and_then(|s| s.text_of("Annotation"))
        .filter(non_empty)
        .or_else(|| {
            system
                .node("OperatingSystemSection")
                .and_then(|s| s.text_of("Description"))
                .filter(non_empty)
        })
        .map(str::to_string)
}

fn declare_disks(
    disk_section: &XmlNode,
    references: &XmlNode,
) -> Result<BTreeMap<String, PendingDisk>> {
    let files: Vec<&XmlNode> = references
        .all("File")
        .filter_map(XmlValue::as_node)
        .collect();

    let mut disks = BTreeMap::new();
    for disk in disk_section.all("Disk").filter_map(XmlValue::as_node) {
        let disk_id = disk
            .text_of("diskId")
            .ok_or_else(|| Error::descriptor("Disk without diskId"))?;
        let capacity: u64 = number(disk, "capacity")?;

        // Unknown capacity units fall back to bytes.
        let factor = disk
            .text_of("capacityAllocationUnits")
            .and_then(allocation_unit_factor)
            .unwrap_or(1);
        let capacity_bytes = capacity.checked_mul(factor).ok_or_else(|| {
            Error::descriptor(format!("capacity of disk '{}' overflows", disk_id))
        })?;

        let path = disk.text_of("fileRef").and_then(|file_ref| {
            files
                .iter()
                .find(|file| file.text_of("id") == Some(file_ref))
                .and_then(|file| file.text_of("href"))
                .map(str::to_string)
        });

        disks.insert(
            disk_id.to_string(),
            PendingDisk {
                capacity_bytes,
                path,
                description_label: String::new(),
                name_label: String::new(),
                position: None,
            },
        );
    }

    Ok(disks)
}

fn apply_item(
    item: &XmlNode,
    descriptor: &mut VmDescriptor,
    disks: &mut BTreeMap<String, PendingDisk>,
    sink: &DiagnosticSink,
) -> Result<()> {
    let Some(resource_type) = item.text_of("ResourceType").and_then(ResourceType::parse) else {
        return Ok(());
    };

    match resource_type {
        ResourceType::Processor => {
            descriptor.n_cpus = Some(number(item, "VirtualQuantity")?);
        }
        ResourceType::Memory => {
            let unit = item.text_of("AllocationUnits").unwrap_or_default();
            let factor = allocation_unit_factor(unit).ok_or_else(|| Error::allocation_unit(unit))?;
            let quantity: u64 = number(item, "VirtualQuantity")?;
            let bytes = quantity
                .checked_mul(factor)
                .ok_or_else(|| Error::descriptor("memory size overflows"))?;
            descriptor.memory_bytes = Some(bytes);
        }
        ResourceType::EthernetAdapter => {
            let enabled = item
                .text_of("AutomaticAllocation")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1");
            if enabled {
                if let Some(connection) = item.text_of("Connection") {
                    descriptor.networks.push(connection.to_string());
                }
            }
        }
        ResourceType::DiskDrive => {
            let host_resource = item.text_of("HostResource").unwrap_or_default();
            let disk = disk_reference(host_resource).and_then(|id| disks.get_mut(id));
            match disk {
                Some(disk) => {
                    disk.description_label = item
                        .text_of("Description")
                        .unwrap_or(DEFAULT_DISK_DESCRIPTION)
                        .to_string();
                    disk.name_label = item
                        .text_of("Caption")
                        .or_else(|| item.text_of("ElementName"))
                        .unwrap_or_default()
                        .to_string();
                    disk.position = item
                        .text_of("AddressOnParent")
                        .and_then(|p| p.trim().parse().ok());
                }
                None => sink.emit(Diagnostic::UnresolvedDiskAssociation {
                    host_resource: host_resource.to_string(),
                }),
            }
        }
        ResourceType::Other(_) => {}
    }

    Ok(())
}

fn number<T: FromStr>(node: &XmlNode, field: &str) -> Result<T> {
    let text = node
        .text_of(field)
        .ok_or_else(|| Error::descriptor(format!("missing {}", field)))?;
    text.trim()
        .parse()
        .map_err(|_| Error::descriptor(format!("invalid {}: '{}'", field, text)))
}
