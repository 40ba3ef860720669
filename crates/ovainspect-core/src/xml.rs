//! A loose XML tree for descriptor normalization.
//!
//! Built on `quick-xml` events with three simplifications applied while
//! reading:
//! - namespace prefixes are stripped from element and attribute names,
//! - attributes are merged into their element's field list next to child
//!   elements,
//! - an element with neither attributes nor children collapses to its text.
//!
//! Repeated children are not wrapped in a collection. Any field may appear
//! zero, one or many times, so readers use [`XmlNode::all`] wherever an
//! element can repeat.

use std::borrow::Cow;

use quick_xml::errors::IllFormedError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::Result;

/// A value stored under a field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlValue {
    /// An attribute, or an element with only text content.
    Text(String),
    /// An element with attributes or child elements.
    Node(XmlNode),
}

impl XmlValue {
    /// Returns the text of a leaf, or the text content of a node.
    pub fn text(&self) -> Option<&str> {
        match self {
            XmlValue::Text(text) => Some(text),
            XmlValue::Node(node) => node.text(),
        }
    }

    /// Returns the node, if this value is one.
    pub fn as_node(&self) -> Option<&XmlNode> {
        match self {
            XmlValue::Node(node) => Some(node),
            XmlValue::Text(_) => None,
        }
    }
}

/// An element: its attributes and child elements in document order, plus text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    fields: Vec<(String, XmlValue)>,
    text: String,
}

impl XmlNode {
    /// First field with the given name.
    pub fn get(&self, name: &str) -> Option<&XmlValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Every field with the given name, in document order.
    ///
    /// Absent yields nothing and a singleton yields one value, so callers
    /// iterate the same way regardless of how many times an element occurs.
    pub fn all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlValue> + 'a {
        self.fields
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// First field with the given name, viewed as a node.
    ///
    /// A present but empty element such as `<References/>` yields an empty
    /// node rather than `None`.
    pub fn node(&self, name: &str) -> Option<&XmlNode> {
        self.get(name)
            .map(|value| value.as_node().unwrap_or(&EMPTY_NODE))
    }

    /// Text of the first field with the given name.
    pub fn text_of(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(XmlValue::text)
    }

    /// Text content of this element, if any.
    pub fn text(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }
}

static EMPTY_NODE: XmlNode = XmlNode {
    fields: Vec::new(),
    text: String::new(),
};

struct Frame {
    name: String,
    node: XmlNode,
    has_attributes: bool,
    has_children: bool,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = local_name(start.local_name().as_ref());
        let mut node = XmlNode::default();

        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = local_name(attr.key.local_name().as_ref());
            let value = attr.unescape_value()?.into_owned();
            node.fields.push((key, XmlValue::Text(value)));
        }

        Ok(Self {
            name,
            has_attributes: !node.fields.is_empty(),
            node,
            has_children: false,
        })
    }

    fn into_value(self) -> (String, XmlValue) {
        let value = if self.has_attributes || self.has_children {
            XmlValue::Node(self.node)
        } else {
            XmlValue::Text(self.node.text)
        };
        (self.name, value)
    }
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn attach(stack: &mut [Frame], frame: Frame) {
    // The document frame is never popped, so a parent always exists.
    if let Some(parent) = stack.last_mut() {
        parent.has_children = true;
        parent.node.fields.push(frame.into_value());
    }
}

/// Parses an XML document into a tree rooted at a synthetic document node.
///
/// The document element is the single field of the returned node, e.g.
/// `parse_xml(..)?.node("Envelope")`.
///
/// # Errors
///
/// Returns [`crate::Error::Xml`] for any well-formedness failure, including
/// elements left open at end of input.
pub fn parse_xml(input: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack = vec![Frame {
        name: String::new(),
        node: XmlNode::default(),
        has_attributes: false,
        has_children: false,
    }];

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(Frame::open(&start)?),
            Event::Empty(start) => {
                let frame = Frame::open(&start)?;
                attach(&mut stack, frame);
            }
            Event::End(end) => {
                if stack.len() == 1 {
                    let name = local_name(end.local_name().as_ref());
                    return Err(
                        quick_xml::Error::IllFormed(IllFormedError::UnmatchedEndTag(name)).into(),
                    );
                }
                if let Some(frame) = stack.pop() {
                    attach(&mut stack, frame);
                }
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                push_text(&mut stack, text);
            }
            Event::CData(data) => {
                let data = data.into_inner();
                push_text(&mut stack, String::from_utf8_lossy(&data));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if stack.len() > 1 {
        let name = stack
            .last()
            .map(|frame| frame.name.clone())
            .unwrap_or_default();
        return Err(quick_xml::Error::IllFormed(IllFormedError::MissingEndTag(name)).into());
    }

    Ok(stack.pop().map(|frame| frame.node).unwrap_or_default())
}

fn push_text(stack: &mut [Frame], text: Cow<'_, str>) {
    if let Some(frame) = stack.last_mut() {
        frame.node.text.push_str(&text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_prefixes_stripped() {
        let doc = parse_xml(
            r#"<ovf:Envelope xmlns:ovf="urn:ovf"><ovf:References><ovf:File ovf:id="file1" ovf:href="disk.vmdk"/></ovf:References></ovf:Envelope>"#,
        )
        .unwrap();
        let file = doc
            .node("Envelope")
            .and_then(|e| e.node("References"))
            .and_then(|r| r.node("File"))
            .unwrap();
        assert_eq!(file.text_of("id"), Some("file1"));
        assert_eq!(file.text_of("href"), Some("disk.vmdk"));
    }

    #[test]
    fn test_namespace_declarations_skipped() {
        let doc = parse_xml(r#"<ovf:Envelope xmlns="urn:a" xmlns:ovf="urn:ovf" version="1"/>"#)
            .unwrap();
        let envelope = doc.node("Envelope").unwrap();
        assert!(envelope.get("ovf").is_none());
        assert!(envelope.get("xmlns").is_none());
        assert_eq!(envelope.text_of("version"), Some("1"));
    }

    #[test]
    fn test_singleton_and_repeated_children() {
        let doc = parse_xml("<A><B>1</B><C>x</C><B>2</B></A>").unwrap();
        let a = doc.node("A").unwrap();
        let bs: Vec<_> = a.all("B").filter_map(XmlValue::text).collect();
        assert_eq!(bs, vec!["1", "2"]);
        assert_eq!(a.all("C").count(), 1);
        assert_eq!(a.all("D").count(), 0);
    }

    #[test]
    fn test_leaf_collapses_to_text() {
        let doc = parse_xml("<A><B>hello &amp; bye</B><C/></A>").unwrap();
        let a = doc.node("A").unwrap();
        assert_eq!(a.get("B"), Some(&XmlValue::Text("hello & bye".to_string())));
        assert_eq!(a.get("C"), Some(&XmlValue::Text(String::new())));
    }

    #[test]
    fn test_attributes_and_text_on_same_element() {
        let doc = parse_xml(r#"<A><B unit="MB">512</B></A>"#).unwrap();
        let b = doc.node("A").and_then(|a| a.get("B")).unwrap();
        assert_eq!(b.text(), Some("512"));
        assert_eq!(b.as_node().and_then(|n| n.text_of("unit")), Some("MB"));
    }

    #[test]
    fn test_empty_element_as_node() {
        let doc = parse_xml("<A><B/></A>").unwrap();
        let b = doc.node("A").and_then(|a| a.node("B")).unwrap();
        assert_eq!(b.all("C").count(), 0);
        assert!(doc.node("A").and_then(|a| a.node("Z")).is_none());
    }

    #[test]
    fn test_cdata() {
        let doc = parse_xml("<A><![CDATA[<raw>]]></A>").unwrap();
        assert_eq!(doc.text_of("A"), Some("<raw>"));
    }

    #[test]
    fn test_mismatched_end_tag() {
        let err = parse_xml("<A><B></A>").unwrap_err();
        assert!(matches!(err, Error::Xml(_)));
    }

    #[test]
    fn test_unclosed_element() {
        let err = parse_xml("<A><B>text</B>").unwrap_err();
        assert!(matches!(err, Error::Xml(_)));
    }
}
