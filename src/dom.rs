//! Read-only query surface over the XML documents found on a disc.
//!
//! Melody, catalog and configuration documents all come either namespaced
//! (`<ss:MELODY xmlns:ss="http://www.singstargame.com">`) or bare
//! (`<MELODY>`), sometimes mixed within one disc. Every path step here
//! accepts both, so callers never have to try two spellings.

use thiserror::Error;

/// Namespace URI used by namespaced documents.
pub const SS_NAMESPACE: &str = "http://www.singstargame.com";

#[derive(Error, Debug)]
pub enum DomError {
    #[error("XML parse error: {0}")]
    Parse(String),
}

/// A node of the owned document tree.
#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    name: String,
    namespace: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
}

/// A parsed document together with the bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct Document {
    raw: Vec<u8>,
    root: Element,
}

impl Document {
    /// Parse raw bytes, repairing the encoding quirks found on discs first.
    pub fn parse(bytes: &[u8]) -> Result<Self, DomError> {
        let root = parse_root(&repair(bytes))?;
        Ok(Self {
            raw: bytes.to_vec(),
            root,
        })
    }

    pub fn parse_str(source: String) -> Result<Self, DomError> {
        let root = parse_root(&source)?;
        Ok(Self {
            raw: source.into_bytes(),
            root,
        })
    }

    /// The input exactly as read, before any repair. Written back out as-is,
    /// its encoding declaration still matches its bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Elements matching an absolute path such as `/MELODY/SENTENCE`.
    pub fn find(&self, path: &str) -> Vec<&Element> {
        let mut steps = split_path(path);
        let Some(first) = steps.next() else {
            return Vec::new();
        };
        if !self.root.is(first) {
            return Vec::new();
        }
        select(vec![&self.root], steps)
    }

    /// Text content (or attribute value, for a trailing `@NAME` step) of the
    /// first match of an absolute path.
    pub fn value(&self, path: &str) -> Option<String> {
        let (elements, attr) = split_attribute(path);
        let found = self.find(elements);
        let first = found.first()?;
        match attr {
            Some(name) => first.attr(name).map(str::to_string),
            None => Some(first.text()),
        }
    }
}

impl Element {
    /// True if this element has the given local name in either naming convention.
    pub fn is(&self, local: &str) -> bool {
        self.name == local
            && self
                .namespace
                .as_deref()
                .is_none_or(|ns| ns == SS_NAMESPACE)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) | XmlNode::Comment(_) => None,
        })
    }

    /// Direct children with the given local name.
    pub fn children_named<'a, 'n>(&'a self, local: &'n str) -> impl Iterator<Item = &'a Element> {
        self.child_elements().filter(move |e| e.is(local))
    }

    /// Elements matching a path relative to this element, e.g. `TRACK/SENTENCE`.
    pub fn find(&self, path: &str) -> Vec<&Element> {
        select(vec![self], split_path(path))
    }

    /// Attribute value at a relative path ending in `@NAME`, e.g. `VIDEO/@FRAME_RATE`.
    pub fn find_attr(&self, path: &str) -> Option<&str> {
        let (elements, attr) = split_attribute(path);
        let attr = attr?;
        if elements.is_empty() {
            return self.attr(attr);
        }
        self.find(elements).into_iter().find_map(|e| e.attr(attr))
    }

    /// Concatenated direct text content, trimmed.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                out.push_str(t);
            }
        }
        out.trim().to_string()
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split `A/B/@C` into (`A/B`, Some("C")).
fn split_attribute(path: &str) -> (&str, Option<&str>) {
    match path.rsplit_once('/') {
        Some((head, tail)) if tail.starts_with('@') => (head, Some(&tail[1..])),
        _ if path.starts_with('@') => ("", Some(&path[1..])),
        _ => (path, None),
    }
}

fn select<'a, 's>(
    mut current: Vec<&'a Element>,
    steps: impl Iterator<Item = &'s str>,
) -> Vec<&'a Element> {
    for step in steps {
        current = current
            .into_iter()
            .flat_map(|e| e.children_named(step))
            .collect();
        if current.is_empty() {
            break;
        }
    }
    current
}

fn parse_root(text: &str) -> Result<Element, DomError> {
    let options = roxmltree::ParsingOptions {
        allow_dtd: true,
        ..Default::default()
    };
    let doc = roxmltree::Document::parse_with_options(text, options)
        .map_err(|e| DomError::Parse(e.to_string()))?;
    Ok(convert_element(doc.root_element()))
}

fn convert_element(node: roxmltree::Node<'_, '_>) -> Element {
    let attributes = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();
    let children = node
        .children()
        .filter_map(|child| match child.node_type() {
            roxmltree::NodeType::Element => Some(XmlNode::Element(convert_element(child))),
            roxmltree::NodeType::Text => child.text().map(|t| XmlNode::Text(t.to_string())),
            roxmltree::NodeType::Comment => child.text().map(|t| XmlNode::Comment(t.to_string())),
            roxmltree::NodeType::Root | roxmltree::NodeType::PI => None,
        })
        .collect();
    Element {
        name: node.tag_name().name().to_string(),
        namespace: node.tag_name().namespace().map(str::to_string),
        attributes,
        children,
    }
}

/// Turn disc bytes into parseable text.
///
/// Strips anything before the first `<` (BOMs, stray padding), trailing NUL
/// padding, and falls back to Latin-1 when the bytes are not valid UTF-8.
pub fn repair(bytes: &[u8]) -> String {
    let end = bytes
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let bytes = &bytes[..end];
    let start = bytes.iter().position(|&b| b == b'<').unwrap_or(0);
    let bytes = &bytes[start..];
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ss:MELODY xmlns:ss="http://www.singstargame.com" Tempo="120" Resolution="Semiquaver">
  <ss:SENTENCE Singer="Solo 1">
    <ss:NOTE MidiNote="60" Duration="4" Lyric="la"/>
  </ss:SENTENCE>
  <!-- comment -->
</ss:MELODY>"#;

    const BARE: &str = r#"<MELODY Tempo="90"><SENTENCE><NOTE MidiNote="0" Duration="2" Lyric=""/></SENTENCE></MELODY>"#;

    #[test]
    fn test_find_namespaced_and_bare() {
        let ns = Document::parse(NAMESPACED.as_bytes()).unwrap();
        let bare = Document::parse(BARE.as_bytes()).unwrap();
        assert_eq!(ns.find("/MELODY/SENTENCE").len(), 1);
        assert_eq!(bare.find("/MELODY/SENTENCE").len(), 1);
        assert_eq!(ns.find("/MELODY/SENTENCE/NOTE")[0].attr("Lyric"), Some("la"));
    }

    #[test]
    fn test_foreign_namespace_does_not_match() {
        let doc = Document::parse(br#"<x:MELODY xmlns:x="urn:other"/>"#).unwrap();
        assert!(doc.find("/MELODY").is_empty());
    }

    #[test]
    fn test_value_text_and_attribute() {
        let doc = Document::parse(
            br#"<CONFIG><PRODUCT_NAME> SINGSTAR </PRODUCT_NAME><VIDEO FRAME_RATE="29.97"/></CONFIG>"#,
        )
        .unwrap();
        assert_eq!(doc.value("/CONFIG/PRODUCT_NAME").as_deref(), Some("SINGSTAR"));
        assert_eq!(doc.value("/CONFIG/VIDEO/@FRAME_RATE").as_deref(), Some("29.97"));
        assert_eq!(doc.value("/CONFIG/MISSING"), None);
        assert_eq!(doc.root().find_attr("VIDEO/@FRAME_RATE"), Some("29.97"));
    }

    #[test]
    fn test_node_kinds_are_kept() {
        let doc = Document::parse(NAMESPACED.as_bytes()).unwrap();
        let comments = doc
            .root()
            .children()
            .iter()
            .filter(|n| matches!(n, XmlNode::Comment(_)))
            .count();
        assert_eq!(comments, 1);
    }

    #[test]
    fn test_repair_latin1_and_padding() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"<A N=\"Bj\xF6rk\"/>");
        bytes.extend_from_slice(&[0, 0, 0]);
        let doc = Document::parse(&bytes).unwrap();
        assert_eq!(doc.root().attr("N"), Some("Björk"));
    }

    #[test]
    fn test_raw_keeps_latin1_bytes() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><MELODY A=\"Bj\xF6rk\"/>";
        let doc = Document::parse(bytes).unwrap();
        assert_eq!(doc.root().attr("A"), Some("Bj\u{f6}rk"));
        assert_eq!(doc.raw(), &bytes[..]);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Document::parse(b"<A><B></A>"), Err(DomError::Parse(_))));
    }
}
