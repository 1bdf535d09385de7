//! A small owned XML tree for the manifest and resource files.
//!
//! Parsing goes through `quick-xml` events. Comments, processing instructions and the
//! doctype are dropped, qualified names such as `android:name` are kept verbatim and
//! namespace declarations stay ordinary attributes, so a parse/write cycle preserves every
//! element and attribute. Elements whose children are only elements are re-indented on
//! output. Mixed content is written back exactly as parsed.

use dexcloak_utils::errors::XmlError;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use rand::seq::SliceRandom;
use rand::Rng;

/// A child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    /// Unescaped character data.
    Text(String),
}

/// An element with its attributes in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets `name`, replacing an existing value in place or appending a new attribute.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Self> {
        self.children.iter_mut().filter_map(|n| match n {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    pub fn has_child_elements(&self) -> bool {
        self.elements().next().is_some()
    }

    /// Concatenated text of the direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|n| match n {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![XmlNode::Text(text.into())];
    }

    /// Number of elements in this subtree, including `self`.
    pub fn element_count(&self) -> usize {
        1 + self.elements().map(Self::element_count).sum::<usize>()
    }

    /// Children are all elements apart from insignificant whitespace.
    fn is_element_only(&self) -> bool {
        self.has_child_elements()
            && self.children.iter().all(|n| match n {
                XmlNode::Element(_) => true,
                XmlNode::Text(t) => t.trim().is_empty(),
            })
    }

    /// Structural equality: same name, same attribute set, same trimmed text and pairwise
    /// equal child elements.
    pub fn structurally_equal(&self, other: &Self) -> bool {
        if self.name != other.name || self.attributes.len() != other.attributes.len() {
            return false;
        }
        if !self
            .attributes
            .iter()
            .all(|(k, v)| other.attribute(k) == Some(v.as_str()))
        {
            return false;
        }
        if self.text().trim() != other.text().trim() {
            return false;
        }
        let (mine, theirs): (Vec<_>, Vec<_>) = (self.elements().collect(), other.elements().collect());
        mine.len() == theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| a.structurally_equal(b))
    }

    /// Recursively drops sibling elements structurally equal to an earlier sibling.
    pub fn remove_duplicates(&mut self) {
        for child in self.elements_mut() {
            child.remove_duplicates();
        }

        let mut kept: Vec<XmlNode> = Vec::with_capacity(self.children.len());
        for node in std::mem::take(&mut self.children) {
            if let XmlNode::Element(candidate) = &node {
                let seen = kept.iter().any(|k| match k {
                    XmlNode::Element(existing) => existing.structurally_equal(candidate),
                    XmlNode::Text(_) => false,
                });
                if seen {
                    continue;
                }
            }
            kept.push(node);
        }
        self.children = kept;
    }

    /// Recursively shuffles the order of child elements. Elements with mixed content keep
    /// their order, since moving text around would change it.
    pub fn scramble<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        for child in self.elements_mut() {
            child.scramble(rng);
        }
        if self.is_element_only() {
            let mut elements: Vec<XmlNode> = std::mem::take(&mut self.children)
                .into_iter()
                .filter(|n| matches!(n, XmlNode::Element(_)))
                .collect();
            elements.shuffle(rng);
            self.children = elements;
        }
    }
}

/// A parsed document; only the root element is retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub root: XmlElement,
}

impl XmlDocument {
    /// Parses `text` into a tree.
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(text);
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        XmlError::UnbalancedTag(String::from_utf8_lossy(end.name().as_ref()).into_owned())
                    })?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text.unescape()?.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let raw = data.into_inner();
                        parent
                            .children
                            .push(XmlNode::Text(String::from_utf8_lossy(&raw).into_owned()));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.pop() {
            return Err(XmlError::UnbalancedTag(open.name));
        }
        root.map(|root| Self { root }).ok_or(XmlError::NoRoot)
    }

    /// Serializes the document with an XML declaration and `indent` spaces per level.
    pub fn to_xml_string(&self, indent: usize) -> Result<String, XmlError> {
        let mut writer = Writer::new(Vec::new());
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;
        write_newline(&mut writer, 0, indent)?;
        write_element(&mut writer, &self.root, 0, indent, true)?;
        write_newline(&mut writer, 0, indent)?;
        Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlElement, XmlError> {
    let mut element = XmlElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(stack: &mut [XmlElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(XmlNode::Element(element)),
        None => *root = Some(element),
    }
}

fn write_newline(writer: &mut Writer<Vec<u8>>, depth: usize, indent: usize) -> Result<(), XmlError> {
    let ws = format!("\n{}", " ".repeat(depth * indent));
    writer.write_event(Event::Text(BytesText::from_escaped(ws)))?;
    Ok(())
}

fn write_element(
    writer: &mut Writer<Vec<u8>>,
    element: &XmlElement,
    depth: usize,
    indent: usize,
    pretty: bool,
) -> Result<(), XmlError> {
    let mut start = BytesStart::new(element.name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    if pretty && element.is_element_only() {
        for child in element.elements() {
            write_newline(writer, depth + 1, indent)?;
            write_element(writer, child, depth + 1, indent, true)?;
        }
        write_newline(writer, depth, indent)?;
    } else {
        for node in &element.children {
            match node {
                XmlNode::Text(text) => {
                    writer.write_event(Event::Text(BytesText::from_escaped(partial_escape(text))))?;
                }
                XmlNode::Element(child) => write_element(writer, child, depth, indent, false)?,
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-permission android:name="android.permission.INTERNET"/>
    <uses-permission android:name="android.permission.INTERNET"/>
    <uses-permission android:name="android.permission.CAMERA"/>
    <application android:label="Demo &amp; Co">
        <activity android:name=".MainActivity"/>
        <activity android:name=".SecondActivity"/>
        <!-- comment -->
    </application>
</manifest>
"#;

    #[test]
    fn parses_attributes_and_children() {
        let doc = XmlDocument::parse(MANIFEST).unwrap();
        assert_eq!(doc.root.name, "manifest");
        assert_eq!(doc.root.attribute("package"), Some("com.example.app"));
        assert_eq!(doc.root.element_count(), 7);
        let app = doc.root.elements().nth(3).unwrap();
        assert_eq!(app.attribute("android:label"), Some("Demo & Co"));
    }

    #[test]
    fn removes_duplicate_siblings_idempotently() {
        let mut doc = XmlDocument::parse(MANIFEST).unwrap();
        doc.root.remove_duplicates();
        assert_eq!(doc.root.element_count(), 6);
        let once = doc.clone();
        doc.root.remove_duplicates();
        assert_eq!(doc, once);
    }

    #[test]
    fn scramble_keeps_elements_and_attributes() {
        let mut doc = XmlDocument::parse(MANIFEST).unwrap();
        let before = doc.root.element_count();
        let mut rng = StdRng::seed_from_u64(7);
        doc.root.scramble(&mut rng);
        assert_eq!(doc.root.element_count(), before);
        assert_eq!(doc.root.attribute("package"), Some("com.example.app"));
        let mut names: Vec<_> = doc
            .root
            .elements()
            .filter_map(|e| e.attribute("android:name"))
            .collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "android.permission.CAMERA",
                "android.permission.INTERNET",
                "android.permission.INTERNET"
            ]
        );
    }

    #[test]
    fn writes_indented_and_reparses() {
        let doc = XmlDocument::parse(MANIFEST).unwrap();
        let out = doc.to_xml_string(4).unwrap();
        assert!(out.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<manifest"));
        assert!(out.contains("\n    <uses-permission android:name=\"android.permission.INTERNET\"/>"));
        assert!(out.contains("\n        <activity android:name=\".MainActivity\"/>"));
        assert!(!out.contains("comment"));
        let mut expected = doc.root.clone();
        strip_whitespace(&mut expected);
        let mut reparsed = XmlDocument::parse(&out).unwrap().root;
        strip_whitespace(&mut reparsed);
        assert_eq!(reparsed, expected);
    }

    #[test]
    fn mixed_content_is_written_verbatim() {
        let doc = XmlDocument::parse("<resources><string name=\"a\">Hi <b>you</b> &lt;3</string></resources>").unwrap();
        let out = doc.to_xml_string(4).unwrap();
        assert!(out.contains("<string name=\"a\">Hi <b>you</b> &lt;3</string>"));
    }

    fn strip_whitespace(element: &mut XmlElement) {
        element
            .children
            .retain(|n| !matches!(n, XmlNode::Text(t) if t.trim().is_empty()));
        for child in element.elements_mut() {
            strip_whitespace(child);
        }
    }
}
