//! Minimal XML element tree with deterministic pretty-printing.
//!
//! The importer XML dialects are a byte-for-byte compatibility contract, so
//! serialization is done by hand here instead of relying on a writer that
//! controls its own whitespace. Parsing and escaping come from `quick-xml`.

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Element {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Sets an attribute, replacing any existing value.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.attrs.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.attrs.push((name, value));
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = Some(text.into());
    }

    pub fn append(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    pub fn append_comment(&mut self, text: impl Into<String>) {
        self.children.push(Node::Comment(text.into()));
    }

    pub fn insert_first(&mut self, child: Element) {
        self.children.insert(0, Node::Element(child));
    }

    /// Appends a new child element and returns a mutable reference to it.
    pub fn add_child(&mut self, tag: impl Into<String>) -> &mut Element {
        self.children.push(Node::Element(Element::new(tag)));
        match self.children.last_mut() {
            Some(Node::Element(element)) => element,
            _ => unreachable!(),
        }
    }

    /// Direct element children, comments skipped.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Comment(_) => None,
        })
    }

    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(|node| match node {
            Node::Element(element) => Some(element),
            Node::Comment(_) => None,
        })
    }

    /// First direct child with the given tag.
    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.elements().find(|element| element.tag == tag)
    }

    pub fn find_mut(&mut self, tag: &str) -> Option<&mut Element> {
        self.elements_mut().find(|element| element.tag == tag)
    }

    /// All descendants with the given tag, in document order.
    pub fn find_all(&self, tag: &str) -> Vec<&Element> {
        let mut found = Vec::new();
        for element in self.elements() {
            if element.tag == tag {
                found.push(element);
            }
            found.extend(element.find_all(tag));
        }
        found
    }

    /// Drops direct element children not matching the predicate.
    pub fn retain_elements<F>(&mut self, mut keep: F)
    where
        F: FnMut(&Element) -> bool,
    {
        self.children.retain(|node| match node {
            Node::Element(element) => keep(element),
            Node::Comment(_) => true,
        });
    }

    /// Parses an XML document into an element tree.
    pub fn parse(xml: &str) -> Result<Element, quick_xml::Error> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event()? {
                Event::Start(start) => {
                    stack.push(element_from_start(&start)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.append(element),
                        None => root = Some(element),
                    }
                }
                Event::End(_) => {
                    let element = stack.pop().expect("unbalanced document rejected by reader");
                    match stack.last_mut() {
                        Some(parent) => parent.append(element),
                        None => root = Some(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        let unescaped = text.unescape()?;
                        if !unescaped.trim().is_empty() {
                            match current.text {
                                Some(ref mut existing) => existing.push_str(&unescaped),
                                None => current.text = Some(unescaped.into_owned()),
                            }
                        }
                    }
                }
                Event::Comment(comment) => {
                    if let Some(current) = stack.last_mut() {
                        current.append_comment(comment.unescape()?.into_owned());
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let content = String::from_utf8_lossy(&data).into_owned();
                        match current.text {
                            Some(ref mut existing) => existing.push_str(&content),
                            None => current.text = Some(content),
                        }
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        root.ok_or_else(|| {
            quick_xml::Error::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no root element",
            )))
        })
    }

    /// Serializes with XML declaration, 2-space indentation and self-closing
    /// empty elements.
    pub fn to_pretty_string(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        write_element(&mut out, self, 0);
        out
    }
}

fn element_from_start(start: &quick_xml::events::BytesStart<'_>) -> Result<Element, quick_xml::Error> {
    let mut element = Element::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        element.attrs.push((key, value));
    }
    Ok(element)
}

fn write_element(out: &mut String, element: &Element, depth: usize) {
    let indent = "  ".repeat(depth);
    out.push_str(&indent);
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape(valid_xml_str(value).as_str()));
        out.push('"');
    }

    let text = element.text.as_deref().filter(|t| !t.is_empty());
    if element.children.is_empty() && text.is_none() {
        out.push_str("/>\n");
        return;
    }

    out.push('>');
    if let Some(text) = text {
        out.push_str(&escape(valid_xml_str(text).as_str()));
    }
    if !element.children.is_empty() {
        out.push('\n');
        for child in &element.children {
            match child {
                Node::Element(child) => write_element(out, child, depth + 1),
                Node::Comment(comment) => {
                    out.push_str(&"  ".repeat(depth + 1));
                    out.push_str("<!--");
                    out.push_str(comment);
                    out.push_str("-->\n");
                }
            }
        }
        out.push_str(&indent);
    }
    out.push_str("</");
    out.push_str(&element.tag);
    out.push_str(">\n");
}

/// Strips characters that are not valid in XML 1.0 documents.
pub fn valid_xml_str(input: &str) -> String {
    input
        .chars()
        .filter(|&c| {
            matches!(c,
                '\u{0009}' | '\u{000A}' | '\u{000D}'
                | '\u{0020}'..='\u{D7FF}'
                | '\u{E000}'..='\u{FFFD}'
                | '\u{10000}'..='\u{10FFFF}')
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_simple_document() {
        let mut root = Element::new("testsuites");
        root.append_comment("Generated for testrun demo");
        let properties = root.add_child("properties");
        let prop = properties.add_child("property");
        prop.set_attr("name", "polarion-testrun-id");
        prop.set_attr("value", "demo");

        let xml = root.to_pretty_string();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<testsuites>"));
        assert!(xml.contains("<!--Generated for testrun demo-->"));
        assert!(xml.contains("<property name=\"polarion-testrun-id\" value=\"demo\"/>"));

        let parsed = Element::parse(&xml).unwrap();
        let prop = parsed.find("properties").unwrap().find("property").unwrap();
        assert_eq!(prop.attr("value"), Some("demo"));
    }

    #[test]
    fn test_escaping_in_attributes_and_text() {
        let mut root = Element::new("testcase");
        root.set_attr("name", "a<b>&\"c\"");
        let title = root.add_child("title");
        title.set_text("x < y & z");

        let xml = root.to_pretty_string();
        assert!(xml.contains("name=\"a&lt;b&gt;&amp;&quot;c&quot;\""));
        assert!(xml.contains("<title>x &lt; y &amp; z</title>"));

        let parsed = Element::parse(&xml).unwrap();
        assert_eq!(parsed.attr("name"), Some("a<b>&\"c\""));
        assert_eq!(parsed.find("title").unwrap().text.as_deref(), Some("x < y & z"));
    }

    #[test]
    fn test_find_all_is_recursive() {
        let xml = r#"
            <testsuite>
                <testcase name="top"/>
                <testsuite><testcase name="nested"/></testsuite>
            </testsuite>"#;
        let root = Element::parse(xml).unwrap();
        let cases = root.find_all("testcase");
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].attr("name"), Some("top"));
        assert_eq!(cases[1].attr("name"), Some("nested"));
    }

    #[test]
    fn test_invalid_xml_chars_are_stripped() {
        assert_eq!(valid_xml_str("ok\u{0008}text"), "oktext");
        assert_eq!(valid_xml_str("tab\tand\nnewline"), "tab\tand\nnewline");
    }
}
