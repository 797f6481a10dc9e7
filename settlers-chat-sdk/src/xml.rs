//! A small owned element tree on top of `quick_xml`.
//!
//! BOSH responses are tiny, so building a tree is cheaper to reason about
//! than a streaming state machine. Element names are stored without their
//! prefix (`stream:features` becomes `features`); attribute keys are kept
//! verbatim.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ParseError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parse a document and return its root element.
    pub fn parse(input: &str) -> Result<Element, ParseError> {
        let mut reader = Reader::from_str(input);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(start)) => stack.push(open(&start)?),
                Ok(Event::Empty(start)) => {
                    let element = open(&start)?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::End(_)) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ParseError::Xml("unbalanced end tag".into()))?;
                    attach(&mut stack, &mut root, element);
                }
                Ok(Event::Text(text)) => {
                    let text = text.unescape().map_err(xml_error)?;
                    // Indentation between elements, not content.
                    if text.trim().is_empty() {
                        continue;
                    }
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&text);
                    }
                }
                Ok(Event::CData(data)) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(xml_error(e)),
            }
        }

        if !stack.is_empty() {
            return Err(ParseError::Xml("unclosed element".into()));
        }
        root.ok_or_else(|| ParseError::Xml("empty document".into()))
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.text.is_empty()
    }
}

fn open(start: &BytesStart<'_>) -> Result<Element, ParseError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        name,
        attrs,
        ..Element::default()
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        // Trailing siblings of the root are ignored.
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn xml_error(e: impl std::fmt::Display) -> ParseError {
    ParseError::Xml(e.to_string())
}
