//! Minimal element tree for the domain status document.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{JobError, JobResult};

/// An XML element with attributes, child elements and optional text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<StatusElement>,
    pub text: Option<String>,
}

impl StatusElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: StatusElement) -> Self {
        self.children.push(child);
        self
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First child with the given name.
    pub fn child(&self, name: &str) -> Option<&StatusElement> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a StatusElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Serializes the element as an indented XML fragment.
    pub fn to_xml_string(&self) -> JobResult<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write_to(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))
    }

    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> JobResult<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_none() {
            writer.write_event(Event::Empty(start)).map_err(write_error)?;
            return Ok(());
        }

        writer.write_event(Event::Start(start)).map_err(write_error)?;
        if let Some(text) = &self.text {
            writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?;
        }
        for child in &self.children {
            child.write_to(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(self.name.as_str())))
            .map_err(write_error)?;
        Ok(())
    }

    /// Parses a document and returns its root element.
    pub fn parse(xml: &str) -> JobResult<StatusElement> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<StatusElement> = Vec::new();
        let mut root = None;

        loop {
            match reader.read_event().map_err(read_error)? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let element = element_from(&start)?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| JobError::corrupt("unbalanced closing tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let text = text.unescape().map_err(read_error)?;
                    if let Some(top) = stack.last_mut() {
                        top.text = Some(text.into_owned());
                    }
                }
                Event::CData(data) => {
                    let text = String::from_utf8(data.into_inner().into_owned())
                        .map_err(|e| JobError::corrupt(e.to_string()))?;
                    if let Some(top) = stack.last_mut() {
                        top.text = Some(text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !stack.is_empty() {
            return Err(JobError::corrupt("unterminated element in status document"));
        }
        root.ok_or_else(|| JobError::corrupt("status document has no root element"))
    }
}

fn element_from(start: &BytesStart<'_>) -> JobResult<StatusElement> {
    let mut element = StatusElement::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr.map_err(|e| JobError::corrupt(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(read_error)?.into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

fn attach(
    stack: &mut [StatusElement],
    root: &mut Option<StatusElement>,
    element: StatusElement,
) -> JobResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
    } else if root.is_none() {
        *root = Some(element);
    } else {
        return Err(JobError::corrupt("status document has multiple root elements"));
    }
    Ok(())
}

fn read_error(err: quick_xml::Error) -> JobError {
    JobError::corrupt(format!("malformed status document: {err}"))
}

fn write_error(err: impl std::fmt::Display) -> JobError {
    JobError::Io(std::io::Error::other(err.to_string()))
}
