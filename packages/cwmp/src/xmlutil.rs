use std::{
    collections::BTreeMap,
    fmt,
    io::{Read, Write},
};

use thiserror::Error;
use xml::{
    EmitterConfig, EventReader, EventWriter,
    common::XmlVersion,
    name::OwnedName,
    reader, writer,
};

use crate::DecodeError;

type Map<K, V> = BTreeMap<K, V>;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("{source}")]
    Xml {
        #[from]
        source: xml::writer::Error,
    },
    #[error("{message}")]
    Custom { message: String },
}

impl From<&str> for WriterError {
    fn from(value: &str) -> Self {
        Self::Custom {
            message: value.to_owned(),
        }
    }
}

impl From<String> for WriterError {
    fn from(message: String) -> Self {
        Self::Custom { message }
    }
}

/// An XML name made up of an optional namespace URI and a local name.
#[derive(Clone, PartialEq, Hash, Debug, Eq, PartialOrd, Ord)]
pub(crate) struct XmlName {
    pub(crate) namespace: Option<String>,
    pub(crate) local_name: String,
}

impl XmlName {
    pub(crate) fn qualified(namespace: &str, local_name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_owned()),
            local_name: local_name.to_owned(),
        }
    }

    pub(crate) fn local(local_name: &str) -> Self {
        Self {
            namespace: None,
            local_name: local_name.to_owned(),
        }
    }
}

impl fmt::Display for XmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref ns) = self.namespace {
            write!(f, "{}#{}", ns, self.local_name)
        } else {
            write!(f, "{}", self.local_name)
        }
    }
}

impl From<OwnedName> for XmlName {
    fn from(name: OwnedName) -> Self {
        XmlName {
            namespace: name.namespace,
            local_name: name.local_name,
        }
    }
}

impl<'a> From<(&'a str, &'a str)> for XmlName {
    fn from((ns, local): (&'a str, &'a str)) -> XmlName {
        XmlName::qualified(ns, local)
    }
}

/// An opened element: tag name, attributes and the namespace prefixes in
/// scope at the point it was read.
pub(crate) struct Element {
    pub(crate) name: XmlName,
    pub(crate) attributes: Map<XmlName, String>,
    pub(crate) namespaces: Map<String, String>,
}

impl Element {
    /// Looks up an attribute by local name, ignoring its namespace. CWMP
    /// peers disagree on whether `xsi:type` style attributes are prefixed.
    pub(crate) fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name.local_name == local_name)
            .map(|(_, value)| value.as_str())
    }
}

/// A simplified view of an XML document. Every element either contains only
/// text or only child elements; CWMP payloads never mix the two.
pub(crate) struct XmlReader<R: Read> {
    reader: EventReader<R>,
}

impl<R: Read> XmlReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: EventReader::new(reader),
        }
    }

    /// Gets the next child element of the current element, returning `None`
    /// when the current element closes.
    pub(crate) fn next_element(&mut self) -> Result<Option<Element>, DecodeError> {
        loop {
            let event = self.reader.next()?;

            match event {
                reader::XmlEvent::EndDocument => {
                    return Err("unexpected end of XML document".into());
                }
                reader::XmlEvent::StartElement {
                    name,
                    attributes,
                    namespace,
                } => {
                    let mut attrs = Map::new();
                    for attr in attributes {
                        attrs.insert(attr.name.into(), attr.value);
                    }

                    let mut namespaces = Map::new();
                    for (prefix, uri) in namespace.0 {
                        namespaces.insert(prefix, uri);
                    }

                    return Ok(Some(Element {
                        name: name.into(),
                        attributes: attrs,
                        namespaces,
                    }));
                }
                reader::XmlEvent::EndElement { .. } => {
                    return Ok(None);
                }
                reader::XmlEvent::CData(_) | reader::XmlEvent::Characters(_) => {
                    return Err("unexpected text where an element was expected".into());
                }
                _ => {}
            }
        }
    }

    /// Gets the text content of the current element and consumes its end tag.
    pub(crate) fn text(&mut self) -> Result<Option<String>, DecodeError> {
        let mut content = String::new();
        let mut saw_text = false;

        loop {
            let event = self.reader.next()?;

            match event {
                reader::XmlEvent::EndDocument => {
                    return Err("unexpected end of XML document".into());
                }
                reader::XmlEvent::StartElement { name, .. } => {
                    return Err(
                        format!("unexpected element {name} where text was expected").into(),
                    );
                }
                reader::XmlEvent::EndElement { .. } => break,
                reader::XmlEvent::CData(text) | reader::XmlEvent::Characters(text) => {
                    content += &text;
                    saw_text = true;
                }
                reader::XmlEvent::Whitespace(text) => {
                    content += &text;
                }
                _ => {}
            }
        }

        if saw_text { Ok(Some(content)) } else { Ok(None) }
    }

    /// Consumes the rest of the current element, children included.
    pub(crate) fn skip(&mut self) -> Result<(), DecodeError> {
        let mut depth = 1usize;

        loop {
            match self.reader.next()? {
                reader::XmlEvent::EndDocument => {
                    return Err("unexpected end of XML document".into());
                }
                reader::XmlEvent::StartElement { .. } => depth += 1,
                reader::XmlEvent::EndElement { .. } => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }
}

/// A builder for a new element to be written to an XML document.
#[must_use]
pub(crate) struct ElementBuilder<'a, W: Write> {
    previous_prefixes: Map<String, String>,
    tag_name: XmlName,
    attributes: Vec<(XmlName, String)>,
    new_prefixes: Vec<(String, String)>,
    writer: &'a mut XmlWriter<W>,
}

impl<W: Write> ElementBuilder<'_, W> {
    fn to_name(&self, xml_name: &XmlName) -> Result<OwnedName, WriterError> {
        if let Some(ref ns) = xml_name.namespace {
            let prefix = self.writer.prefixes.get(ns).ok_or_else(|| {
                WriterError::from(format!("no prefix declared for namespace {ns}"))
            })?;
            Ok(OwnedName::qualified(
                &xml_name.local_name,
                ns,
                Some(prefix.clone()),
            ))
        } else {
            Ok(OwnedName::local(&xml_name.local_name))
        }
    }

    fn build(&mut self) -> Result<(), WriterError> {
        for (prefix, uri) in &self.new_prefixes {
            self.writer.prefixes.insert(uri.clone(), prefix.clone());
        }

        let element_name = self.to_name(&self.tag_name)?;
        let mut event = writer::XmlEvent::start_element(element_name.borrow());

        for (prefix, uri) in &self.new_prefixes {
            event = event.ns(prefix.as_str(), uri.as_str());
        }

        let mut attrs = Vec::with_capacity(self.attributes.len());
        for (name, value) in &self.attributes {
            attrs.push((self.to_name(name)?, value));
        }
        for (name, value) in attrs.iter() {
            event = event.attr(name.borrow(), value);
        }

        self.writer.writer.write(event)?;
        Ok(())
    }

    fn done(self) -> Result<(), WriterError> {
        self.writer.writer.write(writer::XmlEvent::end_element())?;
        self.writer.prefixes = self.previous_prefixes;
        Ok(())
    }

    /// Adds an unqualified attribute to this element.
    pub(crate) fn attr<D: ToString>(mut self, local_name: &str, value: D) -> Self {
        self.attributes.push((XmlName::local(local_name), value.to_string()));
        self
    }

    /// Adds a namespace-qualified attribute to this element.
    pub(crate) fn attr_ns<N: Into<XmlName>, D: ToString>(mut self, name: N, value: D) -> Self {
        self.attributes.push((name.into(), value.to_string()));
        self
    }

    /// Declares a namespace prefix mapping on this element.
    pub(crate) fn prefix(mut self, prefix: &str, uri: &str) -> Self {
        self.new_prefixes.push((prefix.to_owned(), uri.to_owned()));
        self
    }

    /// Writes out an empty element.
    pub(crate) fn empty(self) -> Result<(), WriterError> {
        self.contents(|_w| Ok(()))
    }

    /// Writes out an element containing text.
    pub(crate) fn text<T: ToString>(self, text: T) -> Result<(), WriterError> {
        self.contents(|writer| {
            writer
                .writer
                .write(writer::XmlEvent::characters(&text.to_string()))?;
            Ok(())
        })
    }

    /// Writes out an element with contents built by the provided closure.
    pub(crate) fn contents<F>(mut self, cb: F) -> Result<(), WriterError>
    where
        F: for<'b> FnOnce(&'b mut XmlWriter<W>) -> Result<(), WriterError>,
    {
        self.build()?;
        cb(self.writer)?;
        self.done()
    }
}

pub(crate) struct XmlWriter<W: Write> {
    writer: EventWriter<W>,
    prefixes: Map<String, String>,
}

impl<W: Write> XmlWriter<W> {
    pub(crate) fn write_document<F>(sink: W, source: F) -> Result<(), WriterError>
    where
        F: for<'a> FnOnce(&'a mut XmlWriter<W>) -> Result<(), WriterError>,
    {
        let mut writer = EmitterConfig::new()
            .perform_indent(true)
            .create_writer(sink);

        writer.write(writer::XmlEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("UTF-8"),
            standalone: None,
        })?;

        source(&mut XmlWriter {
            writer,
            prefixes: Map::new(),
        })
    }

    /// Creates a new namespace-qualified element in this document. The
    /// namespace must have been declared by an enclosing element.
    pub(crate) fn element_ns<T>(&mut self, tag_name: T) -> ElementBuilder<'_, W>
    where
        T: Into<XmlName>,
    {
        ElementBuilder {
            previous_prefixes: self.prefixes.clone(),
            tag_name: tag_name.into(),
            attributes: Vec::new(),
            new_prefixes: Vec::new(),
            writer: self,
        }
    }

    /// Creates a new unqualified element in this document.
    pub(crate) fn element(&mut self, tag_name: &str) -> ElementBuilder<'_, W> {
        ElementBuilder {
            previous_prefixes: self.prefixes.clone(),
            tag_name: XmlName::local(tag_name),
            attributes: Vec::new(),
            new_prefixes: Vec::new(),
            writer: self,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{WriterError, XmlReader, XmlWriter};

    fn write_xml_to_string<F>(source: F) -> String
    where
        F: for<'a> FnOnce(&mut XmlWriter<&'a mut Vec<u8>>) -> Result<(), WriterError>,
    {
        let mut body = Vec::<u8>::new();
        XmlWriter::write_document(&mut body, source).unwrap();
        body.push(b'\n');
        String::from_utf8(body).unwrap()
    }

    #[test]
    fn qualified_elements_and_attributes() {
        let serialized = write_xml_to_string(|writer| {
            writer
                .element_ns(("http://schemas.xmlsoap.org/soap/envelope/", "Envelope"))
                .prefix("SOAP-ENV", "http://schemas.xmlsoap.org/soap/envelope/")
                .prefix("cwmp", "urn:dslforum-org:cwmp-1-0")
                .contents(|writer| {
                    writer
                        .element_ns(("urn:dslforum-org:cwmp-1-0", "ID"))
                        .attr_ns(
                            ("http://schemas.xmlsoap.org/soap/envelope/", "mustUnderstand"),
                            "1",
                        )
                        .text("12345")?;
                    writer.element("Plain").text("x")
                })
        });

        assert_eq!(
            serialized,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/" xmlns:cwmp="urn:dslforum-org:cwmp-1-0">
  <cwmp:ID SOAP-ENV:mustUnderstand="1">12345</cwmp:ID>
  <Plain>x</Plain>
</SOAP-ENV:Envelope>
"#
        );
    }

    #[test]
    fn undeclared_prefix_is_an_error() {
        let mut body = Vec::<u8>::new();
        let result = XmlWriter::write_document(&mut body, |writer| {
            writer.element_ns(("urn:example", "Thing")).empty()
        });
        assert!(result.is_err());
    }

    #[test]
    fn reader_collects_namespaces_and_attributes() {
        let mut reader = XmlReader::new(
            r#"<?xml version="1.0"?>
<e:Envelope xmlns:e="http://schemas.xmlsoap.org/soap/envelope/" xmlns:c="urn:dslforum-org:cwmp-1-2">
  <e:Header>
    <c:ID e:mustUnderstand="1">77</c:ID>
  </e:Header>
</e:Envelope>"#
                .as_bytes(),
        );

        let root = reader.next_element().unwrap().unwrap();
        assert_eq!(root.name.local_name, "Envelope");
        assert_eq!(
            root.namespaces.get("c").map(String::as_str),
            Some("urn:dslforum-org:cwmp-1-2")
        );

        let header = reader.next_element().unwrap().unwrap();
        assert_eq!(header.name.local_name, "Header");

        let id = reader.next_element().unwrap().unwrap();
        assert_eq!(id.name.local_name, "ID");
        assert_eq!(id.attribute("mustUnderstand"), Some("1"));
        assert_eq!(reader.text().unwrap().as_deref(), Some("77"));
    }

    #[test]
    fn skip_consumes_nested_content() {
        let mut reader = XmlReader::new(
            "<root><junk><a>1</a><b><c/></b></junk><keep>yes</keep></root>".as_bytes(),
        );

        reader.next_element().unwrap().unwrap();
        let junk = reader.next_element().unwrap().unwrap();
        assert_eq!(junk.name.local_name, "junk");
        reader.skip().unwrap();

        let keep = reader.next_element().unwrap().unwrap();
        assert_eq!(keep.name.local_name, "keep");
        assert_eq!(reader.text().unwrap().as_deref(), Some("yes"));
    }
}
