use std::io::Read;

use xml::{EventReader, reader};

use crate::PmError;

/// An opened element with its attributes, keyed by local name.
pub(crate) struct Element {
    pub(crate) name: String,
    attributes: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == local_name)
            .map(|(_, value)| value.as_str())
    }
}

/// Minimal pull reader over measurement XML: elements either hold text or
/// child elements, never both.
pub(crate) struct XmlReader<R: Read> {
    reader: EventReader<R>,
}

impl<R: Read> XmlReader<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader: EventReader::new(reader),
        }
    }

    /// The next child of the current element, or `None` when it closes.
    pub(crate) fn next_element(&mut self) -> Result<Option<Element>, PmError> {
        loop {
            match self.reader.next()? {
                reader::XmlEvent::EndDocument => {
                    return Err(PmError::malformed("unexpected end of document"));
                }
                reader::XmlEvent::StartElement {
                    name, attributes, ..
                } => {
                    return Ok(Some(Element {
                        name: name.local_name,
                        attributes: attributes
                            .into_iter()
                            .map(|attr| (attr.name.local_name, attr.value))
                            .collect(),
                    }));
                }
                reader::XmlEvent::EndElement { .. } => return Ok(None),
                _ => {}
            }
        }
    }

    /// Text content of the current element, consuming its end tag.
    pub(crate) fn text(&mut self) -> Result<String, PmError> {
        let mut content = String::new();

        loop {
            match self.reader.next()? {
                reader::XmlEvent::EndDocument => {
                    return Err(PmError::malformed("unexpected end of document"));
                }
                reader::XmlEvent::StartElement { name, .. } => {
                    return Err(PmError::malformed(format!(
                        "unexpected element {name} where text was expected"
                    )));
                }
                reader::XmlEvent::EndElement { .. } => return Ok(content),
                reader::XmlEvent::CData(text)
                | reader::XmlEvent::Characters(text)
                | reader::XmlEvent::Whitespace(text) => content += &text,
                _ => {}
            }
        }
    }

    /// Consumes the rest of the current element, children included.
    pub(crate) fn skip(&mut self) -> Result<(), PmError> {
        let mut depth = 1usize;

        loop {
            match self.reader.next()? {
                reader::XmlEvent::EndDocument => {
                    return Err(PmError::malformed("unexpected end of document"));
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
