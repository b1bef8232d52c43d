#![deny(unreachable_pub)]
//! Codec for the CWMP (TR-069) SOAP wire format.
//!
//! The envelope model is a closed union over the CWMP message catalog. A
//! decode records the namespace prefixes of the inbound document in a
//! [`SoapNamespace`]; encoding an envelope with that record reproduces the
//! same prefixes, which matters because CPE firmware routinely rejects
//! replies that do not mirror its own prefix choices.

use thiserror::Error;

mod decode;
mod encode;
mod message;
mod ns;
mod util;
mod xmlutil;

pub use message::*;
pub use ns::{
    SoapNamespace, XMLNS_CWMP_1_0, XMLNS_CWMP_1_1, XMLNS_CWMP_1_2, XMLNS_CWMP_1_3, XMLNS_CWMP_1_4,
    XMLNS_SOAP_ENC, XMLNS_SOAP_ENV, XMLNS_XSD, XMLNS_XSI,
};
pub use util::{clean_xml, format_time, parse_time, parse_time_or_epoch};
pub use xmlutil::WriterError;

/// Fault codes the ACS sends to a CPE.
pub mod fault {
    pub const METHOD_NOT_SUPPORTED: u16 = 8000;
    pub const REQUEST_DENIED: u16 = 8001;
    pub const INTERNAL_ERROR: u16 = 8002;
    pub const INVALID_ARGUMENTS: u16 = 8003;
    pub const RESOURCES_EXCEEDED: u16 = 8004;
    pub const RETRY_REQUEST: u16 = 8005;
}

/// Why an inbound payload could not be decoded.
///
/// A SOAP-level `Fault` body is not an error here: it decodes into
/// [`Body::Fault`] and it is the session engine's business what to do with
/// it.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed XML: {message}")]
    MalformedXml { message: String },
    #[error("no recognized CWMP payload in Body")]
    UnsupportedBody,
    #[error("missing SOAP or CWMP namespace declaration")]
    MissingCwmpNamespace,
}

impl From<xml::reader::Error> for DecodeError {
    fn from(source: xml::reader::Error) -> Self {
        Self::MalformedXml {
            message: source.to_string(),
        }
    }
}

impl From<&str> for DecodeError {
    fn from(value: &str) -> Self {
        Self::MalformedXml {
            message: value.to_owned(),
        }
    }
}

impl From<String> for DecodeError {
    fn from(message: String) -> Self {
        Self::MalformedXml { message }
    }
}
