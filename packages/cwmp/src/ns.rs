use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::DecodeError;

pub const XMLNS_XSD: &str = "http://www.w3.org/2001/XMLSchema";
pub const XMLNS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";
pub const XMLNS_SOAP_ENC: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const XMLNS_SOAP_ENV: &str = "http://schemas.xmlsoap.org/soap/envelope/";

pub const XMLNS_CWMP_1_0: &str = "urn:dslforum-org:cwmp-1-0";
pub const XMLNS_CWMP_1_1: &str = "urn:dslforum-org:cwmp-1-1";
pub const XMLNS_CWMP_1_2: &str = "urn:dslforum-org:cwmp-1-2";
pub const XMLNS_CWMP_1_3: &str = "urn:dslforum-org:cwmp-1-3";
pub const XMLNS_CWMP_1_4: &str = "urn:dslforum-org:cwmp-1-4";

fn is_cwmp_urn(uri: &str) -> bool {
    matches!(
        uri,
        XMLNS_CWMP_1_0 | XMLNS_CWMP_1_1 | XMLNS_CWMP_1_2 | XMLNS_CWMP_1_3 | XMLNS_CWMP_1_4
    )
}

/// The namespace prefixes of a CWMP session.
///
/// A CPE picks its own prefixes for the five namespaces of a SOAP message
/// and some firmware rejects replies that use different ones, so the
/// prefixes recorded at decode are mirrored on every message encoded for
/// the same session. The record round-trips through JSON so it can be held
/// in session storage without tying that storage to the wire format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoapNamespace {
    pub soap_env: String,
    pub soap_enc: String,
    pub xsd: String,
    pub xsi: String,
    pub cwmp: String,
    /// The CWMP namespace URI, carried verbatim: `urn:dslforum-org:cwmp-1-0`
    /// through `cwmp-1-4` are all accepted and echoed back unchanged.
    pub cwmp_urn: String,
}

impl Default for SoapNamespace {
    fn default() -> Self {
        Self {
            soap_env: "SOAP-ENV".to_owned(),
            soap_enc: "SOAP-ENC".to_owned(),
            xsd: "xsd".to_owned(),
            xsi: "xsi".to_owned(),
            cwmp: "cwmp".to_owned(),
            cwmp_urn: XMLNS_CWMP_1_0.to_owned(),
        }
    }
}

impl SoapNamespace {
    /// Builds the namespace record from the prefix map in scope on an
    /// inbound `Envelope` element. The SOAP envelope and CWMP namespaces
    /// are required; the rest fall back to the server defaults.
    pub(crate) fn from_scope(scope: &BTreeMap<String, String>) -> Result<Self, DecodeError> {
        let mut ns = SoapNamespace::default();
        let mut saw_env = false;
        let mut saw_cwmp = false;

        for (prefix, uri) in scope {
            match uri.as_str() {
                XMLNS_SOAP_ENV => {
                    ns.soap_env = prefix.clone();
                    saw_env = true;
                }
                XMLNS_SOAP_ENC => ns.soap_enc = prefix.clone(),
                XMLNS_XSD => ns.xsd = prefix.clone(),
                XMLNS_XSI => ns.xsi = prefix.clone(),
                uri if is_cwmp_urn(uri) => {
                    ns.cwmp = prefix.clone();
                    ns.cwmp_urn = uri.to_owned();
                    saw_cwmp = true;
                }
                _ => {}
            }
        }

        if !saw_env || !saw_cwmp {
            return Err(DecodeError::MissingCwmpNamespace);
        }
        Ok(ns)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(value: &str) -> Option<Self> {
        serde_json::from_str(value).ok()
    }
}
