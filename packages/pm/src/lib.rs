#![deny(unreachable_pub)]
//! Parsers for the files a CPE uploads: 3GPP performance-measurement XML
//! (`measCollecFile`) and the structured filenames that identify uploads.

use std::{collections::HashMap, io::Read};

use thiserror::Error;

mod duration;
mod filename;
mod reader;

pub use duration::parse_duration;
pub use filename::{FileType, ParsedFileName, parse_file_name};
use reader::XmlReader;

#[derive(Debug, Error)]
pub enum PmError {
    #[error("filename matches no known upload pattern")]
    InvalidFilename,
    #[error("invalid ISO 8601 duration")]
    InvalidDuration,
    #[error("malformed measurement file: {message}")]
    MalformedFile { message: String },
}

impl PmError {
    fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFile {
            message: message.into(),
        }
    }
}

impl From<xml::reader::Error> for PmError {
    fn from(source: xml::reader::Error) -> Self {
        Self::malformed(source.to_string())
    }
}

/// A decoded 3GPP TS 32.432 measurement collection file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasCollecFile {
    pub file_header: FileHeader,
    pub meas_data: Vec<MeasData>,
    pub file_footer: FileFooter,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub file_format_version: String,
    pub vendor_name: String,
    pub dn_prefix: String,
    pub sender_local_dn: String,
    pub sender_element_type: String,
    pub begin_time: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasData {
    pub managed_element: ManagedElement,
    pub meas_info: Vec<MeasInfo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedElement {
    pub local_dn: String,
    pub user_label: String,
    pub sw_version: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasInfo {
    pub job_id: String,
    /// `granPeriod` duration attribute, ISO 8601 (see [`parse_duration`]).
    pub gran_period: String,
    pub gran_end_time: String,
    pub rep_period: String,
    pub meas_types: Vec<MeasType>,
    pub meas_value: MeasValue,
}

/// A metric name at position `p` of its measurement block.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeasType {
    pub p: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasValue {
    pub meas_obj_ldn: String,
    pub entries: Vec<MeasEntry>,
}

/// A metric value at position `p`, joined against [`MeasType`] by position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeasEntry {
    pub p: u32,
    pub value: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileFooter {
    pub end_time: String,
}

fn attr_u32(element: &reader::Element, name: &str) -> u32 {
    element
        .attribute(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

impl MeasCollecFile {
    /// Decodes a `measCollecFile` document.
    pub fn decode<R: Read>(source: R) -> Result<Self, PmError> {
        let mut reader = XmlReader::new(source);

        let root = reader
            .next_element()?
            .ok_or_else(|| PmError::malformed("empty document"))?;
        if root.name != "measCollecFile" {
            return Err(PmError::malformed(format!(
                "unexpected document element {}",
                root.name
            )));
        }

        let mut file = MeasCollecFile::default();
        while let Some(element) = reader.next_element()? {
            match element.name.as_str() {
                "fileHeader" => {
                    file.file_header.file_format_version = element
                        .attribute("fileFormatVersion")
                        .unwrap_or_default()
                        .to_owned();
                    file.file_header.vendor_name =
                        element.attribute("vendorName").unwrap_or_default().to_owned();
                    file.file_header.dn_prefix =
                        element.attribute("dnPrefix").unwrap_or_default().to_owned();
                    while let Some(child) = reader.next_element()? {
                        match child.name.as_str() {
                            "fileSender" => {
                                file.file_header.sender_local_dn =
                                    child.attribute("localDn").unwrap_or_default().to_owned();
                                file.file_header.sender_element_type = child
                                    .attribute("elementType")
                                    .unwrap_or_default()
                                    .to_owned();
                                reader.skip()?;
                            }
                            "measCollec" => {
                                file.file_header.begin_time =
                                    child.attribute("beginTime").unwrap_or_default().to_owned();
                                reader.skip()?;
                            }
                            _ => reader.skip()?,
                        }
                    }
                }
                "measData" => file.meas_data.push(decode_meas_data(&mut reader)?),
                "fileFooter" => {
                    while let Some(child) = reader.next_element()? {
                        if child.name == "measCollec" {
                            file.file_footer.end_time =
                                child.attribute("endTime").unwrap_or_default().to_owned();
                        }
                        reader.skip()?;
                    }
                }
                _ => reader.skip()?,
            }
        }
        Ok(file)
    }

    /// Joins every `measType` against the `r` entries on the `p` attribute,
    /// producing the metric-name → value mapping handed to the performance
    /// handler. Positions repeat across `measInfo` blocks the way the
    /// devices emit them, so types are collected over the whole file first.
    pub fn measure_values(&self) -> HashMap<String, f64> {
        let mut types = HashMap::new();
        for data in &self.meas_data {
            for info in &data.meas_info {
                for meas_type in &info.meas_types {
                    types.insert(meas_type.p, meas_type.name.as_str());
                }
            }
        }

        let mut values = HashMap::new();
        for data in &self.meas_data {
            for info in &data.meas_info {
                for entry in &info.meas_value.entries {
                    if let Some(name) = types.get(&entry.p) {
                        values.insert((*name).to_owned(), entry.value);
                    }
                }
            }
        }
        values
    }
}

fn decode_meas_data<R: Read>(reader: &mut XmlReader<R>) -> Result<MeasData, PmError> {
    let mut data = MeasData::default();

    while let Some(element) = reader.next_element()? {
        match element.name.as_str() {
            "managedElement" => {
                data.managed_element.local_dn =
                    element.attribute("localDn").unwrap_or_default().to_owned();
                data.managed_element.user_label =
                    element.attribute("userLabel").unwrap_or_default().to_owned();
                data.managed_element.sw_version =
                    element.attribute("swVersion").unwrap_or_default().to_owned();
                reader.skip()?;
            }
            "measInfo" => {
                let mut info = MeasInfo::default();
                while let Some(child) = reader.next_element()? {
                    match child.name.as_str() {
                        "job" => {
                            info.job_id = child.attribute("jobId").unwrap_or_default().to_owned();
                            reader.skip()?;
                        }
                        "granPeriod" => {
                            info.gran_period =
                                child.attribute("duration").unwrap_or_default().to_owned();
                            info.gran_end_time =
                                child.attribute("endTime").unwrap_or_default().to_owned();
                            reader.skip()?;
                        }
                        "repPeriod" => {
                            info.rep_period =
                                child.attribute("duration").unwrap_or_default().to_owned();
                            reader.skip()?;
                        }
                        "measType" => {
                            let p = attr_u32(&child, "p");
                            info.meas_types.push(MeasType {
                                p,
                                name: reader.text()?.trim().to_owned(),
                            });
                        }
                        "measValue" => {
                            info.meas_value.meas_obj_ldn =
                                child.attribute("measObjLdn").unwrap_or_default().to_owned();
                            while let Some(entry) = reader.next_element()? {
                                if entry.name != "r" {
                                    reader.skip()?;
                                    continue;
                                }
                                let p = attr_u32(&entry, "p");
                                let value = reader.text()?.trim().parse().unwrap_or(0.0);
                                info.meas_value.entries.push(MeasEntry { p, value });
                            }
                        }
                        _ => reader.skip()?,
                    }
                }
                data.meas_info.push(info);
            }
            _ => reader.skip()?,
        }
    }
    Ok(data)
}
