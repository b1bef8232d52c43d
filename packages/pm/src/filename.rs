use std::{fmt, sync::LazyLock};

use regex::Regex;
use time::{OffsetDateTime, PrimitiveDateTime, macros::format_description};

use crate::PmError;

/// CPE upload categories, derived from the filename shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    PmFile,
    NrmFile,
    ConfigurationFile,
    LogFile,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::PmFile => "PmFile",
            FileType::NrmFile => "NrmFile",
            FileType::ConfigurationFile => "ConfigurationFile",
            FileType::LogFile => "LogFile",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a CPE encodes into an upload filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFileName {
    pub file_type: FileType,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub oui: String,
    pub product_class: String,
    pub serial_number: String,
}

// A20230627.2015+0800-2030+0800_000000.65740512A3200006L.xml
static PM_SAME_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"A(\d{8})\.(\d{4})([+-]\d{4})-(\d{4})([+-]\d{4})_(\S+)\.(\S+)\.xml")
        .expect("pattern compiles")
});
// A20230630.2345+0800-20230701.0000+0800_000000.65740512A3200006L.xml
static PM_ACROSS_MIDNIGHT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"A(\d{8})\.(\d{4})([+-]\d{4})-(\d{8})\.(\d{4})([+-]\d{4})_(\S+)\.(\S+)\.xml")
        .expect("pattern compiles")
});
// nrm_000000.65740512A3200006L.xml
static NRM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"nrm_(\S+)\.(\S+)\.xml").expect("pattern compiles"));
static CONFIGURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\S+)\.(\S+)\.(\S+)_ConfigurationFile_(\d{14})").expect("pattern compiles")
});
static LOG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+)\.(\S+)\.(\S+)_LogFile_(\d{14})").expect("pattern compiles"));

fn parse_pm_time(date: &str, clock: &str, zone: &str) -> Result<OffsetDateTime, PmError> {
    let layout = format_description!(
        "[year][month][day][hour][minute][second][offset_hour sign:mandatory][offset_minute]"
    );
    OffsetDateTime::parse(&format!("{date}{clock}00{zone}"), layout)
        .map(|t| t.to_offset(time::UtcOffset::UTC))
        .map_err(|_| PmError::InvalidFilename)
}

fn parse_stamp(stamp: &str) -> Result<OffsetDateTime, PmError> {
    let layout = format_description!("[year][month][day][hour][minute][second]");
    PrimitiveDateTime::parse(stamp, layout)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|_| PmError::InvalidFilename)
}

/// Parses an upload filename into its file type, measurement window and
/// device identity. Five shapes are recognized: PM files within one day, PM
/// files spanning midnight, NRM exports, configuration snapshots and log
/// archives. Anything else is an [`PmError::InvalidFilename`].
pub fn parse_file_name(filename: &str) -> Result<ParsedFileName, PmError> {
    let filename = filename.rsplit('/').next().unwrap_or(filename);
    let now = OffsetDateTime::now_utc();

    if let Some(captures) = PM_SAME_DAY.captures(filename) {
        let date = &captures[1];
        return Ok(ParsedFileName {
            file_type: FileType::PmFile,
            start_time: parse_pm_time(date, &captures[2], &captures[3])?,
            end_time: parse_pm_time(date, &captures[4], &captures[5])?,
            oui: captures[6].to_owned(),
            product_class: String::new(),
            serial_number: captures[7].to_owned(),
        });
    }

    if let Some(captures) = PM_ACROSS_MIDNIGHT.captures(filename) {
        return Ok(ParsedFileName {
            file_type: FileType::PmFile,
            start_time: parse_pm_time(&captures[1], &captures[2], &captures[3])?,
            end_time: parse_pm_time(&captures[4], &captures[5], &captures[6])?,
            oui: captures[7].to_owned(),
            product_class: String::new(),
            serial_number: captures[8].to_owned(),
        });
    }

    if let Some(captures) = NRM.captures(filename) {
        return Ok(ParsedFileName {
            file_type: FileType::NrmFile,
            start_time: now,
            end_time: now,
            oui: captures[1].to_owned(),
            product_class: String::new(),
            serial_number: captures[2].to_owned(),
        });
    }

    if let Some(captures) = CONFIGURATION.captures(filename) {
        let stamp = parse_stamp(&captures[4])?;
        return Ok(ParsedFileName {
            file_type: FileType::ConfigurationFile,
            start_time: stamp,
            end_time: stamp,
            oui: captures[1].to_owned(),
            product_class: captures[2].to_owned(),
            serial_number: captures[3].to_owned(),
        });
    }

    if let Some(captures) = LOG.captures(filename) {
        let stamp = parse_stamp(&captures[4])?;
        return Ok(ParsedFileName {
            file_type: FileType::LogFile,
            start_time: stamp,
            end_time: stamp,
            oui: captures[1].to_owned(),
            product_class: captures[2].to_owned(),
            serial_number: captures[3].to_owned(),
        });
    }

    Err(PmError::InvalidFilename)
}
