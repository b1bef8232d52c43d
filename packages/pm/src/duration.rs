use std::{sync::LazyLock, time::Duration};

use regex::Regex;

use crate::PmError;

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(\d+Y)?(\d+M)?(\d+D)?(T(\d+H)?(\d+M)?(\d+(\.\d+)?S)?)?$")
        .expect("pattern compiles")
});

fn part(captures: &regex::Captures<'_>, index: usize) -> f64 {
    captures
        .get(index)
        .and_then(|m| {
            let s = m.as_str();
            s[..s.len() - 1].parse::<f64>().ok()
        })
        .unwrap_or(0.0)
}

/// Parses an ISO 8601 duration (`P[nY][nM][nD][T[nH][nM][nS]]`) as found
/// in `granPeriod`/`repPeriod` attributes.
///
/// Calendar components are approximated: a year counts as 365.25 days and
/// a month as 30 days, which is fine for the reporting periods these files
/// actually carry (minutes to hours).
pub fn parse_duration(value: &str) -> Result<Duration, PmError> {
    let captures = DURATION.captures(value).ok_or(PmError::InvalidDuration)?;

    let years = part(&captures, 1);
    let months = part(&captures, 2);
    let days = part(&captures, 3);
    let hours = part(&captures, 5);
    let minutes = part(&captures, 6);
    let seconds = part(&captures, 7);

    let total = years * 365.25 * 24.0 * 3600.0
        + months * 30.0 * 24.0 * 3600.0
        + days * 24.0 * 3600.0
        + hours * 3600.0
        + minutes * 60.0
        + seconds;

    Ok(Duration::from_secs(total as u64))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_components() {
        assert_eq!(parse_duration("PT900S").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("PT15M").unwrap(), Duration::from_secs(900));
        assert_eq!(
            parse_duration("PT1H30M").unwrap(),
            Duration::from_secs(5400)
        );
        assert_eq!(
            parse_duration("P1DT1S").unwrap(),
            Duration::from_secs(86_401)
        );
    }

    #[test]
    fn calendar_components_are_approximate() {
        assert_eq!(
            parse_duration("P1M").unwrap(),
            Duration::from_secs(30 * 24 * 3600)
        );
        assert_eq!(
            parse_duration("P1Y").unwrap(),
            Duration::from_secs((365.25f64 * 24.0 * 3600.0) as u64)
        );
    }

    #[test]
    fn fractional_seconds_truncate() {
        assert_eq!(parse_duration("PT0.5S").unwrap(), Duration::from_secs(0));
    }

    #[test]
    fn invalid_shapes() {
        assert!(parse_duration("15 minutes").is_err());
        assert!(parse_duration("T15M").is_err());
        assert!(parse_duration("").is_err());
    }
}
