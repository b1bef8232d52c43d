use time::{OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339, macros::format_description};

/// Strips the illegal codepoint U+0010 that some CPE firmware embeds in
/// SOAP payloads, replacing it with a space. Bytes that are not valid UTF-8
/// are dropped; every other codepoint passes through untouched.
pub fn clean_xml(data: &[u8]) -> Vec<u8> {
    String::from_utf8_lossy(data)
        .chars()
        .filter_map(|c| match c {
            '\u{10}' => Some(' '),
            '\u{FFFD}' => None,
            c => Some(c),
        })
        .collect::<String>()
        .into_bytes()
}

/// Parses a CWMP timestamp. CPEs send `CurrentTime` and transfer times in
/// several shapes: naive (`2023-06-27T20:15:00`), suffixed with `Z`, with
/// a full RFC 3339 offset, or with a space and a zone abbreviation
/// (`2023-06-27T20:15:00 UTC`). Naive and abbreviation-suffixed times are
/// taken as UTC; zone abbreviations carry no resolvable offset.
pub fn parse_time(value: &str) -> Option<OffsetDateTime> {
    let plain = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

    if let Ok(t) = PrimitiveDateTime::parse(value, plain) {
        return Some(t.assume_utc());
    }
    if let Ok(t) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(t);
    }

    let (stamp, zone) = value.rsplit_once(' ')?;
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    PrimitiveDateTime::parse(stamp, plain)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// Like [`parse_time`] but never fails; unparseable input maps to the Unix
/// epoch so callers that only log or key on the value can proceed.
pub fn parse_time_or_epoch(value: &str) -> OffsetDateTime {
    parse_time(value).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Formats a timestamp the way CWMP messages carry them.
pub fn format_time(value: OffsetDateTime) -> String {
    let plain = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");
    value.format(plain).unwrap_or_default()
}
