use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Collects `Name: value` lines into a map keyed by lower-case name.
///
/// The block ends at the first empty line or the first line without a colon.
/// A repeated header keeps its last value.
pub fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let Some((name, value)) = line.split_once(':') else {
            tracing::trace!("Header block ended by line without colon: '{}'", line);
            break;
        };

        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            tracing::trace!("Skipping header without name: '{}'", line);
            continue;
        }

        headers.insert(name, value.trim().to_string());
    }

    headers
}

/// Extracts the `max-age` directive of a `Cache-Control` value.
///
/// Returns `None` if the directive is absent, unparseable or zero.
pub(super) fn parse_max_age(value: &str) -> Option<u32> {
    let lower = value.to_ascii_lowercase();
    let idx = lower.find("max-age")?;

    let digits: String = lower[idx + "max-age".len()..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    match digits.parse::<u32>() {
        Ok(0) => None,
        Ok(age) => Some(age),
        Err(_) => {
            tracing::trace!("Could not parse max-age from Cache-Control: '{}'", value);
            None
        }
    }
}

/// Parses an RFC 1123 `Expires` date.
pub(super) fn parse_expires(value: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc2822(value.trim()) {
        Ok(v) => Some(v.with_timezone(&Utc)),
        Err(err) => {
            tracing::debug!("Ignoring malformed Expires header '{}': {}", value, err);
            None
        }
    }
}
