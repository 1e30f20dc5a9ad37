use std::ascii;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Timestamps are emitted with a fixed nine-digit fractional part so that
/// lexical order over the strings equals chronological order.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// The current time as a lexically-sortable ISO-8601 UTC string.
pub fn now_ts() -> String {
    format_ts(Utc::now())
}

/// The time `after` from now, formatted like [`now_ts`].
pub fn ts_after(after: Duration) -> String {
    let delta = chrono::Duration::from_std(after).unwrap_or(chrono::Duration::MAX);
    let at = Utc::now()
        .checked_add_signed(delta)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    format_ts(at)
}

/// The time `before` ago, formatted like [`now_ts`].
pub fn ts_before(before: Duration) -> String {
    let delta = chrono::Duration::from_std(before).unwrap_or(chrono::Duration::MAX);
    let at = Utc::now()
        .checked_sub_signed(delta)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    format_ts(at)
}

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.format(TS_FORMAT).to_string()
}

/// Parses any RFC-3339 timestamp, not just the fixed-width form we emit:
/// clients are free to send whatever their language's time library produces.
pub fn parse_ts(ts: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(ts).map(|t| t.with_timezone(&Utc))
}

/// Queue names are restricted to a charset that is safe to log and to embed
/// in stats output, and capped at 200 bytes.
pub fn valid_queue_name(name: &str) -> bool {
    fn char_is_name_safe(c: u8, is_first: bool) -> bool {
        match c {
            b'a'..=b'z' => true,
            b'A'..=b'Z' => true,
            b'0'..=b'9' => true,
            b'+' | b'/' | b';' | b'.' | b'$' | b'_' | b'(' | b')' => true,
            b'-' => !is_first, // - is only name safe outside first position
            _ => false,
        }
    }

    !name.is_empty()
        && name.len() <= 200
        && name
            .bytes()
            .enumerate()
            .all(|(i, c)| char_is_name_safe(c, i == 0))
}

pub(crate) fn bytes_to_human_str(input: &[u8]) -> String {
    String::from_utf8(
        input
            .iter()
            .flat_map(|&c| ascii::escape_default(c))
            .collect::<Vec<u8>>(),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_sort_lexically() {
        let a = format_ts(parse_ts("2024-01-01T00:00:00Z").unwrap());
        let b = format_ts(parse_ts("2024-01-01T00:00:01Z").unwrap());
        assert!(a < b);

        // Sub-second boundaries must order correctly too, which is why the
        // fractional part is fixed-width.
        let c = format_ts(parse_ts("2024-01-01T00:00:01.5Z").unwrap());
        let d = format_ts(parse_ts("2024-01-01T00:00:01.25Z").unwrap());
        assert!(b < c);
        assert!(d < c);
    }

    #[test]
    fn test_ts_after_is_in_the_future() {
        let now = now_ts();
        let later = ts_after(Duration::from_secs(60));
        assert!(now < later);
    }

    #[test]
    fn test_parse_ts_accepts_offsets() {
        let t = parse_ts("2024-06-01T12:00:00+02:00").unwrap();
        assert_eq!(format_ts(t), "2024-06-01T10:00:00.000000000Z");
    }

    #[test]
    fn test_valid_queue_name() {
        assert!(valid_queue_name("default"));
        assert!(valid_queue_name("tube_name_here-098+/;.()-"));
        assert!(!valid_queue_name(""));
        assert!(!valid_queue_name("-leading"));
        assert!(!valid_queue_name("has space"));
        assert!(!valid_queue_name(&"a".repeat(201)));
        assert!(valid_queue_name(&"a".repeat(200)));
    }
}
