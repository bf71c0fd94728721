//! Time-related utilities

use chrono::{SecondsFormat, Utc};

/// Current UTC time as RFC 3339 with microsecond precision, the format
/// kernels expect in message headers
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_timestamp_format() {
        let stamp = now_rfc3339();

        // e.g. 2026-10-18T09:15:42.123456Z
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2026-10-18T09:15:42.123456Z".len());
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }
}
