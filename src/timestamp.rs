//! Event timestamp parsing and display

use chrono::{DateTime, NaiveDateTime, Timelike};

/// Accepted `ts` layouts, tried in order. `%.f` takes 1 to 9 fractional
/// digits, so millisecond and microsecond stamps share a pattern.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Parsed event time.
///
/// An unparseable or missing timestamp is an *invalid* time. Invalid times
/// compare equal to each other and sort before every valid time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventTime(Option<NaiveDateTime>);

impl EventTime {
    /// The invalid time
    pub const INVALID: EventTime = EventTime(None);

    /// Parse a `ts` field value
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        if text.is_empty() {
            return Self::INVALID;
        }

        for format in TIMESTAMP_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
                return Self(Some(dt));
            }
        }

        // Stamps carrying an offset keep their local wall-clock time
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Self(Some(dt.naive_local()));
        }

        Self::INVALID
    }

    pub fn is_valid(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        self.0
    }

    /// Whether sub-millisecond precision is present
    pub fn has_micros(&self) -> bool {
        self.0
            .map(|dt| dt.nanosecond() % 1_000_000 != 0)
            .unwrap_or(false)
    }

    /// `MM/dd/yyyy - hh:mm:ss.zzz`, or empty when invalid
    pub fn to_date_time_string(&self) -> String {
        self.format_with("%m/%d/%Y - %H:%M:%S")
    }

    /// `hh:mm:ss.zzz`, or empty when invalid
    pub fn to_time_string(&self) -> String {
        self.format_with("%H:%M:%S")
    }

    /// ISO form used for matching and export
    pub fn to_iso_string(&self) -> String {
        self.format_with("%Y-%m-%dT%H:%M:%S")
    }

    fn format_with(&self, base: &str) -> String {
        match self.0 {
            Some(dt) => {
                let fraction = if self.has_micros() { "%.6f" } else { "%.3f" };
                dt.format(&format!("{}{}", base, fraction)).to_string()
            }
            None => String::new(),
        }
    }

    /// Signed `HH:MM:SS.mmm` distance from `base`, or empty when invalid
    pub fn delta_string(&self, base: NaiveDateTime) -> String {
        let Some(dt) = self.0 else {
            return String::new();
        };

        let msecs = (dt - base).num_milliseconds();
        let sign = if msecs < 0 { "-" } else { "" };
        let msecs = msecs.unsigned_abs();

        let hours = msecs / 3_600_000;
        let minutes = (msecs / 60_000) % 60;
        let seconds = (msecs / 1_000) % 60;
        let millis = msecs % 1_000;

        format!(
            "{}{:02}:{:02}:{:02}.{:03}",
            sign, hours, minutes, seconds, millis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_formats() {
        assert!(EventTime::parse("2024-01-15T10:30:45.123").is_valid());
        assert!(EventTime::parse("2024-01-15T10:30:45.123456").is_valid());
        assert!(EventTime::parse("2024-01-15T10:30:45").is_valid());
        assert!(EventTime::parse("2024-01-15 10:30:45.5").is_valid());
        assert!(EventTime::parse("2024-01-15T10:30:45Z").is_valid());
        assert!(!EventTime::parse("").is_valid());
        assert!(!EventTime::parse("yesterday").is_valid());
    }

    #[test]
    fn test_microsecond_ordering() {
        let a = EventTime::parse("2024-01-15T10:30:45.123001");
        let b = EventTime::parse("2024-01-15T10:30:45.123002");
        assert!(a < b);
        assert!(a.has_micros());
        assert_eq!(a.to_time_string(), "10:30:45.123001");
    }

    #[test]
    fn test_invalid_sorts_first() {
        let valid = EventTime::parse("2000-01-01T00:00:00.000");
        assert!(EventTime::INVALID < valid);
        assert_eq!(EventTime::INVALID, EventTime::parse("garbage"));
    }

    #[test]
    fn test_display_strings() {
        let t = EventTime::parse("2024-03-05T07:08:09.010");
        assert_eq!(t.to_date_time_string(), "03/05/2024 - 07:08:09.010");
        assert_eq!(t.to_time_string(), "07:08:09.010");
        assert_eq!(EventTime::INVALID.to_time_string(), "");
    }

    #[test]
    fn test_delta_string() {
        let base = EventTime::parse("2024-01-01T10:00:00.000")
            .as_datetime()
            .unwrap();
        let later = EventTime::parse("2024-01-01T11:02:03.004");
        let earlier = EventTime::parse("2024-01-01T09:59:59.500");
        assert_eq!(later.delta_string(base), "01:02:03.004");
        assert_eq!(earlier.delta_string(base), "-00:00:00.500");
    }
}
