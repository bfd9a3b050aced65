use std::time::Duration;

use time::{OffsetDateTime, UtcOffset, macros::format_description};

/// Format a timestamp in UTC with exactly three fractional digits.
pub fn format_timestamp(value: OffsetDateTime) -> String {
    let value = value.to_offset(UtcOffset::UTC);
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    value.format(format).unwrap_or_else(|_| value.unix_timestamp().to_string())
}

/// Human-readable step duration: whole seconds below one minute, whole minutes above.
pub fn format_step_duration(duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds >= 60.0 {
        format!("{} m", (seconds / 60.0).round() as u64)
    } else {
        format!("{} s", seconds.round() as u64)
    }
}

/// Truncate `value` to at most `max` bytes without splitting a character.
pub fn truncate_bytes(value: &mut String, max: usize) {
    if value.len() <= max {
        return;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value.truncate(end);
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_format_timestamp() {
        let ts = datetime!(2024-03-01 12:30:05.123456789 UTC);
        assert_eq!(format_timestamp(ts), "2024-03-01T12:30:05.123Z");
        assert_eq!(format_timestamp(datetime!(2024-03-01 12:30:05 UTC)), "2024-03-01T12:30:05.000Z");
        assert_eq!(format_timestamp(datetime!(2024-03-01 14:30:05.5 +02:00)), "2024-03-01T12:30:05.500Z");
    }

    #[test]
    fn test_format_step_duration() {
        let cases = [(0.4, "0 s"), (12.6, "13 s"), (59.4, "59 s"), (60.0, "1 m"), (150.0, "3 m")];
        for (secs, expected) in cases {
            assert_eq!(format_step_duration(Duration::from_secs_f64(secs)), expected);
        }
    }

    #[test]
    fn test_truncate_bytes() {
        let mut value = "héllo".to_string();
        truncate_bytes(&mut value, 2);
        assert_eq!(value, "h");
        let mut value = "short".to_string();
        truncate_bytes(&mut value, 64);
        assert_eq!(value, "short");
    }
}
