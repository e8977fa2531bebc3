use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "500ms", "30s", "10m", "2h" or "1d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("Missing duration unit in '{}'. Use 'ms', 's', 'm', 'h', or 'd'.", s))?;
    let (value_str, unit) = s.split_at(split_at);

    let value = u64::from_str(value_str)
        .map_err(|_| format!("Invalid numeric value in duration: '{}'", value_str))?;

    let millis_per_unit: u64 = match unit {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
                unit
            ))
        }
    };

    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration '{}' is too large", s))
}

/// Formats a duration back into the shortest unit that represents it exactly.
pub fn format_duration(duration: Duration) -> String {
    let ms = duration.as_millis();
    if ms == 0 {
        return "0s".to_string();
    }
    for (unit, size) in [("d", 86_400_000u128), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if ms % size == 0 {
            return format!("{}{}", ms / size, unit);
        }
    }
    format!("{}ms", ms)
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Authorization:Bearer abc,Accept:application/json\,text/plain"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => {
                if !current.trim().is_empty() {
                    headers.push(std::mem::take(&mut current));
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    if !current.trim().is_empty() {
        headers.push(current);
    }

    headers
}

/// Parses a boolean flag the way environment variables are usually written.
pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod duration {
        use super::*;

        #[test]
        fn parse_milliseconds() {
            assert_eq!(
                parse_duration_string("250ms").unwrap(),
                Duration::from_millis(250)
            );
        }

        #[test]
        fn parse_seconds() {
            assert_eq!(
                parse_duration_string("30s").unwrap(),
                Duration::from_secs(30)
            );
        }

        #[test]
        fn parse_minutes_hours_days() {
            assert_eq!(parse_duration_string("10m").unwrap(), Duration::from_secs(600));
            assert_eq!(parse_duration_string("5h").unwrap(), Duration::from_secs(18000));
            assert_eq!(parse_duration_string("3d").unwrap(), Duration::from_secs(259200));
        }

        #[test]
        fn trims_whitespace() {
            assert_eq!(
                parse_duration_string("  1s  ").unwrap(),
                Duration::from_secs(1)
            );
        }

        #[test]
        fn empty_string_errors() {
            let err = parse_duration_string("   ").unwrap_err();
            assert!(err.contains("empty"), "error was: {}", err);
        }

        #[test]
        fn missing_unit_errors() {
            let err = parse_duration_string("10").unwrap_err();
            assert!(err.contains("Missing duration unit"), "error was: {}", err);
        }

        #[test]
        fn unknown_unit_errors() {
            let err = parse_duration_string("10x").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn no_number_errors() {
            let err = parse_duration_string("ms").unwrap_err();
            assert!(err.contains("Invalid numeric"), "error was: {}", err);
        }

        #[test]
        fn fractional_number_errors() {
            let err = parse_duration_string("1.5s").unwrap_err();
            assert!(err.contains("Unknown duration unit"), "error was: {}", err);
        }

        #[test]
        fn overflow_errors() {
            let err = parse_duration_string("18446744073709551615d").unwrap_err();
            assert!(err.contains("too large"), "error was: {}", err);
        }

        #[test]
        fn format_picks_largest_exact_unit() {
            assert_eq!(format_duration(Duration::from_secs(30)), "30s");
            assert_eq!(format_duration(Duration::from_secs(120)), "2m");
            assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
            assert_eq!(format_duration(Duration::ZERO), "0s");
        }
    }

    #[test]
    fn headers_split_on_commas() {
        let result = parse_headers_with_escapes("Authorization:Bearer t,X-Store:default");
        assert_eq!(result, vec!["Authorization:Bearer t", "X-Store:default"]);
    }

    #[test]
    fn headers_keep_escaped_commas() {
        let result = parse_headers_with_escapes("Accept:application/json\\,text/plain,X-A:b");
        assert_eq!(result, vec!["Accept:application/json,text/plain", "X-A:b"]);
    }

    #[test]
    fn headers_skip_empty_segments() {
        let result = parse_headers_with_escapes("X-A:1,, ,X-B:2,");
        assert_eq!(result, vec!["X-A:1", "X-B:2"]);
    }

    #[test]
    fn headers_keep_lone_backslash() {
        let result = parse_headers_with_escapes("X-Path:C:\\tmp");
        assert_eq!(result, vec!["X-Path:C:\\tmp"]);
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag("TRUE"), Some(true));
        assert_eq!(parse_bool_flag("0"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }
}
