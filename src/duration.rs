//! Human-readable durations for command-line options.

use std::time::Duration;

/// Parse a duration such as `500ms`, `3s`, `1m` or `2h`.
///
/// A bare number is read as seconds. `ms` is checked before `m` and `s` so
/// that milliseconds are not mistaken for minutes.
///
/// # Examples
/// ```
/// use gps_telemetry_relay::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();
    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let units: [(&str, &str, fn(u64) -> Duration); 4] = [
        ("ms", "milliseconds", Duration::from_millis),
        ("h", "hours", |n| Duration::from_secs(n.saturating_mul(3600))),
        ("m", "minutes", |n| Duration::from_secs(n.saturating_mul(60))),
        ("s", "seconds", Duration::from_secs),
    ];

    for (suffix, unit, build) in units {
        if let Some(num) = src.strip_suffix(suffix) {
            let value: u64 = num
                .trim()
                .parse()
                .map_err(|_| format!("invalid {unit}: {num}"))?;
            return Ok(build(value));
        }
    }

    src.parse()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid duration: {src}"))
}
