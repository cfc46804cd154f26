//! Provides formatting helpers for durations and sizes as reported in log messages.
use std::fmt::Write;
use std::time::Duration;

/// Formats a short duration like the runtime of a request.
///
/// This determines the ideal unit (ranging from microseconds to seconds) to provide a concise
/// representation with at most three significant digits.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use rods::fmt::format_short_duration;
/// assert_eq!(format_short_duration(Duration::from_micros(100)), "100 us");
/// assert_eq!(format_short_duration(Duration::from_micros(8_192)), "8.19 ms");
/// assert_eq!(format_short_duration(Duration::from_micros(32_768)), "32.8 ms");
/// assert_eq!(format_short_duration(Duration::from_micros(128_123)), "128 ms");
/// assert_eq!(format_short_duration(Duration::from_micros(1_128_123)), "1.13 s");
/// assert_eq!(format_short_duration(Duration::from_micros(10_128_123)), "10.1 s");
/// assert_eq!(format_short_duration(Duration::from_secs(101)), "101 s");
/// ```
pub fn format_short_duration(duration: Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1_000 {
        format!("{} us", micros)
    } else if micros < 1_000_000 {
        format!("{} ms", three_digits(duration.as_secs_f64() * 1_000.))
    } else {
        format!("{} s", three_digits(duration.as_secs_f64()))
    }
}

fn three_digits(value: f64) -> String {
    if value < 10. {
        format!("{:.2}", value)
    } else if value < 100. {
        format!("{:.1}", value)
    } else {
        format!("{:.0}", value.trunc())
    }
}

/// Formats a given size in bytes.
///
/// This function determines the ideal unit (ranging from bytes to petabytes) to provide
/// a concise representation.
///
/// # Examples
///
/// ```
/// # use rods::fmt::format_size;
/// assert_eq!(format_size(0), "0 bytes");
/// assert_eq!(format_size(1), "1 byte");
/// assert_eq!(format_size(100), "100 bytes");
/// assert_eq!(format_size(8_734), "8.53 KiB");
/// assert_eq!(format_size(87_340), "85.3 KiB");
/// assert_eq!(format_size(873_400), "853 KiB");
/// assert_eq!(format_size(8_734_000), "8.33 MiB");
/// assert_eq!(format_size(8_734_000_000), "8.13 GiB");
/// assert_eq!(format_size(8_734_000_000_000), "7.94 TiB");
/// assert_eq!(format_size(8_734_000_000_000_000), "7.76 PiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    if size_in_bytes == 1 {
        return "1 byte".to_owned();
    } else if size_in_bytes < 1024 {
        return format!("{} bytes", size_in_bytes);
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size > 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size <= 10. {
        format!("{:.2} {}", size, UNITS[unit])
    } else if size <= 100. {
        format!("{:.1} {}", size, UNITS[unit])
    } else {
        format!("{:.0} {}", size, UNITS[unit])
    }
}

/// Formats a duration into a string like "5d 3h 17m 2s 12ms".
///
/// This is used for longer running tasks like building an index. For the runtime of requests,
/// [format_short_duration](format_short_duration) is better suited.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// # use rods::fmt::format_duration;
/// assert_eq!(format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(format_duration(Duration::from_millis(1013)), "1s 13ms");
/// assert_eq!(format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(format_duration(Duration::from_secs(60 * 61)), "1h 1m");
/// assert_eq!(format_duration(Duration::from_secs(24 * 60 * 60 + 60 * 60 + 59)), "1d 1h 59s");
/// assert_eq!(format_duration(Duration::from_micros(12)), "0ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (1000 * 60 * 60 * 24, "d"),
        (1000 * 60 * 60, "h"),
        (1000 * 60, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut result = String::new();
    let mut value = duration.as_millis();
    for (millis, unit) in UNITS.iter() {
        let amount = value / millis;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, unit);
            value %= millis;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
