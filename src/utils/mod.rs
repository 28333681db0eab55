//! Small formatting helpers shared by status rendering and logging.

/// Pretty-print a byte count using binary prefixes, e.g. `1.5 KiB`.
#[must_use]
pub fn pretty_bytes(bytes: u64) -> String {
    const PREFIXES: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < PREFIXES.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.1} {}", PREFIXES[idx])
}

/// Pretty-print a duration in whole seconds as `1d 2h 3m 4s`, omitting
/// zero-valued units. Returns `0s` for a zero duration.
#[must_use]
pub fn pretty_time_delta(seconds: u64) -> String {
    let (days, rem) = (seconds / 86_400, seconds % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, secs) = (rem / 60, rem % 60);

    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m"), (secs, "s")]
        .iter()
        .filter(|(v, _)| *v != 0)
        .map(|(v, unit)| format!("{v}{unit}"))
        .collect();

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_small_values_stay_in_bytes() {
        assert_eq!(pretty_bytes(0), "0.0 B");
        assert_eq!(pretty_bytes(1023), "1023.0 B");
    }

    #[test]
    fn bytes_scale_through_prefixes() {
        assert_eq!(pretty_bytes(1024), "1.0 KiB");
        assert_eq!(pretty_bytes(1536), "1.5 KiB");
        assert_eq!(pretty_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn time_delta_omits_zero_units() {
        assert_eq!(pretty_time_delta(0), "0s");
        assert_eq!(pretty_time_delta(61), "1m 1s");
        assert_eq!(pretty_time_delta(86_400 + 3_600), "1d 1h");
    }
}
