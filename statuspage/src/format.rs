//! Human-readable rendering of metric values for the dashboard.

use std::time::Duration;

const UNIT: f64 = 1024.0;
const PREFIXES: [char; 6] = ['K', 'M', 'G', 'T', 'P', 'E'];

/// One decimal place, no unit.
pub fn format_percent(value: f64) -> String {
    format!("{:.1}", value)
}

/// Binary-prefixed byte count: `"512 B"`, `"1.0 KB"`, `"3.4 GB"`.
pub fn format_bytes(bytes: f64) -> String {
    let bytes = if bytes.is_finite() { bytes.max(0.0) } else { 0.0 };
    if bytes < UNIT {
        return format!("{:.0} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < PREFIXES.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}B", bytes / div, PREFIXES[exp])
}

/// Largest two non-zero units among days, hours and minutes.
///
/// `90s -> "1m"`, `3661s -> "1h 1m"`, `90000s -> "1d 1h"`. Anything under a
/// minute renders as `"0m"`.
pub fn format_duration(d: Duration) -> String {
    let total_minutes = d.as_secs() / 60;
    let days = total_minutes / (24 * 60);
    let hours = (total_minutes / 60) % 24;
    let minutes = total_minutes % 60;

    let parts: Vec<String> = [(days, 'd'), (hours, 'h'), (minutes, 'm')]
        .into_iter()
        .filter(|(v, _)| *v > 0)
        .take(2)
        .map(|(v, u)| format!("{v}{u}"))
        .collect();

    if parts.is_empty() {
        "0m".to_string()
    } else {
        parts.join(" ")
    }
}

pub fn format_secs(secs: u64) -> String {
    format_duration(Duration::from_secs(secs))
}
