#![forbid(unsafe_code)]

//! Human readable byte counts for format listings.

const UNIT_STEP: f64 = 1024.0;
const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Formats `bytes` with two decimals, e.g. `12.34 MB`.
pub fn format_bytes(bytes: u64) -> String {
    format_bytes_with_precision(bytes, 2)
}

/// Formats `bytes` using binary (1024) steps. Trailing zeros are dropped so
/// `1536` renders as `1.5 KB` and `1024` as `1 KB`. Values past the largest
/// unit stay in terabytes.
pub fn format_bytes_with_precision(bytes: u64, decimals: usize) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= UNIT_STEP && unit < UNITS.len() - 1 {
        value /= UNIT_STEP;
        unit += 1;
    }

    // Ties round away from zero: 1152 bytes is 1.125 KB and shows as 1.13.
    let scale = 10f64.powi(decimals as i32);
    let value = (value * scale).round() / scale;
    let rendered = format!("{value:.decimals$}");
    let trimmed = if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.')
    } else {
        rendered.as_str()
    };
    format!("{trimmed} {}", UNITS[unit])
}
