const UNITS: [&str; 9] = ["B", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

/// Human-readable byte count with two decimals, `N/A` when unknown
pub fn format_bytes(bytes: Option<u64>) -> String {
    let Some(bytes) = bytes else {
        return "N/A".to_string();
    };
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut power = 0;
    let mut rest = bytes;
    while rest >= 1024 && power < UNITS.len() - 1 {
        rest /= 1024;
        power += 1;
    }

    format!("{:.2} {}", bytes as f64 / 1024f64.powi(power as i32), UNITS[power])
}
