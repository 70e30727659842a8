//! Small helpers shared by the config layer and the binary.

use crate::errors::ConfigError;

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable byte count with two decimals, e.g. `4.00 MB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Parse a byte count with an optional `KB`/`MB`/`GB`/`TB` suffix (binary units,
/// case-insensitive, whitespace allowed between number and suffix).
pub fn parse_size(s: &str) -> Result<u64, ConfigError> {
    let trimmed = s.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    let number: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidSize(s.to_string()))?;
    let suffix = suffix.trim().to_ascii_uppercase();
    let shift = match suffix.as_str() {
        "" | "B" => 0,
        "K" | "KB" => 10,
        "M" | "MB" => 20,
        "G" | "GB" => 30,
        "T" | "TB" => 40,
        _ => return Err(ConfigError::InvalidSize(s.to_string())),
    };
    number
        .checked_mul(1u64 << shift)
        .ok_or_else(|| ConfigError::InvalidSize(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_accepts_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("20MB").unwrap(), 20 * 1024 * 1024);
        assert_eq!(parse_size(" 3 kb ").unwrap(), 3 * 1024);
        assert_eq!(parse_size("1T").unwrap(), 1u64 << 40);
    }

    #[test]
    fn parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("MB").is_err());
        assert!(parse_size("10 parsecs").is_err());
        assert!(parse_size("99999999999TB").is_err());
    }

    #[test]
    fn format_bytes_picks_unit() {
        assert_eq!(format_bytes(10), "10 B");
        assert_eq!(format_bytes(4 * 1024 * 1024), "4.00 MB");
        assert_eq!(format_bytes(1536), "1.50 KB");
    }
}
