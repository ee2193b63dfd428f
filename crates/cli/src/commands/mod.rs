//! Command implementations

pub mod ponds;
pub mod series;
pub mod service;

use anyhow::{bail, Context, Result};
use chrono::Duration;

/// Parse a look-back window such as `30m`, `24h` or `7d`
pub fn parse_window(window: &str) -> Result<Duration> {
    let window = window.trim();
    if window.len() < 2 {
        bail!("Invalid window '{}', expected e.g. 30m, 24h or 7d", window);
    }
    let (amount, unit) = window.split_at(window.len() - 1);
    let amount: i64 = amount
        .parse()
        .with_context(|| format!("Invalid window amount in '{}'", window))?;
    if amount <= 0 {
        bail!("Window must be positive, got '{}'", window);
    }

    match unit {
        "m" => Ok(Duration::minutes(amount)),
        "h" => Ok(Duration::hours(amount)),
        "d" => Ok(Duration::days(amount)),
        "w" => Ok(Duration::weeks(amount)),
        _ => bail!("Unknown window unit in '{}', use m, h, d or w", window),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_window_units() {
        assert_eq!(parse_window("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_window("24h").unwrap(), Duration::hours(24));
        assert_eq!(parse_window(" 7d ").unwrap(), Duration::days(7));
        assert_eq!(parse_window("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn test_parse_window_rejects_garbage() {
        assert!(parse_window("").is_err());
        assert!(parse_window("h").is_err());
        assert!(parse_window("10y").is_err());
        assert!(parse_window("-3h").is_err());
        assert!(parse_window("0d").is_err());
        assert!(parse_window("abch").is_err());
    }
}
