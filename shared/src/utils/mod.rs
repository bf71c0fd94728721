//! Utility functions and helpers

pub mod time;

use anyhow::{anyhow, Result};
use std::time::Duration;

/// Parse a duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();

    if let Some(num_str) = s.strip_suffix("ms") {
        let millis: u64 = num_str.trim().parse()?;
        Ok(Duration::from_millis(millis))
    } else if let Some(num_str) = s.strip_suffix('s') {
        let secs: u64 = num_str.trim().parse()?;
        Ok(Duration::from_secs(secs))
    } else if let Some(num_str) = s.strip_suffix('m') {
        let mins: u64 = num_str.trim().parse()?;
        scaled_secs(mins, 60)
    } else if let Some(num_str) = s.strip_suffix('h') {
        let hours: u64 = num_str.trim().parse()?;
        scaled_secs(hours, 3600)
    } else {
        // Default to seconds if no suffix
        let secs: u64 = s.parse()?;
        Ok(Duration::from_secs(secs))
    }
}

fn scaled_secs(value: u64, unit: u64) -> Result<Duration> {
    value
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("duration too large"))
}
