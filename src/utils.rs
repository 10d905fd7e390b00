//! Utility functions for configuration parsing

use crate::errors::{Result, RunnerError};
use std::time::Duration;

/// Parse memory size string (e.g., "512M", "1G")
pub fn parse_memory_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();

    let (num_str, multiplier) = if let Some(num) = s.strip_suffix('G') {
        (num, 1024u64 * 1024 * 1024)
    } else if let Some(num) = s.strip_suffix('M') {
        (num, 1024u64 * 1024)
    } else if let Some(num) = s.strip_suffix('K') {
        (num, 1024u64)
    } else if let Some(num) = s.strip_suffix('B') {
        (num, 1u64)
    } else {
        (s.as_str(), 1u64)
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| RunnerError::InvalidConfig(format!("Invalid memory size: {}", s)))?;

    num.checked_mul(multiplier)
        .ok_or_else(|| RunnerError::InvalidConfig(format!("Memory size overflow: {}", s)))
}

/// Render a byte count the way container runtimes accept it ("512m", "2g").
pub fn format_memory_size(bytes: u64) -> String {
    const GIB: u64 = 1024 * 1024 * 1024;
    const MIB: u64 = 1024 * 1024;
    const KIB: u64 = 1024;

    if bytes >= GIB && bytes % GIB == 0 {
        format!("{}g", bytes / GIB)
    } else if bytes >= MIB && bytes % MIB == 0 {
        format!("{}m", bytes / MIB)
    } else if bytes >= KIB && bytes % KIB == 0 {
        format!("{}k", bytes / KIB)
    } else {
        format!("{}b", bytes)
    }
}

/// Parse a millisecond count into a duration
pub fn parse_millis(s: &str) -> Result<Duration> {
    s.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| RunnerError::InvalidConfig(format!("Invalid milliseconds value: {}", s)))
}

/// Parse a second count into a duration
pub fn parse_secs(s: &str) -> Result<Duration> {
    s.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| RunnerError::InvalidConfig(format!("Invalid seconds value: {}", s)))
}
