//! Resource Sizes
//!
//! Parses human-readable sizes such as `30GB` or `512m` into byte counts.
//! Units are binary multiples and case-insensitive; the trailing `B` is optional.

use crate::error::{Error, Result};

const KB: u64 = 1024;
const MB: u64 = 1024 * KB;
const GB: u64 = 1024 * MB;
const TB: u64 = 1024 * GB;

/// Units from largest to smallest, used by [`format_size`]
const UNITS: &[(&str, u64)] = &[("TB", TB), ("GB", GB), ("MB", MB), ("KB", KB)];

fn multiplier(unit: &str) -> Option<u64> {
    match unit.to_ascii_uppercase().as_str() {
        "B" => Some(1),
        "K" | "KB" => Some(KB),
        "M" | "MB" => Some(MB),
        "G" | "GB" => Some(GB),
        "T" | "TB" => Some(TB),
        _ => None,
    }
}

/// Parse a `<number><unit>` string into bytes
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let fail = |reason: &str| Error::Parse {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(fail("expected a whole number followed by a unit"));
    }
    let unit = unit.trim_start();
    if unit.is_empty() {
        return Err(fail("missing unit (expected one of B, KB, MB, GB, TB)"));
    }

    let magnitude: u64 = digits.parse().map_err(|_| fail("number is too large"))?;
    let multiplier = multiplier(unit).ok_or_else(|| fail(&format!("unknown unit '{unit}'")))?;

    magnitude
        .checked_mul(multiplier)
        .ok_or_else(|| fail("size overflows 64 bits"))
}

/// Format bytes using the largest unit that divides them exactly
pub fn format_size(bytes: u64) -> String {
    for (suffix, unit) in UNITS {
        if bytes >= *unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    format!("{}B", bytes)
}
