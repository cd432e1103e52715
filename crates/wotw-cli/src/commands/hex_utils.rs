//! Hex address and offset parsing.

use anyhow::{Result, anyhow};

/// Parse a hex address string (with or without 0x prefix).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let digits = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| anyhow!("Invalid hex address '{}': {}", s, e))
}

/// Parse a chain offset: hex with optional 0x prefix and optional leading minus.
pub fn parse_offset(s: &str) -> Result<i64> {
    let trimmed = s.trim();
    let (negative, magnitude) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };
    let value = parse_hex_address(magnitude)?;
    let value = i64::try_from(value).map_err(|_| anyhow!("Offset out of range: {}", s))?;
    Ok(if negative { -value } else { value })
}

/// Format a chain offset as signed hex (`0x10`, `-0x4`).
pub fn format_offset(offset: i64) -> String {
    if offset < 0 {
        format!("-{:#x}", offset.unsigned_abs())
    } else {
        format!("{:#x}", offset)
    }
}

/// Format an address as a hex string with 0x prefix.
pub fn format_hex_address(addr: u64) -> String {
    format!("0x{:X}", addr)
}
