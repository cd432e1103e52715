//! Scan command implementation.

// Only reachable through the Windows attach path
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use anyhow::{Result, bail};
use owo_colors::OwoColorize;
use wotw_core::{MemorySearcher, ProcessMemory, RegionFilter, Signature};

use super::hex_utils::format_hex_address;

/// Preview length printed after a hit
const PREVIEW_BYTES: usize = 32;

pub fn run<P: ProcessMemory>(
    process: &P,
    pattern: &str,
    module: Option<&str>,
    chunk_size: usize,
) -> Result<()> {
    let signature = Signature::parse(pattern)?;
    let filter = region_filter(process, module)?;
    let searcher = MemorySearcher::new(process).with_chunk_size(chunk_size);

    println!("Signature: {} ({} bytes)", signature, signature.len());
    let Some(address) = searcher.find_signature(&signature, &filter) else {
        println!("{}", "No match".yellow());
        return Ok(());
    };

    print!("Match at {}", format_hex_address(address).green());
    if let Some(info) = module.and_then(|name| process.module(name)) {
        print!(" ({}+{:#x})", info.name, address.saturating_sub(info.base_address));
    }
    println!();

    if let Ok(bytes) = process.read_bytes(address, PREVIEW_BYTES) {
        println!("{}", format_bytes(&bytes));
    }
    Ok(())
}

fn region_filter<P: ProcessMemory>(process: &P, module: Option<&str>) -> Result<RegionFilter> {
    match module {
        Some(name) => match process.module(name) {
            Some(info) => Ok(RegionFilter::module_code(&info)),
            None => bail!("Module not loaded: {}", name),
        },
        None => Ok(RegionFilter::any_executable_writable()),
    }
}

fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
