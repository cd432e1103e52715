//! Pointers command implementation.

// Only reachable through the Windows attach path
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use anyhow::Result;
use owo_colors::OwoColorize;
use wotw_core::{Engine, PointerSummary, ProcessMemory};

use super::hex_utils::format_hex_address;

/// Resolve every pointer once and print the outcome
pub fn run<P: ProcessMemory>(engine: &mut Engine, process: &P, json: bool) -> Result<()> {
    let names: Vec<String> = engine.pointer_names().map(str::to_string).collect();
    for name in &names {
        engine.resolve(process, name);
    }

    let summary = engine.pointer_summary();
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for line in render(&summary) {
            println!("{}", line);
        }
    }
    Ok(())
}

/// Table rows, names padded to the longest one
pub fn render(summary: &[PointerSummary]) -> Vec<String> {
    let width = summary.iter().map(|s| s.name.len()).max().unwrap_or(0);
    summary
        .iter()
        .map(|entry| {
            let status = if entry.is_resolved() {
                format!(
                    "{} ({})",
                    format_hex_address(entry.address).green(),
                    entry.finder.unwrap_or("?")
                )
            } else {
                "unresolved".yellow().to_string()
            };
            format!("{:<width$}  {}", entry.name, status, width = width)
        })
        .collect()
}
