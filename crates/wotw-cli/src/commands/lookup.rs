//! Offline IL2CPP lookups (`rva` and `field` commands).

use std::path::Path;

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use wotw_core::Il2CppTables;

use super::hex_utils::format_hex_address;

fn load_tables(game_dir: &Path, product: &str) -> Result<Il2CppTables> {
    Il2CppTables::load(game_dir, product)
        .with_context(|| format!("Failed to load IL2CPP files from {}", game_dir.display()))
}

pub fn run_rva(game_dir: &Path, product: &str, names: &[String]) -> Result<()> {
    let tables = load_tables(game_dir, product)?;
    for name in names {
        println!("{}", format_rva(name, tables.resolve_rva(name)));
    }
    Ok(())
}

pub fn run_field(game_dir: &Path, product: &str, names: &[String]) -> Result<()> {
    let tables = load_tables(game_dir, product)?;
    for name in names {
        println!("{}", format_field(name, tables.resolve_field_offset(name)));
    }
    Ok(())
}

fn format_rva(name: &str, rva: u64) -> String {
    match rva {
        0 => format!("{}  {}", name, "not found".red()),
        rva => format!("{}  {}", name, format_hex_address(rva)),
    }
}

fn format_field(name: &str, offset: Option<i32>) -> String {
    match offset {
        Some(offset) => format!("{}  {:#x}", name, offset),
        None => format!("{}  {}", name, "not found".red()),
    }
}
