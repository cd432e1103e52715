//! Check command implementation.
//!
//! Loading a definition set compiles every signature, so a successful load is
//! the validation. The listing shows what each pointer will try, in order.

use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;
use wotw_core::{FinderDefinition, PointerDefinitionSet, save_definitions};

use super::hex_utils::format_offset;
use super::load_definition_set;

pub fn run(definitions: Option<&Path>, export: Option<&Path>) -> Result<()> {
    let set = load_definition_set(definitions)?;

    for line in describe(&set) {
        println!("{}", line);
    }
    println!();
    println!("{} {} pointer definitions", "OK".green(), set.len());

    if let Some(path) = export {
        save_definitions(&set, path)?;
        println!("Exported to {}", path.display());
    }
    Ok(())
}

/// One line per pointer, followed by one indented line per finder
pub fn describe(set: &PointerDefinitionSet) -> Vec<String> {
    let mut lines = Vec::new();
    for definition in &set.pointers {
        match &definition.module {
            Some(module) => lines.push(format!("{} ({})", definition.name, module)),
            None => lines.push(definition.name.clone()),
        }
        for finder in &definition.finders {
            lines.push(format!("  {}", describe_finder(finder)));
        }
    }
    lines
}

fn describe_finder(finder: &FinderDefinition) -> String {
    match finder {
        FinderDefinition::Rva {
            version,
            auto_deref,
            full_name,
            post_offset,
        } => format!(
            "rva [{}] {} {}{} deref={}",
            version,
            full_name,
            if *post_offset < 0 { "" } else { "+" },
            format_offset(*post_offset),
            auto_deref
        ),
        FinderDefinition::Signature {
            version,
            auto_deref,
            signature,
            relative,
        } => format!(
            "signature [{}] {} bytes, relative {:?}, deref={}",
            version,
            signature.len(),
            relative,
            auto_deref
        ),
        FinderDefinition::StaticOffsets {
            version,
            auto_deref,
            offsets,
        } => format!(
            "static-offsets [{}] {:x?} deref={}",
            version, offsets, auto_deref
        ),
    }
}
