//! CLI command implementations.
//!
//! Commands that talk to a live process are generic over
//! [`ProcessMemory`](wotw_core::ProcessMemory); attaching is done by the caller.

pub mod check;
pub mod hex_utils;
pub mod lookup;
pub mod pointers;
pub mod scan;
pub mod watch;

use std::path::Path;

use anyhow::{Context, Result};
use wotw_core::{PointerDefinitionSet, builtin_definitions, load_definitions};

/// Definitions from `path`, or the built-in set
pub fn load_definition_set(path: Option<&Path>) -> Result<PointerDefinitionSet> {
    match path {
        Some(path) => load_definitions(path)
            .with_context(|| format!("Failed to load definitions from {}", path.display())),
        None => builtin_definitions().context("Built-in definitions are invalid"),
    }
}

#[cfg(target_os = "windows")]
pub use attach::{game_dir, open_process};

#[cfg(target_os = "windows")]
mod attach {
    use std::path::PathBuf;

    use anyhow::Result;
    use tracing::debug;
    use wotw_core::{EngineConfig, ProcessHandle};

    /// Open the game by pid, or by the configured process name
    pub fn open_process(config: &EngineConfig, pid: Option<u32>) -> Result<ProcessHandle> {
        let process = match pid {
            Some(pid) => ProcessHandle::open(pid)?,
            None => ProcessHandle::find_and_open(&config.process_name)?,
        };
        Ok(process)
    }

    /// Install directory of the running game
    pub fn game_dir(process: &ProcessHandle) -> Option<PathBuf> {
        match process.executable_path() {
            Ok(path) => path.parent().map(PathBuf::from),
            Err(e) => {
                debug!("Could not query executable path: {}", e);
                None
            }
        }
    }
}
