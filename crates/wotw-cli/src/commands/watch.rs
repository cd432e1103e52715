//! Watch command implementation.
//!
//! Polls the selected pointers and prints a line whenever an address (or the
//! value at the end of an offset chain) changes.

// The polling loop is only reachable through the Windows attach path
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use owo_colors::OwoColorize;
use tracing::info;
use wotw_core::{Engine, ProcessMemory};

use super::hex_utils::{format_hex_address, format_offset, parse_offset};
use crate::shutdown::ShutdownSignal;

/// `Name` or `Name:off,off,...`; with offsets the u64 at the end of the chain
/// is watched as well.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub name: String,
    pub offsets: Vec<i64>,
}

impl FromStr for WatchTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, chain) = match s.split_once(':') {
            Some((name, chain)) => (name.trim(), Some(chain)),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            return Err(anyhow!("Missing pointer name in '{}'", s));
        }
        let offsets = match chain {
            Some(chain) => chain
                .split(',')
                .map(parse_offset)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            name: name.to_string(),
            offsets,
        })
    }
}

impl WatchTarget {
    fn label(&self) -> String {
        if self.offsets.is_empty() {
            return self.name.clone();
        }
        let chain: Vec<String> = self.offsets.iter().copied().map(format_offset).collect();
        format!("{}:{}", self.name, chain.join(","))
    }
}

/// Observed state of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    address: u64,
    value: Option<u64>,
}

fn sample<P: ProcessMemory>(engine: &mut Engine, process: &P, target: &WatchTarget) -> Sample {
    let address = engine.resolve(process, &target.name);
    let value = (address != 0 && !target.offsets.is_empty())
        .then(|| engine.read::<u64, _>(process, &target.name, &target.offsets));
    Sample { address, value }
}

fn describe(target: &WatchTarget, sample: Sample) -> String {
    let address = match sample.address {
        0 => "unresolved".yellow().to_string(),
        address => format_hex_address(address).green().to_string(),
    };
    match sample.value {
        Some(value) => format!("{} = {} @ {}", target.label(), value, address),
        None => format!("{} @ {}", target.label(), address),
    }
}

/// Store `current` and describe it when it differs from the last sample
fn record_change(
    last: &mut HashMap<usize, Sample>,
    index: usize,
    target: &WatchTarget,
    current: Sample,
) -> Option<String> {
    if last.insert(index, current) == Some(current) {
        return None;
    }
    Some(describe(target, current))
}

/// Poll until the process exits or shutdown is requested
pub fn run<P: ProcessMemory>(
    engine: &mut Engine,
    process: &P,
    targets: &[WatchTarget],
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let poll_interval = engine.config().poll_interval();
    // Keyed by position: one pointer may be watched through several chains
    let mut last: HashMap<usize, Sample> = HashMap::new();

    info!("Watching {} pointers", targets.len());
    while process.is_alive() {
        for (index, target) in targets.iter().enumerate() {
            let current = sample(engine, process, target);
            if let Some(line) = record_change(&mut last, index, target, current) {
                println!("{}", line);
            }
        }
        if shutdown.wait(poll_interval) {
            break;
        }
    }
    Ok(())
}

/// Every definition, or the requested subset
pub fn select_targets(engine: &Engine, requested: &[String]) -> Result<Vec<WatchTarget>> {
    if requested.is_empty() {
        return Ok(engine
            .pointer_names()
            .map(|name| WatchTarget {
                name: name.to_string(),
                offsets: Vec::new(),
            })
            .collect());
    }

    requested
        .iter()
        .map(|raw| {
            let target: WatchTarget = raw.parse()?;
            if !engine
                .pointer_names()
                .any(|name| name.eq_ignore_ascii_case(&target.name))
            {
                return Err(anyhow!("Unknown pointer: {}", target.name));
            }
            Ok(target)
        })
        .collect()
}

#[cfg(target_os = "windows")]
pub use attached::run_attached;

#[cfg(target_os = "windows")]
mod attached {
    use std::time::Duration;

    use anyhow::Result;
    use tracing::{info, warn};
    use wotw_core::memory::layout::timing::ATTACH_RETRY_MS;
    use wotw_core::{Engine, ProcessMemory};

    use super::WatchTarget;
    use crate::commands::{game_dir, open_process};
    use crate::shutdown::ShutdownSignal;

    /// Wait for the game, watch it, and start over when it exits
    pub fn run_attached(
        engine: &mut Engine,
        pid: Option<u32>,
        targets: &[WatchTarget],
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        info!("Waiting for {}...", engine.config().process_name);
        while !shutdown.is_shutdown() {
            if let Ok(process) = open_process(engine.config(), pid) {
                info!(
                    "Attached to {} (pid {})",
                    engine.config().process_name,
                    process.pid()
                );
                match game_dir(&process) {
                    Some(dir) => {
                        engine.initialize_il2cpp(&dir);
                    }
                    None => warn!("Game directory unknown, RVA finders disabled"),
                }

                super::run(engine, &process, targets, shutdown)?;
                engine.detach();
                info!("Process exited, waiting for restart...");
            }

            if shutdown.wait(Duration::from_millis(ATTACH_RETRY_MS)) {
                break;
            }
        }
        Ok(())
    }
}
