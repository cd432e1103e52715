mod cli;
mod commands;
mod config;
mod shutdown;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wotw_core::Engine;

use cli::{Cli, Command};
use config::CliConfig;
use shutdown::ShutdownSignal;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("wotw=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = CliConfig::load(&cli.config)?;
    let definitions_path = cli.definitions.as_deref().or(config.definitions.as_deref());

    match cli.command {
        Command::Check { export } => commands::check::run(definitions_path, export.as_deref()),
        Command::Rva { game_dir, names } => {
            commands::lookup::run_rva(&game_dir, &config.engine.product, &names)
        }
        Command::Field { game_dir, names } => {
            commands::lookup::run_field(&game_dir, &config.engine.product, &names)
        }
        Command::Watch { pointers, pid } => {
            let definitions = commands::load_definition_set(definitions_path)?;
            let mut engine = Engine::new(config.engine.clone(), &definitions);
            let targets = commands::watch::select_targets(&engine, &pointers)?;

            let shutdown = Arc::new(ShutdownSignal::new());
            let handler_signal = Arc::clone(&shutdown);
            ctrlc::set_handler(move || {
                handler_signal.trigger();
            })?;

            watch_live(&mut engine, pid, &targets, &shutdown)?;
            info!("Shutting down");
            Ok(())
        }
        Command::Pointers { json, pid } => {
            let definitions = commands::load_definition_set(definitions_path)?;
            let mut engine = Engine::new(config.engine.clone(), &definitions);
            pointers_live(&mut engine, pid, json)
        }
        Command::Scan {
            pattern,
            module,
            pid,
        } => scan_live(&config, &pattern, module.as_deref(), pid),
    }
}

#[cfg(target_os = "windows")]
fn watch_live(
    engine: &mut Engine,
    pid: Option<u32>,
    targets: &[commands::watch::WatchTarget],
    shutdown: &ShutdownSignal,
) -> Result<()> {
    commands::watch::run_attached(engine, pid, targets, shutdown)
}

#[cfg(target_os = "windows")]
fn pointers_live(engine: &mut Engine, pid: Option<u32>, json: bool) -> Result<()> {
    let process = commands::open_process(engine.config(), pid)?;
    if let Some(dir) = commands::game_dir(&process) {
        engine.initialize_il2cpp(&dir);
    }
    commands::pointers::run(engine, &process, json)
}

#[cfg(target_os = "windows")]
fn scan_live(
    config: &CliConfig,
    pattern: &str,
    module: Option<&str>,
    pid: Option<u32>,
) -> Result<()> {
    let process = commands::open_process(&config.engine, pid)?;
    commands::scan::run(&process, pattern, module, config.engine.chunk_size)
}

#[cfg(not(target_os = "windows"))]
fn watch_live(
    _engine: &mut Engine,
    _pid: Option<u32>,
    _targets: &[commands::watch::WatchTarget],
    _shutdown: &ShutdownSignal,
) -> Result<()> {
    anyhow::bail!("Attaching to a live process is only supported on Windows")
}

#[cfg(not(target_os = "windows"))]
fn pointers_live(_engine: &mut Engine, _pid: Option<u32>, _json: bool) -> Result<()> {
    anyhow::bail!("Attaching to a live process is only supported on Windows")
}

#[cfg(not(target_os = "windows"))]
fn scan_live(
    _config: &CliConfig,
    _pattern: &str,
    _module: Option<&str>,
    _pid: Option<u32>,
) -> Result<()> {
    anyhow::bail!("Attaching to a live process is only supported on Windows")
}
