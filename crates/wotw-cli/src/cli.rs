use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wotw")]
#[command(about = "Ori and the Will of the Wisps pointer resolver")]
#[command(version)]
pub struct Cli {
    /// Engine configuration (TOML); defaults are used when absent
    #[arg(short, long, global = true, default_value = "wotw.toml")]
    pub config: PathBuf,

    /// Pointer definitions (JSON) replacing the built-in set
    #[arg(short, long, global = true)]
    pub definitions: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Attach to the game and report pointer changes until Ctrl-C
    Watch {
        /// Only watch these pointers (default: all)
        #[arg(short, long = "pointer")]
        pointers: Vec<String>,

        /// Process ID (skips the name lookup)
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Resolve every pointer once and print the result
    Pointers {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Process ID (skips the name lookup)
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Search the running game for a signature
    Scan {
        /// Hex pattern, `??` for any byte (e.g. "48 8B 05 ?? ?? ?? ??")
        pattern: String,

        /// Restrict the search to this module's code pages
        #[arg(short, long)]
        module: Option<String>,

        /// Process ID (skips the name lookup)
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Resolve `Assembly.Type.Method` to an RVA from the game files
    Rva {
        /// Game install directory (contains GameAssembly.dll)
        #[arg(short, long)]
        game_dir: PathBuf,

        /// Fully-qualified method names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Resolve `Assembly.Type.Field` to an instance field offset from the game files
    Field {
        /// Game install directory (contains GameAssembly.dll)
        #[arg(short, long)]
        game_dir: PathBuf,

        /// Fully-qualified field names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Validate the pointer definitions without attaching
    Check {
        /// Also write the checked set to this JSON file
        #[arg(long)]
        export: Option<PathBuf>,
    },
}
