//! # wotw-core
//!
//! Pointer-resolution engine for Ori and the Will of the Wisps.
//!
//! This crate provides:
//! - Process memory access through the [`ProcessMemory`] trait (Windows backend included)
//! - Wildcard signature scanning over committed memory regions
//! - IL2CPP 24.1 metadata parsing and `Assembly.Type.Method` RVA resolution
//! - Self-healing named pointers with per-process caching and re-verification
//!
//! Gameplay field offsets and their meaning are left to the host.

pub mod engine;
pub mod error;
pub mod il2cpp;
pub mod memory;
pub mod pointer;
pub mod scan;

pub use engine::{Engine, EngineConfig, EngineConfigBuilder, PointerSummary};
pub use error::{Error, Result};
pub use il2cpp::{Il2CppRuntime, Il2CppTables, il2cpp_paths};
#[cfg(target_os = "windows")]
pub use memory::ProcessHandle;
pub use memory::{MemoryRegion, ModuleInfo, ProcessMemory, RegionFilter, regions};
pub use pointer::{
    AutoDeref, EngineVersion, Finder, FinderDefinition, PointerDefinition, PointerDefinitionSet,
    PointerState, ProgramPointer, builtin_definitions, load_definitions, save_definitions,
};
pub use scan::{MemorySearcher, Signature};
