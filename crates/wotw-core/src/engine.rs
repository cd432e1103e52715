//! Host-facing engine
//!
//! The engine owns the configuration, the optional IL2CPP runtime and every
//! named [`ProgramPointer`]. The host owns the process handle and passes it in
//! on each call; nothing here keeps it alive or closes it.
//!
//! ## Example
//!
//! ```ignore
//! use wotw_core::{Engine, EngineConfig};
//!
//! let config = EngineConfig::builder().version(EngineVersion::V1).build();
//! let mut engine = Engine::with_builtin_definitions(config)?;
//! engine.initialize_il2cpp(game_dir);
//!
//! let area: i32 = engine.read(&process, "GameWorld", &[0xb8, 0x0, 0x30]);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::il2cpp::Il2CppRuntime;
use crate::memory::{ProcessMemory, layout};
use crate::pointer::{
    Clock, EngineVersion, PointerDefinitionSet, PointerState, ProgramPointer, ResolveContext,
    ResolveSettings, SystemClock, builtin_definitions,
};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Process name without the `.exe` suffix
    pub process_name: String,
    /// Product name; the data folder is `<product>_Data`
    pub product: String,
    /// Game build the finders are filtered by
    pub version: EngineVersion,
    pub retry_interval_ms: u64,
    pub verify_interval_ms: u64,
    pub chunk_size: usize,
    /// Interval between polls in the watch loop
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            process_name: "OriWotW".to_string(),
            product: "oriwotw".to_string(),
            version: EngineVersion::V1,
            retry_interval_ms: layout::timing::RESOLVE_RETRY_INTERVAL.as_millis() as u64,
            verify_interval_ms: layout::timing::SIGNATURE_VERIFY_INTERVAL.as_millis() as u64,
            chunk_size: layout::scan::CHUNK_SIZE,
            poll_interval_ms: layout::timing::POLL_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Create a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn resolve_settings(&self) -> ResolveSettings {
        ResolveSettings {
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            verify_interval: Duration::from_millis(self.verify_interval_ms),
            chunk_size: self.chunk_size.max(1),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    process_name: Option<String>,
    product: Option<String>,
    version: Option<EngineVersion>,
    retry_interval: Option<Duration>,
    verify_interval: Option<Duration>,
    chunk_size: Option<usize>,
    poll_interval: Option<Duration>,
}

impl EngineConfigBuilder {
    pub fn process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = Some(name.into());
        self
    }

    pub fn product(mut self, product: impl Into<String>) -> Self {
        self.product = Some(product.into());
        self
    }

    pub fn version(mut self, version: EngineVersion) -> Self {
        self.version = Some(version);
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    pub fn verify_interval(mut self, interval: Duration) -> Self {
        self.verify_interval = Some(interval);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        let default = EngineConfig::default();
        let millis = |interval: Duration| interval.as_millis() as u64;
        EngineConfig {
            process_name: self.process_name.unwrap_or(default.process_name),
            product: self.product.unwrap_or(default.product),
            version: self.version.unwrap_or(default.version),
            retry_interval_ms: self
                .retry_interval
                .map_or(default.retry_interval_ms, millis),
            verify_interval_ms: self
                .verify_interval
                .map_or(default.verify_interval_ms, millis),
            chunk_size: self.chunk_size.unwrap_or(default.chunk_size),
            poll_interval_ms: self
                .poll_interval
                .map_or(default.poll_interval_ms, millis),
        }
    }
}

/// One line of [`Engine::pointer_summary`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointerSummary {
    pub name: String,
    pub address: u64,
    /// Kind of the finder that produced the address
    pub finder: Option<&'static str>,
}

impl PointerSummary {
    pub fn is_resolved(&self) -> bool {
        self.address != 0
    }
}

pub struct Engine {
    config: EngineConfig,
    pointers: Vec<ProgramPointer>,
    il2cpp: Option<Il2CppRuntime>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Engine {
    pub fn new(config: EngineConfig, definitions: &PointerDefinitionSet) -> Self {
        Self {
            config,
            pointers: definitions.pointers.iter().map(|d| d.build()).collect(),
            il2cpp: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_builtin_definitions(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(config, &builtin_definitions()?))
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pointer_names(&self) -> impl Iterator<Item = &str> {
        self.pointers.iter().map(ProgramPointer::name)
    }

    /// Load the IL2CPP tables from the game directory.
    ///
    /// Returns `false` when the files are missing or unusable; signature and
    /// static-offset pointers keep working either way.
    pub fn initialize_il2cpp(&mut self, game_dir: &Path) -> bool {
        match Il2CppRuntime::load(game_dir, &self.config.product) {
            Ok(runtime) => {
                info!("IL2CPP runtime ready from {}", game_dir.display());
                self.il2cpp = Some(runtime);
                true
            }
            Err(e) => {
                warn!("IL2CPP unavailable, RVA finders disabled: {}", e);
                self.il2cpp = None;
                false
            }
        }
    }

    pub fn set_il2cpp(&mut self, runtime: Il2CppRuntime) {
        self.il2cpp = Some(runtime);
    }

    pub fn il2cpp(&self) -> Option<&Il2CppRuntime> {
        self.il2cpp.as_ref()
    }

    /// Forget the IL2CPP tables and every cached address
    pub fn detach(&mut self) {
        self.il2cpp = None;
        self.pointers.iter_mut().for_each(ProgramPointer::invalidate);
        info!("Detached");
    }

    fn with_pointer<P, R>(
        &mut self,
        process: &P,
        name: &str,
        action: impl FnOnce(&mut ProgramPointer, &mut ResolveContext<'_, P>) -> R,
    ) -> Option<R>
    where
        P: ProcessMemory,
    {
        if !process.is_alive() {
            return None;
        }
        let Some(pointer) = self
            .pointers
            .iter_mut()
            .find(|pointer| pointer.name().eq_ignore_ascii_case(name))
        else {
            debug!("Unknown pointer: {}", name);
            return None;
        };

        let mut ctx = ResolveContext {
            process,
            il2cpp: self.il2cpp.as_mut(),
            version: self.config.version,
            clock: self.clock.as_ref(),
            settings: self.config.resolve_settings(),
        };
        Some(action(pointer, &mut ctx))
    }

    /// Current address of a named pointer, 0 when unresolved or unknown
    pub fn resolve<P: ProcessMemory>(&mut self, process: &P, name: &str) -> u64 {
        self.with_pointer(process, name, |pointer, ctx| pointer.resolve(ctx))
            .unwrap_or(0)
    }

    pub fn read<T: Pod, P: ProcessMemory>(&mut self, process: &P, name: &str, offsets: &[i64]) -> T {
        self.with_pointer(process, name, |pointer, ctx| pointer.read(ctx, offsets))
            .unwrap_or_else(T::zeroed)
    }

    pub fn read_bytes<P: ProcessMemory>(
        &mut self,
        process: &P,
        name: &str,
        len: usize,
        offsets: &[i64],
    ) -> Option<Vec<u8>> {
        self.with_pointer(process, name, |pointer, ctx| {
            pointer.read_bytes(ctx, len, offsets)
        })
        .flatten()
    }

    pub fn read_cstring<P: ProcessMemory>(
        &mut self,
        process: &P,
        name: &str,
        offsets: &[i64],
    ) -> Result<String> {
        self.with_pointer(process, name, |pointer, ctx| pointer.read_cstring(ctx, offsets))
            .unwrap_or_else(|| Err(Error::NotFound(name.to_string())))
    }

    pub fn read_managed_string<P: ProcessMemory>(
        &mut self,
        process: &P,
        name: &str,
        offsets: &[i64],
    ) -> Result<String> {
        self.with_pointer(process, name, |pointer, ctx| {
            pointer.read_managed_string(ctx, offsets)
        })
        .unwrap_or_else(|| Err(Error::NotFound(name.to_string())))
    }

    pub fn write<T: Pod, P: ProcessMemory>(
        &mut self,
        process: &P,
        name: &str,
        offsets: &[i64],
        value: T,
    ) -> Result<()> {
        self.write_bytes(process, name, offsets, bytemuck::bytes_of(&value))
    }

    pub fn write_bytes<P: ProcessMemory>(
        &mut self,
        process: &P,
        name: &str,
        offsets: &[i64],
        data: &[u8],
    ) -> Result<()> {
        self.with_pointer(process, name, |pointer, ctx| {
            pointer.write_bytes(ctx, offsets, data)
        })
        .unwrap_or_else(|| Err(Error::NotFound(name.to_string())))
    }

    /// Instance field offset of `Assembly.Type.Field`, cached per process
    pub fn field_offset<P: ProcessMemory>(&mut self, process: &P, full_name: &str) -> Option<i32> {
        self.il2cpp
            .as_mut()?
            .field_offset(process.pid(), full_name)
    }

    /// Cached state of every pointer, without resolving anything
    pub fn pointer_summary(&self) -> Vec<PointerSummary> {
        self.pointers
            .iter()
            .map(|pointer| {
                let address = match pointer.state() {
                    PointerState::Resolved(address) => address,
                    PointerState::Unresolved => 0,
                };
                PointerSummary {
                    name: pointer.name().to_string(),
                    address,
                    finder: pointer.active_finder().map(|finder| finder.kind()),
                }
            })
            .collect()
    }
}
