//! Strategies for locating a pointer in a live process
//!
//! A finder turns "where is this object?" into an address. Three strategies
//! exist, and each one optionally dereferences its raw result once or twice:
//!
//! - [`RvaFinder`]: module base + IL2CPP method RVA + post offset
//! - [`SignatureFinder`]: byte signature search followed by a relative walk
//! - [`StaticOffsetsFinder`]: module base followed by a pointer chain
//!
//! Finders never fail loudly. A miss is reported as [`FindResult::NotFound`],
//! or as [`FindResult::BaseOnly`] when the anchor was located but the value
//! behind it is not populated yet (the game is still loading).

use std::time::Instant;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::il2cpp::Il2CppRuntime;
use crate::memory::layout;
use crate::memory::{ProcessMemory, RegionFilter};
use crate::pointer::schedule::{Clock, Throttle};
use crate::scan::{MemorySearcher, Signature};

/// Game build a finder applies to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum EngineVersion {
    /// Applies to every build
    #[default]
    All,
    V1,
    V2,
}

impl EngineVersion {
    /// Whether a finder tagged `self` may run when the engine targets `target`
    pub fn applies_to(self, target: EngineVersion) -> bool {
        self == EngineVersion::All || self == target
    }
}

/// How many pointer reads follow the raw finder result
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum AutoDeref {
    #[default]
    None,
    Single,
    Double,
}

impl AutoDeref {
    fn hops(self) -> usize {
        match self {
            AutoDeref::None => 0,
            AutoDeref::Single => 1,
            AutoDeref::Double => 2,
        }
    }

    /// Dereference `address` as many times as the mode asks for.
    ///
    /// A null pointer or a read fault along the way yields 0.
    pub fn apply<P: ProcessMemory>(self, process: &P, address: u64) -> u64 {
        (0..self.hops())
            .try_fold(address, |current, _| {
                if current == 0 {
                    return None;
                }
                process.read_pointer(current).ok()
            })
            .unwrap_or(0)
    }
}

/// Outcome of one [`Finder::find`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    Found(u64),
    /// Anchor located, value behind it still null
    BaseOnly,
    NotFound,
}

impl FindResult {
    pub fn address(self) -> u64 {
        match self {
            FindResult::Found(address) => address,
            _ => 0,
        }
    }

    /// Found or BaseOnly: the finder located its anchor
    pub fn located_base(self) -> bool {
        !matches!(self, FindResult::NotFound)
    }
}

/// Tunables shared by every resolution pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveSettings {
    /// Minimum delay between two resolution passes of an unresolved pointer
    pub retry_interval: std::time::Duration,
    /// Minimum delay between two signature re-verifications
    pub verify_interval: std::time::Duration,
    /// Bytes per read while scanning regions
    pub chunk_size: usize,
}

impl Default for ResolveSettings {
    fn default() -> Self {
        Self {
            retry_interval: layout::timing::RESOLVE_RETRY_INTERVAL,
            verify_interval: layout::timing::SIGNATURE_VERIFY_INTERVAL,
            chunk_size: layout::scan::CHUNK_SIZE,
        }
    }
}

/// Everything a finder may consult while resolving
pub struct ResolveContext<'a, P: ProcessMemory> {
    pub process: &'a P,
    pub il2cpp: Option<&'a mut Il2CppRuntime>,
    pub version: EngineVersion,
    pub clock: &'a dyn Clock,
    pub settings: ResolveSettings,
}

impl<'a, P: ProcessMemory> ResolveContext<'a, P> {
    pub fn new(process: &'a P, clock: &'a dyn Clock) -> Self {
        Self {
            process,
            il2cpp: None,
            version: EngineVersion::All,
            clock,
            settings: ResolveSettings::default(),
        }
    }

    pub fn with_il2cpp(mut self, runtime: &'a mut Il2CppRuntime) -> Self {
        self.il2cpp = Some(runtime);
        self
    }

    pub fn with_version(mut self, version: EngineVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_settings(mut self, settings: ResolveSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    fn searcher(&self) -> MemorySearcher<'a, P> {
        MemorySearcher::new(self.process).with_chunk_size(self.settings.chunk_size)
    }
}

/// Turn a located target into a result, applying the dereference mode
fn settle<P: ProcessMemory>(process: &P, auto_deref: AutoDeref, target: u64) -> FindResult {
    match auto_deref.apply(process, target) {
        0 => FindResult::BaseOnly,
        address => FindResult::Found(address),
    }
}

/// Module base + IL2CPP method RVA + post offset
#[derive(Debug, Clone)]
pub struct RvaFinder {
    version: EngineVersion,
    auto_deref: AutoDeref,
    full_name: String,
    post_offset: i64,
    base: Option<u64>,
}

impl RvaFinder {
    pub fn new(
        version: EngineVersion,
        auto_deref: AutoDeref,
        full_name: impl Into<String>,
        post_offset: i64,
    ) -> Self {
        Self {
            version,
            auto_deref,
            full_name: full_name.into(),
            post_offset,
            base: None,
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    fn find<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        module: Option<&str>,
    ) -> FindResult {
        let Some(runtime) = ctx.il2cpp.as_deref_mut() else {
            debug!("IL2CPP not initialized, skipping {}", self.full_name);
            return FindResult::NotFound;
        };

        let base = match self.base {
            Some(base) => base,
            None => {
                let rva = runtime.rva(ctx.process.pid(), &self.full_name);
                if rva == 0 {
                    debug!("No RVA for {}", self.full_name);
                    return FindResult::NotFound;
                }
                let Some(module) = ctx.process.module_or_main(module) else {
                    return FindResult::NotFound;
                };
                let base = module
                    .base_address
                    .wrapping_add(rva)
                    .wrapping_add_signed(self.post_offset);
                self.base = Some(base);
                base
            }
        };

        let target = if self.auto_deref == AutoDeref::None {
            base
        } else {
            // RIP-relative displacement stored at the base
            match ctx.process.read_i32(base) {
                Ok(displacement) => base.wrapping_add_signed(i64::from(displacement) + 4),
                Err(e) => {
                    debug!("Displacement read failed for {}: {}", self.full_name, e);
                    return FindResult::BaseOnly;
                }
            }
        };
        settle(ctx.process, self.auto_deref, target)
    }
}

/// Byte signature search followed by a relative walk
#[derive(Debug, Clone)]
pub struct SignatureFinder {
    version: EngineVersion,
    auto_deref: AutoDeref,
    signature: Signature,
    relative: Vec<i64>,
    base: Option<u64>,
    verify: Throttle,
}

impl SignatureFinder {
    pub fn new(
        version: EngineVersion,
        auto_deref: AutoDeref,
        signature: Signature,
        relative: Vec<i64>,
    ) -> Self {
        Self {
            version,
            auto_deref,
            signature,
            relative,
            base: None,
            verify: Throttle::new(),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn relative(&self) -> &[i64] {
        &self.relative
    }

    fn find<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        module: Option<&str>,
    ) -> FindResult {
        let filter = match module.filter(|name| !name.is_empty()) {
            Some(name) => match ctx.process.module(name) {
                Some(info) => RegionFilter::module_code(&info),
                None => {
                    debug!("Module {} not loaded", name);
                    self.base = None;
                    return FindResult::NotFound;
                }
            },
            None => RegionFilter::any_executable_writable(),
        };

        self.base = ctx.searcher().find_signature(&self.signature, &filter);
        let Some(base) = self.base else {
            return FindResult::NotFound;
        };
        self.verify.defer(ctx.now(), ctx.settings.verify_interval);

        match self.relative_target(ctx.process, base) {
            Some(target) => settle(ctx.process, self.auto_deref, target),
            None => FindResult::BaseOnly,
        }
    }

    /// Every step but the last adds itself plus the RIP-relative displacement
    /// found there; the last step is only added.
    fn relative_target<P: ProcessMemory>(&self, process: &P, base: u64) -> Option<u64> {
        let Some((last, steps)) = self.relative.split_last() else {
            return Some(base);
        };

        let mut offset = 0i64;
        for step in steps {
            offset += step;
            let displacement = process.read_i32(base.wrapping_add_signed(offset)).ok()?;
            offset += i64::from(displacement) + 4;
        }
        Some(base.wrapping_add_signed(offset + last))
    }

    fn verify<P: ProcessMemory>(&mut self, ctx: &ResolveContext<'_, P>) -> bool {
        let Some(base) = self.base else {
            return false;
        };
        let now = ctx.now();
        if !self.verify.is_ready(now) {
            return true;
        }
        self.verify.defer(now, ctx.settings.verify_interval);

        if ctx.searcher().verify_signature(base, &self.signature) {
            true
        } else {
            debug!("Signature no longer matches at {:#x}", base);
            self.base = None;
            false
        }
    }
}

/// Module base followed by a pointer chain
#[derive(Debug, Clone)]
pub struct StaticOffsetsFinder {
    version: EngineVersion,
    auto_deref: AutoDeref,
    offsets: Vec<i64>,
    base: Option<u64>,
}

impl StaticOffsetsFinder {
    pub fn new(version: EngineVersion, offsets: Vec<i64>) -> Self {
        Self {
            version,
            auto_deref: AutoDeref::None,
            offsets,
            base: None,
        }
    }

    pub fn with_auto_deref(mut self, auto_deref: AutoDeref) -> Self {
        self.auto_deref = auto_deref;
        self
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    fn find<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        module: Option<&str>,
    ) -> FindResult {
        let Some(module) = ctx.process.module_or_main(module) else {
            self.base = None;
            return FindResult::NotFound;
        };
        self.base = Some(module.base_address);

        let pointer = ctx
            .process
            .follow_chain(module.base_address, &self.offsets)
            .and_then(|address| ctx.process.read_pointer(address).ok());
        match pointer {
            Some(pointer) if pointer != 0 => settle(ctx.process, self.auto_deref, pointer),
            _ => FindResult::BaseOnly,
        }
    }
}

/// One way of locating a pointer
#[derive(Debug, Clone)]
pub enum Finder {
    Rva(RvaFinder),
    Signature(SignatureFinder),
    StaticOffsets(StaticOffsetsFinder),
}

impl Finder {
    pub fn rva(
        version: EngineVersion,
        auto_deref: AutoDeref,
        full_name: impl Into<String>,
        post_offset: i64,
    ) -> Self {
        Finder::Rva(RvaFinder::new(version, auto_deref, full_name, post_offset))
    }

    pub fn signature(
        version: EngineVersion,
        auto_deref: AutoDeref,
        signature: Signature,
        relative: Vec<i64>,
    ) -> Self {
        Finder::Signature(SignatureFinder::new(version, auto_deref, signature, relative))
    }

    pub fn static_offsets(version: EngineVersion, offsets: Vec<i64>) -> Self {
        Finder::StaticOffsets(StaticOffsetsFinder::new(version, offsets))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Finder::Rva(_) => "rva",
            Finder::Signature(_) => "signature",
            Finder::StaticOffsets(_) => "static-offsets",
        }
    }

    pub fn version(&self) -> EngineVersion {
        match self {
            Finder::Rva(finder) => finder.version,
            Finder::Signature(finder) => finder.version,
            Finder::StaticOffsets(finder) => finder.version,
        }
    }

    pub fn auto_deref(&self) -> AutoDeref {
        match self {
            Finder::Rva(finder) => finder.auto_deref,
            Finder::Signature(finder) => finder.auto_deref,
            Finder::StaticOffsets(finder) => finder.auto_deref,
        }
    }

    pub fn applies_to(&self, version: EngineVersion) -> bool {
        self.version().applies_to(version)
    }

    /// Locate the pointer. `module` names the module the pointer lives in;
    /// `None` means the main module (or every writable code page for
    /// signature searches).
    pub fn find<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        module: Option<&str>,
    ) -> FindResult {
        match self {
            Finder::Rva(finder) => finder.find(ctx, module),
            Finder::Signature(finder) => finder.find(ctx, module),
            Finder::StaticOffsets(finder) => finder.find(ctx, module),
        }
    }

    pub fn found_base_address(&self) -> bool {
        match self {
            Finder::Rva(finder) => finder.base.is_some(),
            Finder::Signature(finder) => finder.base.is_some(),
            Finder::StaticOffsets(finder) => finder.base.is_some(),
        }
    }

    /// Check that a previously found address is still trustworthy.
    ///
    /// Only signature anchors can go stale; the other strategies always pass.
    pub fn verify<P: ProcessMemory>(&mut self, ctx: &ResolveContext<'_, P>) -> bool {
        match self {
            Finder::Signature(finder) => finder.verify(ctx),
            Finder::Rva(_) | Finder::StaticOffsets(_) => true,
        }
    }

    /// Forget everything learned about the current process
    pub fn reset(&mut self) {
        match self {
            Finder::Rva(finder) => finder.base = None,
            Finder::Signature(finder) => {
                finder.base = None;
                finder.verify.reset();
            }
            Finder::StaticOffsets(finder) => finder.base = None,
        }
    }
}
