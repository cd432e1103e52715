//! Named pointer with a per-process cache that heals itself
//!
//! ```text
//!   Unresolved ──(retry throttle open)──> run finders in order
//!        ^                                     │
//!        │                     Found(addr) ────┴──> Resolved(addr)
//!        │                                              │
//!        └──── pid changed / active finder fails verify ┘
//! ```

use bytemuck::Pod;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::ProcessMemory;
use crate::pointer::finder::{FindResult, Finder, ResolveContext};
use crate::pointer::schedule::Throttle;

/// Cache state of a [`ProgramPointer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerState {
    Unresolved,
    Resolved(u64),
}

#[derive(Debug, Clone)]
pub struct ProgramPointer {
    name: String,
    module: Option<String>,
    finders: Vec<Finder>,
    address: u64,
    pid: Option<u32>,
    active: Option<usize>,
    retry: Throttle,
}

impl ProgramPointer {
    pub fn new(name: impl Into<String>, finders: Vec<Finder>) -> Self {
        Self {
            name: name.into(),
            module: None,
            finders,
            address: 0,
            pid: None,
            active: None,
            retry: Throttle::new(),
        }
    }

    /// Resolve inside the named module instead of the main module
    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        let module = module.into();
        self.module = (!module.is_empty()).then_some(module);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn finders(&self) -> &[Finder] {
        &self.finders
    }

    /// Finder that produced the current (or last) result
    pub fn active_finder(&self) -> Option<&Finder> {
        self.active.and_then(|index| self.finders.get(index))
    }

    pub fn state(&self) -> PointerState {
        match self.address {
            0 => PointerState::Unresolved,
            address => PointerState::Resolved(address),
        }
    }

    /// Drop everything learned about the current process
    pub fn invalidate(&mut self) {
        self.address = 0;
        self.pid = None;
        self.active = None;
        self.retry.reset();
        self.finders.iter_mut().for_each(Finder::reset);
    }

    /// Current address of the pointer, 0 while unresolved.
    ///
    /// Cheap when the cached address is still trusted; otherwise runs the
    /// applicable finders at most once per retry interval.
    pub fn resolve<P: ProcessMemory>(&mut self, ctx: &mut ResolveContext<'_, P>) -> u64 {
        let pid = ctx.process.pid();
        if self.pid != Some(pid) {
            if self.pid.is_some() {
                debug!("{}: process changed, discarding cached address", self.name);
            }
            self.invalidate();
            self.pid = Some(pid);
        } else if self.address != 0 {
            let still_valid = match self.active.and_then(|index| self.finders.get_mut(index)) {
                Some(finder) => finder.verify(ctx),
                None => false,
            };
            if !still_valid {
                debug!("{}: cached address {:#x} is stale", self.name, self.address);
                self.address = 0;
            }
        }

        if self.address == 0 {
            let now = ctx.now();
            if self.retry.is_ready(now) {
                self.retry.defer(now, ctx.settings.retry_interval);
                self.run_finders(ctx);
            }
        }
        self.address
    }

    fn run_finders<P: ProcessMemory>(&mut self, ctx: &mut ResolveContext<'_, P>) {
        let version = ctx.version;
        let module = self.module.as_deref();

        for (index, finder) in self.finders.iter_mut().enumerate() {
            if !finder.applies_to(version) {
                continue;
            }
            let result = finder.find(ctx, module);
            debug!("{}: {} finder -> {:?}", self.name, finder.kind(), result);

            if result.located_base() || finder.found_base_address() {
                self.active = Some(index);
                self.address = result.address();
                if let FindResult::Found(address) = result {
                    info!("{} resolved at {:#x} ({})", self.name, address, finder.kind());
                }
                return;
            }
        }
    }

    /// Address at the end of `offsets`, or an error when unresolved
    pub fn address_of<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
    ) -> Result<u64> {
        let base = self.resolve(ctx);
        if base == 0 {
            return Err(Error::NotFound(self.name.clone()));
        }
        if let Some(address) = ctx.process.follow_chain(base, offsets) {
            return Ok(address);
        }
        // A base that no longer maps is stale; otherwise the chain just did not resolve
        match ctx.process.read_bytes(base, 1) {
            Ok(_) => Err(Error::NotFound(format!("{} offset chain", self.name))),
            Err(_) => Err(Error::StaleReference(base)),
        }
    }

    /// Read a value through the offset chain, zero on any failure
    pub fn read<T: Pod, P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
    ) -> T {
        match self.resolve(ctx) {
            0 => T::zeroed(),
            base => ctx.process.read_chain(base, offsets),
        }
    }

    pub fn read_bytes<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        len: usize,
        offsets: &[i64],
    ) -> Option<Vec<u8>> {
        match self.resolve(ctx) {
            0 => None,
            base => ctx.process.read_chain_bytes(base, len, offsets),
        }
    }

    /// NUL-terminated string at the end of the chain
    pub fn read_cstring<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
    ) -> Result<String> {
        let address = self.address_of(ctx, offsets)?;
        ctx.process.read_cstring(address)
    }

    /// Managed `System.String` whose object pointer sits at the end of the chain
    pub fn read_managed_string<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
    ) -> Result<String> {
        let address = self.address_of(ctx, offsets)?;
        let object = ctx.process.read_pointer(address)?;
        ctx.process.read_managed_string(object)
    }

    pub fn write<T: Pod, P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
        value: T,
    ) -> Result<()> {
        self.write_bytes(ctx, offsets, bytemuck::bytes_of(&value))
    }

    pub fn write_bytes<P: ProcessMemory>(
        &mut self,
        ctx: &mut ResolveContext<'_, P>,
        offsets: &[i64],
        data: &[u8],
    ) -> Result<()> {
        let address = self.address_of(ctx, offsets)?;
        ctx.process.write_bytes(address, data)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::region::protect::PAGE_EXECUTE_READWRITE;
    use crate::memory::{MockProcess, MockProcessBuilder};
    use crate::pointer::finder::{AutoDeref, EngineVersion};
    use crate::pointer::schedule::ManualClock;
    use crate::scan::Signature;

    /// No main module, so the static-offsets finder always misses.
    /// `DE AD BE EF` sits at 0x7000 in a writable code page.
    fn process() -> MockProcess {
        let mut code = vec![0u8; 0x100];
        code[..6].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x90, 0x90]);
        let mut data = vec![0u8; 0x100];
        data[0x20..0x24].copy_from_slice(&1234i32.to_le_bytes());
        MockProcessBuilder::new()
            .region(0x7000, PAGE_EXECUTE_READWRITE, code)
            .readwrite(0x8000, data)
            .build()
    }

    fn two_finder_pointer() -> ProgramPointer {
        ProgramPointer::new(
            "GameWorld",
            vec![
                Finder::static_offsets(EngineVersion::All, vec![0x10]),
                Finder::signature(
                    EngineVersion::All,
                    AutoDeref::None,
                    Signature::parse("DEADBEEF").unwrap(),
                    vec![],
                ),
            ],
        )
    }

    #[test]
    fn test_second_finder_wins_when_first_fails() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();

        assert_eq!(pointer.resolve(&mut ctx), 0x7000);
        assert_eq!(pointer.state(), PointerState::Resolved(0x7000));
        assert_eq!(pointer.active_finder().map(Finder::kind), Some("signature"));
        // Static offsets tried first (one module lookup), then the scan
        assert_eq!(process.module_lookups(), 1);
        assert!(process.region_queries() > 0);
    }

    #[test]
    fn test_resolved_pointer_does_not_rerun_finders() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();

        pointer.resolve(&mut ctx);
        let queries = process.region_queries();
        clock.advance(Duration::from_secs(2));
        assert_eq!(pointer.resolve(&mut ctx), 0x7000);
        assert_eq!(process.module_lookups(), 1);
        assert_eq!(process.region_queries(), queries);
    }

    #[test]
    fn test_retry_throttle_limits_attempts() {
        let process = MockProcessBuilder::new().build();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();

        assert_eq!(pointer.resolve(&mut ctx), 0);
        clock.advance(Duration::from_millis(500));
        assert_eq!(pointer.resolve(&mut ctx), 0);
        assert_eq!(process.module_lookups(), 1);

        clock.advance(Duration::from_millis(600));
        assert_eq!(pointer.resolve(&mut ctx), 0);
        assert_eq!(process.module_lookups(), 2);
        assert_eq!(pointer.state(), PointerState::Unresolved);
    }

    #[test]
    fn test_process_change_forces_fresh_pass() {
        let process = process();
        let clock = ManualClock::new();
        let mut pointer = two_finder_pointer();
        {
            let mut ctx = ResolveContext::new(&process, &clock);
            assert_eq!(pointer.resolve(&mut ctx), 0x7000);
        }
        let queries = process.region_queries();

        // New process id inside the retry window: still attempted at once
        process.set_pid(2000);
        let mut ctx = ResolveContext::new(&process, &clock);
        assert_eq!(pointer.resolve(&mut ctx), 0x7000);
        assert_eq!(process.module_lookups(), 2);
        assert!(process.region_queries() > queries);
    }

    #[test]
    fn test_verify_failure_retries_all_finders_in_order() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();
        assert_eq!(pointer.resolve(&mut ctx), 0x7000);

        process.poke(0x7000, &[0x00]);
        clock.advance(Duration::from_secs(6));
        let queries = process.region_queries();

        assert_eq!(pointer.resolve(&mut ctx), 0);
        assert_eq!(pointer.state(), PointerState::Unresolved);
        assert_eq!(process.module_lookups(), 2);
        assert!(process.region_queries() > queries);
    }

    #[test]
    fn test_verify_failure_reacquires_moved_anchor() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();
        assert_eq!(pointer.resolve(&mut ctx), 0x7000);

        // Anchor moves 0x40 bytes further
        process.poke(0x7000, &[0x00]);
        process.poke(0x7040, &[0xDE, 0xAD, 0xBE, 0xEF]);
        clock.advance(Duration::from_secs(6));
        assert_eq!(pointer.resolve(&mut ctx), 0x7040);
    }

    #[test]
    fn test_finders_for_other_versions_are_skipped() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock).with_version(EngineVersion::V1);
        let mut pointer = ProgramPointer::new(
            "Characters",
            vec![Finder::signature(
                EngineVersion::V2,
                AutoDeref::None,
                Signature::parse("DEADBEEF").unwrap(),
                vec![],
            )],
        );
        assert_eq!(pointer.resolve(&mut ctx), 0);
        assert_eq!(process.region_queries(), 0);
    }

    #[test]
    fn test_typed_reads_and_writes() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        // Relative walk lands on the data block: 0x7000 + 0x1000 = 0x8000
        let mut pointer = ProgramPointer::new(
            "SeinWorldState",
            vec![Finder::signature(
                EngineVersion::All,
                AutoDeref::None,
                Signature::parse("DEADBEEF").unwrap(),
                vec![0x1000],
            )],
        );

        assert_eq!(pointer.read::<i32, _>(&mut ctx, &[0x20]), 1234);
        pointer.write(&mut ctx, &[0x20], 99i32).unwrap();
        assert_eq!(pointer.read::<i32, _>(&mut ctx, &[0x20]), 99);
        assert_eq!(
            pointer.read_bytes(&mut ctx, 4, &[0x20]),
            Some(99i32.to_le_bytes().to_vec())
        );
        // Null pointer mid-chain reads zero
        assert_eq!(pointer.read::<i32, _>(&mut ctx, &[0x30, 0x0]), 0);
        assert!(pointer.write(&mut ctx, &[0x30, 0x0], 1i32).is_err());
    }

    #[test]
    fn test_unresolved_chain_is_not_found() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = ProgramPointer::new(
            "SeinWorldState",
            vec![Finder::signature(
                EngineVersion::All,
                AutoDeref::None,
                Signature::parse("DEADBEEF").unwrap(),
                vec![0x1000],
            )],
        );

        let err = pointer.address_of(&mut ctx, &[0x30, 0x0]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(pointer.address_of(&mut ctx, &[0x20]).unwrap(), 0x8020);
    }

    #[test]
    fn test_unmapped_base_is_stale() {
        let process = process();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        // 0x7000 + 0x3000 lies outside every mapped block
        let mut pointer = ProgramPointer::new(
            "GameController",
            vec![Finder::signature(
                EngineVersion::All,
                AutoDeref::None,
                Signature::parse("DEADBEEF").unwrap(),
                vec![0x3000],
            )],
        );

        let err = pointer.address_of(&mut ctx, &[0x0, 0x0]).unwrap_err();
        assert!(matches!(err, Error::StaleReference(0xa000)));
    }

    #[test]
    fn test_unresolved_reads_are_zero() {
        let process = MockProcessBuilder::new().build();
        let clock = ManualClock::new();
        let mut ctx = ResolveContext::new(&process, &clock);
        let mut pointer = two_finder_pointer();

        assert_eq!(pointer.read::<u64, _>(&mut ctx, &[0x0]), 0);
        assert!(pointer.read_bytes(&mut ctx, 4, &[]).is_none());
        let err = pointer.read_cstring(&mut ctx, &[]).unwrap_err();
        assert!(err.is_not_found());
    }
}
