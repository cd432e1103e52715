//! Memory region enumeration
//!
//! Regions are re-enumerated on every search: the target's address space
//! changes while it runs, so nothing here is cached.

use crate::memory::layout;
use crate::memory::process::{ModuleInfo, ProcessMemory};

/// Region state flags (`MEMORY_BASIC_INFORMATION::State`)
pub mod state {
    pub const MEM_COMMIT: u32 = 0x1000;
    pub const MEM_RESERVE: u32 = 0x2000;
    pub const MEM_FREE: u32 = 0x10000;
}

/// Page protection flags (`MEMORY_BASIC_INFORMATION::Protect`)
pub mod protect {
    pub const PAGE_NOACCESS: u32 = 0x01;
    pub const PAGE_READONLY: u32 = 0x02;
    pub const PAGE_READWRITE: u32 = 0x04;
    pub const PAGE_WRITECOPY: u32 = 0x08;
    pub const PAGE_EXECUTE: u32 = 0x10;
    pub const PAGE_EXECUTE_READ: u32 = 0x20;
    pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
    pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;
    pub const PAGE_GUARD: u32 = 0x100;

    /// Any protection that permits reading
    pub const READABLE: u32 = PAGE_READONLY
        | PAGE_READWRITE
        | PAGE_WRITECOPY
        | PAGE_EXECUTE_READ
        | PAGE_EXECUTE_READWRITE
        | PAGE_EXECUTE_WRITECOPY;
}

/// One mapping in the target's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub base_address: u64,
    pub size: u64,
    pub state: u32,
    pub protect: u32,
}

impl MemoryRegion {
    #[inline]
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.size)
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        self.state & state::MEM_COMMIT != 0
    }

    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.protect & protect::PAGE_GUARD != 0
    }

    /// Committed, non-empty, not a guard page and mapped with a readable protection
    pub fn is_readable(&self) -> bool {
        self.size > 0
            && self.is_committed()
            && !self.is_guarded()
            && self.protect & protect::PAGE_NOACCESS == 0
            && self.protect & protect::READABLE != 0
    }
}

/// Lazy, single-pass iterator over the readable regions of a process.
pub struct Regions<'a, P: ProcessMemory, F> {
    process: &'a P,
    predicate: F,
    next: u64,
    done: bool,
}

impl<P, F> Iterator for Regions<'_, P, F>
where
    P: ProcessMemory,
    F: FnMut(&MemoryRegion) -> bool,
{
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        while !self.done {
            let Some(region) = self.process.region_at(self.next) else {
                self.done = true;
                break;
            };

            let end = region.end_address();
            if end <= self.next || end > layout::scan::MAX_USER_ADDRESS {
                self.done = true;
            }
            self.next = end;

            if region.is_readable() && (self.predicate)(&region) {
                return Some(region);
            }
        }
        None
    }
}

/// Enumerate readable regions of `process` accepted by `predicate`, lowest base first.
pub fn regions<P, F>(process: &P, predicate: F) -> Regions<'_, P, F>
where
    P: ProcessMemory,
    F: FnMut(&MemoryRegion) -> bool,
{
    Regions {
        process,
        predicate,
        next: 0,
        done: false,
    }
}

/// Protection and address constraints for a signature search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFilter {
    /// Region must carry at least one of these protection bits
    pub protect: u32,
    /// Inclusive range the region base must fall in
    pub bounds: Option<(u64, u64)>,
}

impl RegionFilter {
    /// Every committed `PAGE_EXECUTE_READWRITE` region (JIT-style code pages)
    pub fn any_executable_writable() -> Self {
        Self {
            protect: protect::PAGE_EXECUTE_READWRITE,
            bounds: None,
        }
    }

    /// `PAGE_EXECUTE_READ` regions whose base lies inside `module`
    pub fn module_code(module: &ModuleInfo) -> Self {
        Self {
            protect: protect::PAGE_EXECUTE_READ,
            bounds: Some((module.base_address, module.end_address())),
        }
    }

    pub fn matches(&self, region: &MemoryRegion) -> bool {
        if !region.is_committed() || region.is_guarded() || region.protect & self.protect == 0 {
            return false;
        }
        match self.bounds {
            Some((start, end)) => region.base_address >= start && region.base_address <= end,
            None => true,
        }
    }

    /// The part of `region` worth scanning
    pub fn clamp(&self, region: &MemoryRegion) -> (u64, u64) {
        match self.bounds {
            Some((_, end)) => (region.base_address, region.end_address().min(end)),
            None => (region.base_address, region.end_address()),
        }
    }
}
