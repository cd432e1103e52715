//! In-memory stand-in for a target process
//!
//! Regions are backed by plain byte vectors. Call counters let tests observe
//! how often the engine touched the process (module lookups, region queries,
//! reads), which is how finder invocations are counted without a stub finder.

use std::cell::{Cell, RefCell};

use crate::error::{Error, Result};
use crate::memory::process::{ModuleInfo, ProcessMemory};
use crate::memory::region::{MemoryRegion, state};

struct MockRegion {
    info: MemoryRegion,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct MockCounters {
    module_lookups: Cell<usize>,
    region_queries: Cell<usize>,
    reads: Cell<usize>,
}

impl MockCounters {
    fn bump(cell: &Cell<usize>) {
        cell.set(cell.get() + 1);
    }
}

pub struct MockProcess {
    pid: Cell<u32>,
    alive: Cell<bool>,
    main_module: Option<ModuleInfo>,
    modules: Vec<ModuleInfo>,
    regions: RefCell<Vec<MockRegion>>,
    counters: MockCounters,
}

impl MockProcess {
    pub fn set_pid(&self, pid: u32) {
        self.pid.set(pid);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.set(alive);
    }

    /// Overwrite bytes in an existing region (simulates the game patching itself)
    pub fn poke(&self, address: u64, data: &[u8]) {
        self.write_bytes(address, data)
            .expect("poke target must be inside a mock region");
    }

    /// Number of `module`/`main_module` calls so far
    pub fn module_lookups(&self) -> usize {
        self.counters.module_lookups.get()
    }

    /// Number of `region_at` calls so far
    pub fn region_queries(&self) -> usize {
        self.counters.region_queries.get()
    }

    pub fn reads(&self) -> usize {
        self.counters.reads.get()
    }

    fn locate(&self, address: u64, len: usize) -> Option<(usize, usize)> {
        let regions = self.regions.borrow();
        regions.iter().enumerate().find_map(|(index, region)| {
            let start = address.checked_sub(region.info.base_address)? as usize;
            let end = start.checked_add(len)?;
            (region.info.is_committed() && end <= region.data.len()).then_some((index, start))
        })
    }
}

impl ProcessMemory for MockProcess {
    fn pid(&self) -> u32 {
        self.pid.get()
    }

    fn is_alive(&self) -> bool {
        self.alive.get()
    }

    fn main_module(&self) -> Option<ModuleInfo> {
        MockCounters::bump(&self.counters.module_lookups);
        self.main_module.clone()
    }

    fn module(&self, name: &str) -> Option<ModuleInfo> {
        MockCounters::bump(&self.counters.module_lookups);
        self.modules
            .iter()
            .chain(self.main_module.iter())
            .find(|module| module.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        MockCounters::bump(&self.counters.reads);
        let (index, start) = self
            .locate(address, len)
            .ok_or_else(|| Error::read_failed(address, "address not mapped in mock process"))?;
        Ok(self.regions.borrow()[index].data[start..start + len].to_vec())
    }

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()> {
        let (index, start) =
            self.locate(address, data.len())
                .ok_or_else(|| Error::MemoryWriteFailed {
                    address,
                    message: "address not mapped in mock process".to_string(),
                })?;
        self.regions.borrow_mut()[index].data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn region_at(&self, address: u64) -> Option<MemoryRegion> {
        MockCounters::bump(&self.counters.region_queries);
        self.regions
            .borrow()
            .iter()
            .map(|region| region.info)
            .find(|info| info.end_address() > address)
    }
}

/// Builder for [`MockProcess`]
pub struct MockProcessBuilder {
    pid: u32,
    main_module: Option<ModuleInfo>,
    modules: Vec<ModuleInfo>,
    regions: Vec<MockRegion>,
}

impl MockProcessBuilder {
    pub fn new() -> Self {
        Self {
            pid: 1000,
            main_module: None,
            modules: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn main_module(mut self, name: &str, base_address: u64, size: u64) -> Self {
        self.main_module = Some(ModuleInfo {
            name: name.to_string(),
            base_address,
            size,
        });
        self
    }

    pub fn module(mut self, name: &str, base_address: u64, size: u64) -> Self {
        self.modules.push(ModuleInfo {
            name: name.to_string(),
            base_address,
            size,
        });
        self
    }

    /// Committed region with the given protection
    pub fn region(mut self, base_address: u64, protect: u32, data: Vec<u8>) -> Self {
        self.regions.push(MockRegion {
            info: MemoryRegion {
                base_address,
                size: data.len() as u64,
                state: state::MEM_COMMIT,
                protect,
            },
            data,
        });
        self
    }

    pub fn readwrite(self, base_address: u64, data: Vec<u8>) -> Self {
        self.region(base_address, super::region::protect::PAGE_READWRITE, data)
    }

    /// Reserved (uncommitted) address range
    pub fn reserved(mut self, base_address: u64, size: u64) -> Self {
        self.regions.push(MockRegion {
            info: MemoryRegion {
                base_address,
                size,
                state: state::MEM_RESERVE,
                protect: 0,
            },
            data: Vec::new(),
        });
        self
    }

    pub fn build(mut self) -> MockProcess {
        self.regions.sort_by_key(|region| region.info.base_address);
        MockProcess {
            pid: Cell::new(self.pid),
            alive: Cell::new(true),
            main_module: self.main_module,
            modules: self.modules,
            regions: RefCell::new(self.regions),
            counters: MockCounters::default(),
        }
    }
}

impl Default for MockProcessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
