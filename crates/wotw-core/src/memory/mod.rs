mod bytes;
pub mod layout;
mod process;
pub mod region;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(test)]
pub mod mock;

pub use bytes::ByteBuffer;
pub use process::{ModuleInfo, POINTER_SIZE, ProcessMemory};
pub use region::{MemoryRegion, RegionFilter, Regions, regions};
#[cfg(target_os = "windows")]
pub use windows::ProcessHandle;

#[cfg(test)]
pub use mock::{MockProcess, MockProcessBuilder};
