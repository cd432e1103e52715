//! Process access primitives consumed by the engine

use bytemuck::{Pod, Zeroable};

use crate::error::{Error, Result};
use crate::memory::layout;
use crate::memory::region::MemoryRegion;

/// Size of a pointer in the (64-bit) target process
pub const POINTER_SIZE: usize = 8;

/// Bytes requested per step when looking for a string terminator
const CSTRING_CHUNK: usize = 64;
const MAX_CSTRING_LENGTH: usize = 1024;

/// A module loaded in the target process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub name: String,
    pub base_address: u64,
    pub size: u64,
}

impl ModuleInfo {
    pub fn end_address(&self) -> u64 {
        self.base_address.saturating_add(self.size)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base_address && address < self.end_address()
    }
}

/// Raw access to a foreign process.
///
/// Implementors supply the OS primitives; the typed helpers (POD reads,
/// offset chains, strings) are provided on top of them.
pub trait ProcessMemory {
    /// Identity of the process; changes when the game is restarted
    fn pid(&self) -> u32;

    fn is_alive(&self) -> bool;

    /// The executable's own module
    fn main_module(&self) -> Option<ModuleInfo>;

    /// Look up a loaded module by file name (case-insensitive)
    fn module(&self, name: &str) -> Option<ModuleInfo>;

    fn read_bytes(&self, address: u64, len: usize) -> Result<Vec<u8>>;

    fn write_bytes(&self, address: u64, data: &[u8]) -> Result<()>;

    /// Describe the region containing `address`, or the next one above it.
    ///
    /// Returns `None` once the end of the address space is reached.
    fn region_at(&self, address: u64) -> Option<MemoryRegion>;

    /// Resolve an optional module name, falling back to the main module
    fn module_or_main(&self, name: Option<&str>) -> Option<ModuleInfo> {
        match name {
            Some(name) if !name.is_empty() => self.module(name),
            _ => self.main_module(),
        }
    }

    fn read<T: Pod>(&self, address: u64) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(address, size)?;
        if bytes.len() != size {
            return Err(Error::read_failed(
                address,
                format!("expected {} bytes, got {}", size, bytes.len()),
            ));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    fn read_i32(&self, address: u64) -> Result<i32> {
        self.read::<i32>(address)
    }

    fn read_pointer(&self, address: u64) -> Result<u64> {
        self.read::<u64>(address)
    }

    /// Walk an offset chain and return the final address.
    ///
    /// Every offset but the last is added to the running address and the
    /// result is dereferenced as a pointer; the last offset is only added.
    /// A null pointer or a failed read anywhere in the chain yields `None`.
    fn follow_chain(&self, base: u64, offsets: &[i64]) -> Option<u64> {
        if base == 0 {
            return None;
        }
        let Some((last, hops)) = offsets.split_last() else {
            return Some(base);
        };

        let mut address = base;
        for &offset in hops {
            address = self.read_pointer(address.wrapping_add_signed(offset)).ok()?;
            if address == 0 {
                return None;
            }
        }
        Some(address.wrapping_add_signed(*last))
    }

    /// Read a value at the end of an offset chain, zero when unavailable
    fn read_chain<T: Pod>(&self, base: u64, offsets: &[i64]) -> T {
        self.follow_chain(base, offsets)
            .and_then(|address| self.read::<T>(address).ok())
            .unwrap_or_else(<T as Zeroable>::zeroed)
    }

    fn read_chain_bytes(&self, base: u64, len: usize, offsets: &[i64]) -> Option<Vec<u8>> {
        let address = self.follow_chain(base, offsets)?;
        self.read_bytes(address, len).ok()
    }

    fn write_chain<T: Pod>(&self, base: u64, offsets: &[i64], value: T) -> Result<()> {
        self.write_chain_bytes(base, offsets, bytemuck::bytes_of(&value))
    }

    fn write_chain_bytes(&self, base: u64, offsets: &[i64], data: &[u8]) -> Result<()> {
        let address = self
            .follow_chain(base, offsets)
            .ok_or_else(|| Error::NotFound(format!("offset chain from {:#x}", base)))?;
        self.write_bytes(address, data)
    }

    /// Read a NUL-terminated UTF-8 string
    fn read_cstring(&self, address: u64) -> Result<String> {
        let mut bytes = Vec::new();
        while bytes.len() < MAX_CSTRING_LENGTH {
            let Some(cursor) = address.checked_add(bytes.len() as u64) else {
                return Err(Error::read_failed(address, "string past the address space"));
            };
            let chunk = self.read_string_chunk(cursor)?;
            if let Some(end) = memchr::memchr(0, &chunk) {
                bytes.extend_from_slice(&chunk[..end]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk);
        }
        bytes.truncate(MAX_CSTRING_LENGTH);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// One string chunk, shortened to the end of its region when the full
    /// chunk would cross into unmapped memory
    fn read_string_chunk(&self, cursor: u64) -> Result<Vec<u8>> {
        let error = match self.read_bytes(cursor, CSTRING_CHUNK) {
            Ok(chunk) => return Ok(chunk),
            Err(e) => e,
        };
        let remaining = self
            .region_at(cursor)
            .filter(|region| region.base_address <= cursor)
            .map(|region| region.end_address().saturating_sub(cursor))
            .filter(|&remaining| remaining > 0 && remaining < CSTRING_CHUNK as u64);
        match remaining {
            Some(remaining) => self.read_bytes(cursor, remaining as usize),
            None => Err(error),
        }
    }

    /// Read an IL2CPP `System.String` object
    fn read_managed_string(&self, object: u64) -> Result<String> {
        if object == 0 {
            return Err(Error::NotFound("null string object".to_string()));
        }
        let field = |offset: u64| {
            object
                .checked_add(offset)
                .ok_or_else(|| Error::read_failed(object, "string object past the address space"))
        };
        let length = self.read_i32(field(layout::string::LENGTH)?)?;
        if length <= 0 {
            return Ok(String::new());
        }
        let length = (length as usize).min(layout::string::MAX_LENGTH);
        let bytes = self.read_bytes(field(layout::string::CHARS)?, length * 2)?;
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(String::from_utf16_lossy(&units))
    }
}
