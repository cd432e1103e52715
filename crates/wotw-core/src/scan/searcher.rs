//! Signature search over the target's memory regions

use tracing::debug;

use crate::memory::layout;
use crate::memory::{ProcessMemory, RegionFilter, regions};
use crate::scan::Signature;

pub struct MemorySearcher<'a, P: ProcessMemory> {
    process: &'a P,
    chunk_size: usize,
}

impl<'a, P: ProcessMemory> MemorySearcher<'a, P> {
    pub fn new(process: &'a P) -> Self {
        Self {
            process,
            chunk_size: layout::scan::CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Address of the first match in the regions accepted by `filter`,
    /// lowest region first.
    pub fn find_signature(&self, signature: &Signature, filter: &RegionFilter) -> Option<u64> {
        regions(self.process, |region| filter.matches(region)).find_map(|region| {
            let (start, end) = filter.clamp(&region);
            self.scan_range(signature, start, end)
        })
    }

    /// Re-read `signature.len()` bytes at `address` and check they still match
    pub fn verify_signature(&self, address: u64, signature: &Signature) -> bool {
        self.process
            .read_bytes(address, signature.len())
            .is_ok_and(|bytes| signature.matches_at(&bytes, 0))
    }

    /// Scan `[start, end)` chunk by chunk, carrying the last `len - 1` bytes
    /// over so matches straddling a chunk boundary are still seen.
    fn scan_range(&self, signature: &Signature, start: u64, end: u64) -> Option<u64> {
        let chunk_size = self.chunk_size.max(signature.len());
        let keep = signature.len().saturating_sub(1);
        let mut address = start;
        let mut tail: Vec<u8> = Vec::new();

        while address < end {
            let read_size = (end - address).min(chunk_size as u64) as usize;
            let chunk = match self.process.read_bytes(address, read_size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        "Region scan stopped at {:#x} ({:#x} bytes into region): {}",
                        address,
                        address - start,
                        e
                    );
                    return None;
                }
            };

            let mut data = Vec::with_capacity(tail.len() + chunk.len());
            data.extend_from_slice(&tail);
            data.extend_from_slice(&chunk);

            let data_base = address - tail.len() as u64;
            if let Some(offset) = signature.find_first(&data) {
                return Some(data_base + offset as u64);
            }

            tail = data[data.len().saturating_sub(keep)..].to_vec();
            address += read_size as u64;
        }

        None
    }
}
