//! Memory layout constants for IL2CPP managed objects
//!
//! This module centralizes the runtime layout constants the engine relies on.
//! They describe the 64-bit IL2CPP object model, not any gameplay structure;
//! gameplay offset chains belong to the host.

/// Layout of a managed object header
pub mod object {
    /// Size of the object header (klass pointer + monitor)
    pub const HEADER_SIZE: u64 = 0x10;
}

/// Layout of `System.String`
///
/// ```text
/// Offset   Field      Size    Description
/// ──────────────────────────────────────────────
/// 0x00     klass      8       Class pointer
/// 0x08     monitor    8       Sync block
/// 0x10     length     4       Number of UTF-16 code units
/// 0x14     chars      2*n     UTF-16 payload (not NUL terminated)
/// ```
pub mod string {
    pub const LENGTH: u64 = 0x10;
    pub const CHARS: u64 = 0x14;

    /// Upper bound for a string read from a live process
    pub const MAX_LENGTH: usize = 4096;
}

/// Timing constants for resolution and verification
pub mod timing {
    use std::time::Duration;

    /// Minimum delay between two resolution passes of an unresolved pointer
    pub const RESOLVE_RETRY_INTERVAL: Duration = Duration::from_secs(1);

    /// Minimum delay between two verifications of a signature anchor
    pub const SIGNATURE_VERIFY_INTERVAL: Duration = Duration::from_secs(5);

    /// Interval between polls in the watch loop (ms)
    pub const POLL_INTERVAL_MS: u64 = 100;

    /// Delay before looking for the game process again (ms)
    pub const ATTACH_RETRY_MS: u64 = 1000;
}

/// Limits for signature scanning
pub mod scan {
    /// Bytes read per request while scanning a region
    pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

    /// Highest user-mode address on 64-bit Windows
    pub const MAX_USER_ADDRESS: u64 = 0x7FFF_FFFF_FFFF;
}
