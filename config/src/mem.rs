//! Constants governing per-virtual-device resource layout.

/// Virtual devices carved from each physical device when the caller leaves
/// `memMult` unspecified under `MemMode::UseDefault`.
pub const DEFAULT_CHANNEL_MULTIPLIER: usize = 4;

/// Default number of active (RAM-resident) pages per virtual device.
pub const DEFAULT_ACTIVE_PAGES: usize = 50;

/// Assumed L1 data cache line size, used to pad the per-virtual-device
/// mutexes so adjacent locks don't false-share.
pub const ASSUMED_CACHE_LINE_SIZE: usize = 64;
