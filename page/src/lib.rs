//! The active-page cache fronting one virtual device's `DeviceArray`.
//!
//! Grounded on `PageCache.h`'s `Cache<T>`: a fixed pool of active pages,
//! one of three eviction policies picked by active-page count at
//! construction, and a single `access` operation that returns a page
//! guaranteed to shadow the requested logical page by the time it
//! returns.

pub mod eviction;
pub mod page_cache;

pub use eviction::EvictionPolicy;
pub use page_cache::PageCache;
