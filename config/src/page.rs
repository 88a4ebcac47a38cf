//! Page-level constants shared by `memory`, `page`, `device` and `vma`.

/// Default number of elements per page when a caller does not pick one.
pub const DEFAULT_PAGE_SIZE: usize = 1024;

/// Alignment used for pinned host pages and for mapped-access scratch
/// buffers, suitable for DMA on the accelerators this system targets.
pub const DMA_ALIGNMENT: usize = 4096;

/// Active-page-count boundary below which [`page`]'s direct (single-page)
/// cache policy is selected.
pub const DIRECT_POLICY_MAX_ACTIVE_PAGES: usize = 1;

/// Active-page-count range for the small-array linear-scan LRU policy.
pub const SMALL_ARRAY_POLICY_MAX_ACTIVE_PAGES: usize = 12;

pub fn is_aligned_to_page(offset: usize, page_size: usize) -> bool {
    offset % page_size == 0
}
