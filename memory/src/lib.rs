//! Host-side page storage ([`PinnedPage`]) and device-resident array
//! buffers ([`DeviceArray`]).
//!
//! Grounded on the original's `Page<T>`/`AlignedCpuArray<T>` pair: a page
//! is one pinned (or plain, over-aligned) host allocation carrying an
//! `edited` flag and the logical page it currently shadows.

pub mod device_array;
pub mod pinned_page;

pub use device_array::DeviceArray;
pub use pinned_page::PinnedPage;
