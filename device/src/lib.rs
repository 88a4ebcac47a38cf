//! A single virtual accelerator: one device buffer, one queue, one page
//! cache, and the element/bulk/uncached/find operations the multi-array
//! composes across many of. Grounded on `VirtualArray<T>`, stripped of the
//! cross-virtual-device concerns `VirtualMultiArray<T>` owns instead.

pub mod virtual_device;

pub use virtual_device::VirtualDevice;
