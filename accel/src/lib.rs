//! A narrow, vendor-neutral capability layer over an accelerator API
//! (platforms, devices, contexts, queues, buffers, events, kernels).
//!
//! This mirrors the `ClPlatform`/`ClDevice`/`ClContext`/`ClCommandQueue`/
//! `ClArray` wrapper family of the implementation this workspace is based
//! on, but collapses them into one object-safe [`Accelerator`] trait over
//! opaque handle newtypes rather than one wrapper struct per concept. The
//! rest of the workspace is generic over `T` only, never over the
//! accelerator backend, matching the original's "vendor API is a detail"
//! stance.
//!
//! [`host::HostAccelerator`] is the one concrete implementation shipped
//! here: a heap-backed reference/test backend standing in for a real GPU
//! driver, which is out of scope.

pub mod host;

use systype::VmaResult;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

opaque_handle!(
    /// One enumerated platform (an accelerator vendor's driver stack).
    PlatformId
);
opaque_handle!(
    /// A context; may be shared by several virtual devices carved from the
    /// same physical device so their queues can overlap transfers.
    ContextHandle
);
opaque_handle!(
    /// An in-order command queue bound to one context.
    QueueHandle
);
opaque_handle!(
    /// A device-resident or host-pinned buffer.
    BufferHandle
);
opaque_handle!(
    /// A pending or completed transfer/kernel invocation.
    EventHandle
);
opaque_handle!(
    /// A lazily-built, cacheable compiled kernel (currently only the
    /// member-equality search kernel).
    KernelHandle
);

/// Everything needed to pick and size a physical device, before a context
/// exists for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub platform: PlatformId,
    /// Index of this device within its platform's device list; the handle
    /// `createContext` expects.
    pub index: usize,
    pub name: String,
    /// VRAM size, in whole gigabytes (decimal, matching the original's
    /// `memSize / 1_000_000_000` sizing convention).
    pub vram_gb: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Queued,
    Running,
    Complete,
}

/// A host pointer obtained by mapping a pinned buffer. Callers serialize
/// their own access to it (see [`PinnedPage`](../memory/struct.PinnedPage.html)),
/// exactly as the spec's `PinnedPage` carries no locking of its own.
#[derive(Debug, Clone, Copy)]
pub struct HostPtr(pub *mut u8);

// Safety: a `HostPtr` is moved into exactly one `PinnedPage`, which is
// itself guarded by its owning virtual device's mutex; the accelerator
// never touches the memory concurrently with the owner.
unsafe impl Send for HostPtr {}

/// The capability surface every accelerator backend implements.
///
/// Every fallible call returns `AcceleratorError{code, where}` through
/// [`systype::VmaError`] on failure; this trait never panics on a backend
/// failure, only on internal handle misuse (an unknown handle), which
/// indicates a bug in a caller within this workspace rather than an
/// external failure.
pub trait Accelerator: Send + Sync {
    fn enumerate_platforms(&self) -> VmaResult<Vec<PlatformId>>;
    fn enumerate_devices(&self, platform: PlatformId) -> VmaResult<Vec<DeviceInfo>>;

    fn create_context(&self, device: &DeviceInfo) -> VmaResult<ContextHandle>;
    /// Produce a second handle sharing the same underlying context, for a
    /// virtual device cloned onto a physical device another virtual
    /// device already claimed.
    fn clone_context(&self, context: ContextHandle) -> VmaResult<ContextHandle>;
    fn release_context(&self, context: ContextHandle) -> VmaResult<()>;

    fn create_queue(&self, context: ContextHandle) -> VmaResult<QueueHandle>;

    fn create_device_buffer(&self, context: ContextHandle, bytes: usize) -> VmaResult<BufferHandle>;
    /// Allocate-on-host then map-for-read-write, yielding a page-locked
    /// address usable directly as a `PinnedPage`'s storage.
    fn create_host_pinned_buffer(
        &self,
        context: ContextHandle,
        bytes: usize,
    ) -> VmaResult<(BufferHandle, HostPtr)>;
    fn release_buffer(&self, context: ContextHandle, buffer: BufferHandle) -> VmaResult<()>;

    /// `blocking = false` returns immediately with an event the caller
    /// waits on via [`Accelerator::wait_event`]; `blocking = true` waits
    /// internally before returning.
    fn enqueue_read(
        &self,
        queue: QueueHandle,
        buffer: BufferHandle,
        offset: usize,
        dst: &mut [u8],
        blocking: bool,
    ) -> VmaResult<EventHandle>;
    fn enqueue_write(
        &self,
        queue: QueueHandle,
        buffer: BufferHandle,
        offset: usize,
        src: &[u8],
        blocking: bool,
    ) -> VmaResult<EventHandle>;

    /// Lazily build (or fetch a cached) kernel comparing `member_size`
    /// bytes at `member_offset` within each `element_stride`-byte element.
    fn build_find_kernel(
        &self,
        context: ContextHandle,
        member_offset: usize,
        member_size: usize,
    ) -> VmaResult<KernelHandle>;

    /// Run the search kernel over `element_count` elements of `buffer`,
    /// each `element_stride` bytes wide, comparing against `member_value`
    /// and collecting up to `max_hits` matching element indices.
    fn enqueue_find(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        buffer: BufferHandle,
        element_stride: usize,
        element_count: usize,
        member_value: &[u8],
        max_hits: usize,
    ) -> VmaResult<Vec<usize>>;

    fn flush(&self, queue: QueueHandle) -> VmaResult<()>;
    fn finish(&self, queue: QueueHandle) -> VmaResult<()>;
    fn event_status(&self, event: EventHandle) -> VmaResult<EventStatus>;
    fn release_event(&self, event: EventHandle) -> VmaResult<()>;

    /// Block until `event` completes, spin-yielding rather than sleeping
    /// so the thread gives up its core to other in-flight transfers.
    fn wait_event(&self, event: EventHandle) -> VmaResult<()> {
        sync::spin_wait_until(|| {
            matches!(self.event_status(event), Ok(EventStatus::Complete) | Err(_))
        });
        self.event_status(event).map(|_| ())
    }
}
