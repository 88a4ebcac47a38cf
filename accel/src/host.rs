//! A heap-backed reference accelerator: real device hardware is out of
//! scope, so this backend stands in for it in tests and for any caller
//! that has no GPU driver handy. It implements the full [`Accelerator`]
//! contract against plain process memory: "device" buffers are `Vec<u8>`
//! guarded by one lock, "pinned" buffers are a leaked, over-aligned
//! allocation handed back as a raw pointer exactly like a real mapped
//! buffer would be.

use std::alloc::{alloc, dealloc, Layout};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use systype::{AcceleratorError, VmaResult};

use crate::{
    Accelerator, BufferHandle, ContextHandle, DeviceInfo, EventHandle, EventStatus, HostPtr,
    KernelHandle, PlatformId, QueueHandle,
};

const PINNED_ALIGNMENT: usize = 4096;

enum Buffer {
    Device(Vec<u8>),
    /// Raw pointer plus the layout used to allocate it, so release can
    /// deallocate with matching alignment.
    Pinned(*mut u8, Layout),
}

// Safety: access to the pointer variant is always through `HostAccelerator`
// methods taking `&self`, serialized by `state`'s mutex for bookkeeping and
// by the owning `PinnedPage`'s caller for the memory itself.
unsafe impl Send for Buffer {}

#[derive(Default)]
struct HostState {
    buffers: HashMap<u64, Buffer>,
    kernels: HashMap<u64, (usize, usize)>,
    events: HashMap<u64, EventStatus>,
}

/// Reference [`Accelerator`] implementation over plain process memory.
///
/// `device_vram_gb` reports one simulated physical device per entry, with
/// the given VRAM size; a fresh `HostAccelerator::new()` reports a single
/// 8 GB device, enough for one physical device in tests that don't care
/// about multi-device fan-out.
pub struct HostAccelerator {
    device_vram_gb: Vec<usize>,
    next_handle: AtomicU64,
    state: Mutex<HostState>,
}

impl HostAccelerator {
    pub fn new() -> Self {
        Self::with_devices(vec![8])
    }

    pub fn with_devices(device_vram_gb: Vec<usize>) -> Self {
        Self {
            device_vram_gb,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(HostState::default()),
        }
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn err(code: i32, where_: &'static str) -> systype::VmaError {
        AcceleratorError::new(code, where_).into()
    }
}

impl Default for HostAccelerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for HostAccelerator {
    fn enumerate_platforms(&self) -> VmaResult<Vec<PlatformId>> {
        Ok(vec![PlatformId(0)])
    }

    fn enumerate_devices(&self, platform: PlatformId) -> VmaResult<Vec<DeviceInfo>> {
        Ok(self
            .device_vram_gb
            .iter()
            .enumerate()
            .map(|(index, &vram_gb)| DeviceInfo {
                platform,
                index,
                name: format!("host-reference-device-{index}"),
                vram_gb,
            })
            .collect())
    }

    fn create_context(&self, _device: &DeviceInfo) -> VmaResult<ContextHandle> {
        Ok(ContextHandle(self.next()))
    }

    fn clone_context(&self, context: ContextHandle) -> VmaResult<ContextHandle> {
        // Contexts carry no backend-side state here, so cloning is
        // transparent: the clone addresses the same simulated device.
        Ok(context)
    }

    fn release_context(&self, _context: ContextHandle) -> VmaResult<()> {
        Ok(())
    }

    fn create_queue(&self, _context: ContextHandle) -> VmaResult<QueueHandle> {
        Ok(QueueHandle(self.next()))
    }

    fn create_device_buffer(&self, _context: ContextHandle, bytes: usize) -> VmaResult<BufferHandle> {
        let handle = self.next();
        self.state
            .lock()
            .unwrap()
            .buffers
            .insert(handle, Buffer::Device(vec![0u8; bytes]));
        Ok(BufferHandle(handle))
    }

    fn create_host_pinned_buffer(
        &self,
        _context: ContextHandle,
        bytes: usize,
    ) -> VmaResult<(BufferHandle, HostPtr)> {
        let layout = Layout::from_size_align(bytes.max(1), PINNED_ALIGNMENT)
            .map_err(|_| Self::err(-1, "create_host_pinned_buffer: layout"))?;
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            return Err(Self::err(-2, "create_host_pinned_buffer: alloc"));
        }
        unsafe { ptr.write_bytes(0, bytes) };
        let handle = self.next();
        self.state
            .lock()
            .unwrap()
            .buffers
            .insert(handle, Buffer::Pinned(ptr, layout));
        Ok((BufferHandle(handle), HostPtr(ptr)))
    }

    fn release_buffer(&self, _context: ContextHandle, buffer: BufferHandle) -> VmaResult<()> {
        if let Some(buf) = self.state.lock().unwrap().buffers.remove(&buffer.0) {
            if let Buffer::Pinned(ptr, layout) = buf {
                unsafe { dealloc(ptr, layout) };
            }
        }
        Ok(())
    }

    fn enqueue_read(
        &self,
        _queue: QueueHandle,
        buffer: BufferHandle,
        offset: usize,
        dst: &mut [u8],
        _blocking: bool,
    ) -> VmaResult<EventHandle> {
        let state = self.state.lock().unwrap();
        match state.buffers.get(&buffer.0) {
            Some(Buffer::Device(bytes)) => {
                dst.copy_from_slice(&bytes[offset..offset + dst.len()]);
            }
            Some(Buffer::Pinned(ptr, _)) => unsafe {
                std::ptr::copy_nonoverlapping(ptr.add(offset), dst.as_mut_ptr(), dst.len());
            },
            None => return Err(Self::err(-3, "enqueue_read: unknown buffer")),
        }
        drop(state);
        let handle = self.next();
        self.state
            .lock()
            .unwrap()
            .events
            .insert(handle, EventStatus::Complete);
        Ok(EventHandle(handle))
    }

    fn enqueue_write(
        &self,
        _queue: QueueHandle,
        buffer: BufferHandle,
        offset: usize,
        src: &[u8],
        _blocking: bool,
    ) -> VmaResult<EventHandle> {
        let mut state = self.state.lock().unwrap();
        match state.buffers.get_mut(&buffer.0) {
            Some(Buffer::Device(bytes)) => {
                bytes[offset..offset + src.len()].copy_from_slice(src);
            }
            Some(Buffer::Pinned(ptr, _)) => unsafe {
                std::ptr::copy_nonoverlapping(src.as_ptr(), ptr.add(offset), src.len());
            },
            None => return Err(Self::err(-4, "enqueue_write: unknown buffer")),
        }
        drop(state);
        let handle = self.next();
        self.state
            .lock()
            .unwrap()
            .events
            .insert(handle, EventStatus::Complete);
        Ok(EventHandle(handle))
    }

    fn build_find_kernel(
        &self,
        _context: ContextHandle,
        member_offset: usize,
        member_size: usize,
    ) -> VmaResult<KernelHandle> {
        let handle = self.next();
        self.state
            .lock()
            .unwrap()
            .kernels
            .insert(handle, (member_offset, member_size));
        Ok(KernelHandle(handle))
    }

    fn enqueue_find(
        &self,
        _queue: QueueHandle,
        kernel: KernelHandle,
        buffer: BufferHandle,
        element_stride: usize,
        element_count: usize,
        member_value: &[u8],
        max_hits: usize,
    ) -> VmaResult<Vec<usize>> {
        let state = self.state.lock().unwrap();
        let (member_offset, member_size) = *state
            .kernels
            .get(&kernel.0)
            .ok_or_else(|| Self::err(-5, "enqueue_find: unknown kernel"))?;
        let bytes = match state.buffers.get(&buffer.0) {
            Some(Buffer::Device(bytes)) => bytes.as_slice(),
            Some(Buffer::Pinned(ptr, layout)) => unsafe {
                std::slice::from_raw_parts(*ptr, layout.size())
            },
            None => return Err(Self::err(-6, "enqueue_find: unknown buffer")),
        };

        let mut hits = Vec::new();
        for i in 0..element_count {
            if hits.len() >= max_hits {
                break;
            }
            let start = i * element_stride + member_offset;
            if &bytes[start..start + member_size] == member_value {
                hits.push(i);
            }
        }
        Ok(hits)
    }

    fn flush(&self, _queue: QueueHandle) -> VmaResult<()> {
        Ok(())
    }

    fn finish(&self, _queue: QueueHandle) -> VmaResult<()> {
        Ok(())
    }

    fn event_status(&self, event: EventHandle) -> VmaResult<EventStatus> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .events
            .get(&event.0)
            .copied()
            .unwrap_or(EventStatus::Complete))
    }

    fn release_event(&self, event: EventHandle) -> VmaResult<()> {
        self.state.lock().unwrap().events.remove(&event.0);
        Ok(())
    }
}
