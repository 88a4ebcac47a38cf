use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::mem::size_of;
use std::sync::Arc;

use accel::{Accelerator, BufferHandle, ContextHandle, HostPtr};
use systype::{AcceleratorError, VmaResult};

/// One page-sized host shadow of a logical page: `page_size` elements of
/// `T`, an `edited` flag, and the local logical page index it currently
/// holds (`None` until first targeted, matching the original's
/// `targetGpuPage = -1` sentinel).
///
/// Carries no locking of its own; whoever owns the slot (a `PageCache`
/// entry inside a `VirtualDevice`) is expected to serialize access, same
/// as the original's `Page<T>`.
pub struct PinnedPage<T> {
    storage: Storage<T>,
    page_size: usize,
    edited: bool,
    target_frozen_page: Option<usize>,
}

enum Storage<T> {
    Pinned {
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        buffer: BufferHandle,
        ptr: *mut T,
    },
    Plain {
        ptr: *mut T,
        layout: Layout,
    },
}

// Safety: the raw pointer is only ever touched through `&self`/`&mut self`
// methods on `PinnedPage`, and callers already serialize all access to a
// page (see module docs), so moving a page across threads is sound.
unsafe impl<T: Send> Send for Storage<T> {}

impl<T: Copy> PinnedPage<T> {
    /// Allocate a fresh page of `page_size` elements.
    ///
    /// When `pinned`, allocation goes through the accelerator's
    /// host-pinned-buffer path so the resulting address is page-locked
    /// and DMA-friendly; otherwise a plain allocation aligned to
    /// `alignment` bytes is used. Either way the memory starts
    /// zero-filled.
    pub fn new(
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        page_size: usize,
        alignment: usize,
        pinned: bool,
    ) -> VmaResult<Self> {
        let bytes = page_size * size_of::<T>();
        let storage = if pinned {
            let (buffer, HostPtr(ptr)) = accel.create_host_pinned_buffer(context, bytes)?;
            Storage::Pinned {
                accel,
                context,
                buffer,
                ptr: ptr as *mut T,
            }
        } else {
            let layout = Layout::from_size_align(bytes.max(1), alignment).map_err(|_| {
                AcceleratorError::new(-1, "PinnedPage::new: invalid layout")
            })?;
            let ptr = unsafe { alloc_zeroed(layout) } as *mut T;
            if ptr.is_null() {
                return Err(systype::VmaError::Resource(
                    "host page allocation failed".into(),
                ));
            }
            Storage::Plain { ptr, layout }
        };

        Ok(Self {
            storage,
            page_size,
            edited: false,
            target_frozen_page: None,
        })
    }

    fn ptr(&self) -> *const T {
        match &self.storage {
            Storage::Pinned { ptr, .. } => *ptr,
            Storage::Plain { ptr, .. } => *ptr,
        }
    }

    fn ptr_mut(&mut self) -> *mut T {
        match &mut self.storage {
            Storage::Pinned { ptr, .. } => *ptr,
            Storage::Plain { ptr, .. } => *ptr,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn get(&self, i: usize) -> T {
        debug_assert!(i < self.page_size);
        unsafe { *self.ptr().add(i) }
    }

    pub fn set(&mut self, i: usize, v: T) {
        debug_assert!(i < self.page_size);
        unsafe { *self.ptr_mut().add(i) = v };
        self.edited = true;
    }

    /// Writes an element without marking the page dirty, for the
    /// uncached path: a raw pointer poke straight into a slot's storage,
    /// bypassing the normal edit-tracking/write-back discipline because
    /// the caller is about to push the value to the device directly.
    pub fn poke(&mut self, i: usize, v: T) {
        debug_assert!(i < self.page_size);
        unsafe { *self.ptr_mut().add(i) = v };
    }

    /// Whole-page typed view, used by callers that map an entire page as
    /// one scratch buffer (the multi-array's mapped-region access) rather
    /// than copying element ranges in and out.
    pub fn as_slice(&self) -> &[T] {
        unsafe { std::slice::from_raw_parts(self.ptr(), self.page_size) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr_mut(), self.page_size) }
    }

    pub fn get_range(&self, i: usize, n: usize) -> Vec<T> {
        debug_assert!(i + n <= self.page_size);
        let slice = unsafe { std::slice::from_raw_parts(self.ptr().add(i), n) };
        slice.to_vec()
    }

    pub fn set_range(&mut self, i: usize, src: &[T], src_offset: usize, n: usize) {
        debug_assert!(i + n <= self.page_size);
        let dst = unsafe { std::slice::from_raw_parts_mut(self.ptr_mut().add(i), n) };
        dst.copy_from_slice(&src[src_offset..src_offset + n]);
        self.edited = true;
    }

    pub fn read_into(&self, dst: &mut [T], i: usize, n: usize) {
        debug_assert!(i + n <= self.page_size);
        let src = unsafe { std::slice::from_raw_parts(self.ptr().add(i), n) };
        dst[..n].copy_from_slice(src);
    }

    pub fn write_from(&mut self, src: &[T], i: usize, n: usize) {
        debug_assert!(i + n <= self.page_size);
        let dst = unsafe { std::slice::from_raw_parts_mut(self.ptr_mut().add(i), n) };
        dst.copy_from_slice(&src[..n]);
        self.edited = true;
    }

    pub fn mark_edited(&mut self) {
        self.edited = true;
    }

    pub fn is_edited(&self) -> bool {
        self.edited
    }

    /// Clears `edited`, used after a fresh download from the frozen page.
    pub fn reset(&mut self) {
        self.edited = false;
    }

    pub fn set_frozen_target(&mut self, p: usize) {
        self.target_frozen_page = Some(p);
    }

    pub fn frozen_target(&self) -> Option<usize> {
        self.target_frozen_page
    }

    /// Byte view for transfer APIs (`Accelerator::enqueue_write`).
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr() as *const u8, self.page_size * size_of::<T>()) }
    }

    /// Mutable byte view for transfer APIs (`Accelerator::enqueue_read`).
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.page_size * size_of::<T>();
        unsafe { std::slice::from_raw_parts_mut(self.ptr_mut() as *mut u8, len) }
    }
}

impl<T> Drop for PinnedPage<T> {
    fn drop(&mut self) {
        match &self.storage {
            Storage::Pinned {
                accel,
                context,
                buffer,
                ..
            } => {
                if let Err(e) = accel.release_buffer(*context, *buffer) {
                    log::error!("releasing pinned page buffer: {e}");
                }
            }
            Storage::Plain { ptr, layout } => unsafe { dealloc(*ptr as *mut u8, *layout) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel::host::HostAccelerator;
    use rstest::rstest;

    fn context() -> (Arc<dyn Accelerator>, ContextHandle) {
        let _ = env_logger::builder().is_test(true).try_init();
        let accel: Arc<dyn Accelerator> = Arc::new(HostAccelerator::new());
        let device = &accel.enumerate_devices(accel.enumerate_platforms().unwrap()[0]).unwrap()[0].clone();
        let context = accel.create_context(device).unwrap();
        (accel, context)
    }

    #[test]
    fn plain_page_round_trips_and_tracks_edited() {
        let (accel, context) = context();
        let mut page: PinnedPage<u32> = PinnedPage::new(accel, context, 16, 4096, false).unwrap();
        assert!(!page.is_edited());
        page.set(3, 42);
        assert!(page.is_edited());
        assert_eq!(page.get(3), 42);
        page.reset();
        assert!(!page.is_edited());
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn pinned_page_round_trips(#[case] pinned: bool) {
        let (accel, context) = context();
        let mut page: PinnedPage<u64> = PinnedPage::new(accel, context, 8, 4096, pinned).unwrap();
        page.set_range(0, &[1, 2, 3, 4], 0, 4);
        assert_eq!(page.get_range(0, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn frozen_target_starts_unbound() {
        let (accel, context) = context();
        let mut page: PinnedPage<u8> = PinnedPage::new(accel, context, 4, 4096, false).unwrap();
        assert_eq!(page.frozen_target(), None);
        page.set_frozen_target(7);
        assert_eq!(page.frozen_target(), Some(7));
    }
}
