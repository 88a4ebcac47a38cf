use std::collections::HashMap;
use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use accel::{Accelerator, ContextHandle, DeviceInfo, KernelHandle, QueueHandle};
use memory::DeviceArray;
use page::PageCache;
use systype::VmaResult;

/// One virtual accelerator: a device-resident slice of the logical array,
/// fronted by a page cache of `active_pages` host-resident shadows.
///
/// All indices this type's methods take are *local*: element `0` is this
/// device's first element, not the logical array's. `VirtualMultiArray`
/// is responsible for translating.
pub struct VirtualDevice<T> {
    accel: Arc<dyn Accelerator>,
    context: ContextHandle,
    queue: QueueHandle,
    array: DeviceArray<T>,
    cache: PageCache<T>,
    page_size: usize,
    find_kernels: HashMap<(usize, usize), KernelHandle>,
    _marker: PhantomData<T>,
}

impl<T: Copy> VirtualDevice<T> {
    /// Builds a fresh context for `device`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accel: Arc<dyn Accelerator>,
        device: &DeviceInfo,
        capacity_elements: usize,
        page_size: usize,
        active_pages: usize,
        pinned: bool,
        alignment: usize,
    ) -> VmaResult<Self> {
        let context = accel.create_context(device)?;
        Self::build(accel, context, capacity_elements, page_size, active_pages, pinned, alignment)
    }

    /// Clones onto `shared_context`, so this virtual device's queue can
    /// overlap transfers with others derived from the same physical
    /// device.
    #[allow(clippy::too_many_arguments)]
    pub fn new_sharing_context(
        accel: Arc<dyn Accelerator>,
        shared_context: ContextHandle,
        capacity_elements: usize,
        page_size: usize,
        active_pages: usize,
        pinned: bool,
        alignment: usize,
    ) -> VmaResult<Self> {
        let context = accel.clone_context(shared_context)?;
        Self::build(accel, context, capacity_elements, page_size, active_pages, pinned, alignment)
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        capacity_elements: usize,
        page_size: usize,
        active_pages: usize,
        pinned: bool,
        alignment: usize,
    ) -> VmaResult<Self> {
        let queue = accel.create_queue(context)?;
        let array = DeviceArray::new(accel.clone(), context, capacity_elements)?;
        let cache = PageCache::new(
            accel.clone(),
            context,
            queue,
            array.handle(),
            page_size,
            size_of::<T>(),
            active_pages,
            pinned,
            alignment,
        )?;
        Ok(Self {
            accel,
            context,
            queue,
            array,
            cache,
            page_size,
            find_kernels: HashMap::new(),
            _marker: PhantomData,
        })
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn capacity(&self) -> usize {
        self.array.capacity()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn active_pages(&self) -> usize {
        self.cache.capacity()
    }

    pub fn hit_count(&self) -> usize {
        self.cache.hit_count()
    }

    pub fn miss_count(&self) -> usize {
        self.cache.miss_count()
    }

    pub fn get(&mut self, i: usize) -> VmaResult<T> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        Ok(self.cache.access(logical_page)?.get(offset))
    }

    pub fn set(&mut self, i: usize, v: T) -> VmaResult<()> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        self.cache.access(logical_page)?.set(offset, v);
        Ok(())
    }

    /// Caller guarantees `i + n <= page_size`.
    pub fn get_range(&mut self, i: usize, n: usize) -> VmaResult<Vec<T>> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        Ok(self.cache.access(logical_page)?.get_range(offset, n))
    }

    pub fn set_range(&mut self, i: usize, src: &[T], src_offset: usize, n: usize) -> VmaResult<()> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        self.cache.access(logical_page)?.set_range(offset, src, src_offset, n);
        Ok(())
    }

    pub fn copy_to_buffer(&mut self, i: usize, n: usize, out: &mut [T]) -> VmaResult<()> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        self.cache.access(logical_page)?.read_into(out, offset, n);
        Ok(())
    }

    pub fn copy_from_buffer(&mut self, i: usize, n: usize, src: &[T]) -> VmaResult<()> {
        let page = self.page_size;
        let logical_page = i / page;
        let offset = i % page;
        self.cache.access(logical_page)?.write_from(src, offset, n);
        Ok(())
    }

    /// Transfers exactly one element between the device and a scratch
    /// active-page slot, bypassing the cache entirely. Well-defined only
    /// inside a `streamStart … streamStop` bracket at the multi-array
    /// level, which has already flushed/invalidated the cache around it.
    pub fn get_uncached(&mut self, i: usize) -> VmaResult<T> {
        let selected_page = i / self.page_size;
        let selected_active_page = selected_page % self.cache.capacity();
        let offset = (selected_page * self.page_size + i % self.page_size) * size_of::<T>();
        let elem_size = size_of::<T>();

        let page = self.cache.slot_mut(selected_active_page);
        let event = self
            .accel
            .enqueue_read(self.queue, self.array.handle(), offset, &mut page.as_bytes_mut()[..elem_size], false)?;
        self.accel.flush(self.queue)?;
        self.accel.wait_event(event)?;
        self.accel.release_event(event)?;
        Ok(page.get(0))
    }

    pub fn set_uncached(&mut self, i: usize, v: T) -> VmaResult<()> {
        let selected_page = i / self.page_size;
        let selected_active_page = selected_page % self.cache.capacity();
        let offset = (selected_page * self.page_size + i % self.page_size) * size_of::<T>();
        let elem_size = size_of::<T>();

        let page = self.cache.slot_mut(selected_active_page);
        page.poke(0, v);
        let event = self
            .accel
            .enqueue_write(self.queue, self.array.handle(), offset, &page.as_bytes()[..elem_size], false)?;
        self.accel.flush(self.queue)?;
        self.accel.wait_event(event)?;
        self.accel.release_event(event)?;
        Ok(())
    }

    pub fn flush_page(&mut self, slot: usize) -> VmaResult<()> {
        self.cache.flush_slot(slot)
    }

    pub fn reload_page(&mut self, slot: usize) -> VmaResult<()> {
        self.cache.reload_slot(slot)
    }

    pub fn flush_all_pages(&mut self) -> VmaResult<()> {
        self.cache.flush_all()
    }

    pub fn reload_all_pages(&mut self) -> VmaResult<()> {
        self.cache.reload_all()
    }

    /// Scans all `capacity()` elements for a byte-equality match on the
    /// member at `member_offset`, flushing every active page first so the
    /// device content is authoritative. `id` distinguishes this virtual
    /// device's kernel when several share one context (only meaningful to
    /// backends that name kernels per caller; the host reference backend
    /// does not need it).
    pub fn find(
        &mut self,
        member_offset: usize,
        member_value: &[u8],
        id: usize,
        max_hits: usize,
    ) -> VmaResult<Vec<usize>> {
        let _ = id;
        self.cache.flush_all()?;

        let key = (member_offset, member_value.len());
        let kernel = match self.find_kernels.get(&key) {
            Some(&k) => k,
            None => {
                let k = self.accel.build_find_kernel(self.context, member_offset, member_value.len())?;
                self.find_kernels.insert(key, k);
                k
            }
        };

        self.accel.enqueue_find(
            self.queue,
            kernel,
            self.array.handle(),
            size_of::<T>(),
            self.array.capacity(),
            member_value,
            max_hits,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel::host::HostAccelerator;
    use rstest::rstest;

    fn device(capacity: usize, page_size: usize, active_pages: usize) -> VirtualDevice<u32> {
        let _ = env_logger::builder().is_test(true).try_init();
        let accel: Arc<dyn Accelerator> = Arc::new(HostAccelerator::new());
        let info = accel.enumerate_devices(accel.enumerate_platforms().unwrap()[0]).unwrap()[0].clone();
        VirtualDevice::new(accel, &info, capacity, page_size, active_pages, false, 64).unwrap()
    }

    #[test]
    fn get_set_round_trip_within_a_page() {
        let mut d = device(16, 4, 2);
        d.set(5, 123).unwrap();
        assert_eq!(d.get(5).unwrap(), 123);
    }

    // Exercises all three eviction policies (direct, small-array, scalable)
    // through the same get/set round trip by varying `active_pages` across
    // their selection thresholds (see `page::EvictionPolicy::for_active_pages`).
    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(12)]
    #[case(13)]
    #[case(32)]
    fn get_set_round_trip_across_eviction_policies(#[case] active_pages: usize) {
        let mut d = device(64, 4, active_pages);
        for i in 0..64usize {
            d.set(i, (i * 7) as u32).unwrap();
        }
        for i in 0..64usize {
            assert_eq!(d.get(i).unwrap(), (i * 7) as u32);
        }
    }

    #[test]
    fn range_round_trip_within_a_page() {
        let mut d = device(16, 8, 2);
        d.set_range(1, &[9, 8, 7], 0, 3).unwrap();
        assert_eq!(d.get_range(1, 3).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn uncached_path_sees_cached_writes_once_flushed() {
        let mut d = device(16, 4, 2);
        d.set(2, 77).unwrap();
        d.flush_all_pages().unwrap();
        assert_eq!(d.get_uncached(2).unwrap(), 77);
    }

    #[test]
    fn find_locates_matching_elements() {
        let mut d = device(8, 4, 4);
        for i in 0..8u32 {
            d.set(i as usize, i % 2).unwrap();
        }
        let bytes = 0u32.to_le_bytes();
        let hits = d.find(0, &bytes, 0, 100).unwrap();
        assert_eq!(hits, vec![0, 2, 4, 6]);
    }
}
