use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use accel::{Accelerator, BufferHandle, ContextHandle, QueueHandle};
use memory::PinnedPage;
use systype::VmaResult;

use crate::eviction::EvictionPolicy;

/// The active-page cache owned by one virtual device.
///
/// `access` is the only operation: on a hit it returns the page already
/// shadowing `logical_page` with zero device I/O; on a miss it picks a
/// victim slot via the configured [`EvictionPolicy`] and runs
/// [`PageCache::swap`] to bring the slot up to date before returning it.
pub struct PageCache<T> {
    accel: Arc<dyn Accelerator>,
    queue: QueueHandle,
    buffer: BufferHandle,
    page_size: usize,
    elem_size: usize,
    slots: Vec<PinnedPage<T>>,
    policy: EvictionPolicy,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl<T: Copy> PageCache<T> {
    /// Builds `capacity` active pages and picks a policy from `capacity`
    /// the same way the original's `Cache<T>` constructor does.
    pub fn new(
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        queue: QueueHandle,
        buffer: BufferHandle,
        page_size: usize,
        elem_size: usize,
        capacity: usize,
        pinned: bool,
        alignment: usize,
    ) -> VmaResult<Self> {
        let policy = EvictionPolicy::for_active_pages(capacity);
        Self::with_policy(
            accel, context, queue, buffer, page_size, elem_size, capacity, pinned, alignment, policy,
        )
    }

    /// As [`PageCache::new`], but always selects the CLOCK-2-hand policy
    /// regardless of `capacity`.
    pub fn new_clock(
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        queue: QueueHandle,
        buffer: BufferHandle,
        page_size: usize,
        elem_size: usize,
        capacity: usize,
        pinned: bool,
        alignment: usize,
    ) -> VmaResult<Self> {
        let policy = EvictionPolicy::clock(capacity);
        Self::with_policy(
            accel, context, queue, buffer, page_size, elem_size, capacity, pinned, alignment, policy,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_policy(
        accel: Arc<dyn Accelerator>,
        context: ContextHandle,
        queue: QueueHandle,
        buffer: BufferHandle,
        page_size: usize,
        elem_size: usize,
        capacity: usize,
        pinned: bool,
        alignment: usize,
        policy: EvictionPolicy,
    ) -> VmaResult<Self> {
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            slots.push(PinnedPage::new(accel.clone(), context, page_size, alignment, pinned)?);
        }
        Ok(Self {
            accel,
            queue,
            buffer,
            page_size,
            elem_size,
            slots,
            policy,
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn hit_count(&self) -> usize {
        self.hit_count.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> usize {
        self.miss_count.load(Ordering::Relaxed)
    }

    /// Returns the page shadowing `logical_page`, fetching it first if
    /// necessary. After this returns, the page's `target == logical_page`
    /// and its content matches the device's, up to any edit the caller
    /// makes afterward.
    pub fn access(&mut self, logical_page: usize) -> VmaResult<&mut PinnedPage<T>> {
        if let Some(slot) = self.policy.lookup(logical_page) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            log::trace!("page cache hit: logical page {logical_page} in slot {slot}");
            return Ok(&mut self.slots[slot]);
        }

        self.miss_count.fetch_add(1, Ordering::Relaxed);
        let (slot, evicted) = self.policy.insert(logical_page);
        log::trace!("page cache miss: logical page {logical_page} -> slot {slot} (evicted {evicted:?})");
        self.swap(slot, logical_page)?;
        Ok(&mut self.slots[slot])
    }

    /// Brings `slot` up to date for `new_logical_page`:
    /// 1. if dirty, write the slot's current content back at its old target;
    /// 2. retarget the slot;
    /// 3. issue a non-blocking read of the new target;
    /// 4. flush the queue and spin-wait on the read's completion;
    /// 5. clear the dirty flag.
    fn swap(&mut self, slot: usize, new_logical_page: usize) -> VmaResult<()> {
        let page = &mut self.slots[slot];

        if page.is_edited() {
            if let Some(old_target) = page.frozen_target() {
                let offset = old_target * self.page_size * self.elem_size;
                debug_assert!(config::page::is_aligned_to_page(offset, self.page_size * self.elem_size));
                self.accel
                    .enqueue_write(self.queue, self.buffer, offset, page.as_bytes(), false)?;
            }
        }

        page.set_frozen_target(new_logical_page);

        let read_offset = new_logical_page * self.page_size * self.elem_size;
        debug_assert!(config::page::is_aligned_to_page(read_offset, self.page_size * self.elem_size));
        let event = self
            .accel
            .enqueue_read(self.queue, self.buffer, read_offset, page.as_bytes_mut(), false)?;

        self.accel.flush(self.queue)?;
        self.accel.wait_event(event)?;
        self.accel.release_event(event)?;

        page.reset();
        Ok(())
    }

    /// Write back `slot` if dirty, leaving its target unchanged.
    pub fn flush_slot(&mut self, slot: usize) -> VmaResult<()> {
        let page = &mut self.slots[slot];
        if !page.is_edited() {
            return Ok(());
        }
        let target = page
            .frozen_target()
            .expect("an edited page always has a target");
        let offset = target * self.page_size * self.elem_size;
        debug_assert!(config::page::is_aligned_to_page(offset, self.page_size * self.elem_size));
        let event = self
            .accel
            .enqueue_write(self.queue, self.buffer, offset, page.as_bytes(), false)?;
        self.accel.flush(self.queue)?;
        self.accel.wait_event(event)?;
        self.accel.release_event(event)?;
        page.reset();
        Ok(())
    }

    /// Unconditionally re-download `slot`'s current target, discarding any
    /// buffered edits.
    pub fn reload_slot(&mut self, slot: usize) -> VmaResult<()> {
        let page = &mut self.slots[slot];
        let target = page
            .frozen_target()
            .expect("reload_slot requires a previously targeted page");
        let offset = target * self.page_size * self.elem_size;
        debug_assert!(config::page::is_aligned_to_page(offset, self.page_size * self.elem_size));
        let event = self
            .accel
            .enqueue_read(self.queue, self.buffer, offset, page.as_bytes_mut(), false)?;
        self.accel.flush(self.queue)?;
        self.accel.wait_event(event)?;
        self.accel.release_event(event)?;
        page.reset();
        Ok(())
    }

    /// Write back every dirty active slot, irrespective of recency.
    pub fn flush_all(&mut self) -> VmaResult<()> {
        for slot in 0..self.slots.len() {
            self.flush_slot(slot)?;
        }
        Ok(())
    }

    /// Reload every active slot that currently has a target, discarding
    /// buffered edits; used by `streamStop`.
    pub fn reload_all(&mut self) -> VmaResult<()> {
        for slot in 0..self.slots.len() {
            if self.slots[slot].frozen_target().is_some() {
                self.reload_slot(slot)?;
            }
        }
        Ok(())
    }

    pub fn slot(&self, index: usize) -> &PinnedPage<T> {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut PinnedPage<T> {
        &mut self.slots[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel::host::HostAccelerator;

    fn harness(page_size: usize, elem_size: usize, n_pages: usize, capacity: usize) -> PageCache<u32> {
        let _ = env_logger::builder().is_test(true).try_init();
        let accel: Arc<dyn Accelerator> = Arc::new(HostAccelerator::new());
        let device = accel.enumerate_devices(accel.enumerate_platforms().unwrap()[0]).unwrap()[0].clone();
        let context = accel.create_context(&device).unwrap();
        let queue = accel.create_queue(context).unwrap();
        let buffer = accel
            .create_device_buffer(context, n_pages * page_size * elem_size)
            .unwrap();
        PageCache::new(accel, context, queue, buffer, page_size, elem_size, capacity, false, 64).unwrap()
    }

    #[test]
    fn direct_policy_round_trips_a_single_page() {
        let mut cache = harness(4, 4, 8, 1);
        {
            let page = cache.access(2).unwrap();
            page.set(0, 99);
        }
        // force eviction by touching a different page, then come back
        cache.access(5).unwrap();
        let page = cache.access(2).unwrap();
        assert_eq!(page.get(0), 99);
    }

    #[test]
    fn repeated_access_is_a_cache_hit() {
        let mut cache = harness(4, 4, 8, 4);
        cache.access(1).unwrap();
        let misses_before = cache.miss_count();
        cache.access(1).unwrap();
        assert_eq!(cache.miss_count(), misses_before);
        assert!(cache.hit_count() >= 1);
    }

    #[test]
    fn eviction_writes_back_dirty_victim_before_reuse() {
        let mut cache = harness(4, 4, 8, 2);
        cache.access(0).unwrap().set(0, 111);
        cache.access(1).unwrap();
        cache.access(2).unwrap(); // evicts page 0's slot (or page 1's)

        // whichever of 0/1 got evicted, re-accessing it must show the
        // write-back, not a stale device zero-fill.
        let value_at_zero = cache.access(0).unwrap().get(0);
        assert_eq!(value_at_zero, 111);
    }

    #[test]
    fn scalable_policy_selected_for_large_active_page_counts() {
        let cache = harness(4, 4, 64, 16);
        assert_eq!(cache.capacity(), 16);
    }

    #[test]
    fn clock_policy_round_trips_like_any_other_policy() {
        let _ = env_logger::builder().is_test(true).try_init();
        let accel: Arc<dyn Accelerator> = Arc::new(HostAccelerator::new());
        let device = accel.enumerate_devices(accel.enumerate_platforms().unwrap()[0]).unwrap()[0].clone();
        let context = accel.create_context(&device).unwrap();
        let queue = accel.create_queue(context).unwrap();
        let buffer = accel.create_device_buffer(context, 8 * 4 * 4).unwrap();
        let mut cache: PageCache<u32> =
            PageCache::new_clock(accel, context, queue, buffer, 4, 4, 2, false, 64).unwrap();

        cache.access(0).unwrap().set(0, 55);
        cache.access(1).unwrap();
        cache.access(2).unwrap(); // forces an eviction under the clock policy too
        assert_eq!(cache.access(0).unwrap().get(0), 55);
    }
}
