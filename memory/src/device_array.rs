use std::marker::PhantomData;
use std::mem::size_of;
use std::sync::Arc;

use accel::{Accelerator, BufferHandle, ContextHandle};
use systype::VmaResult;

/// One device-resident linear buffer of `T`, sized for a single virtual
/// device's share of the logical array.
///
/// Thin owning wrapper: the buffer handle is what gets passed to transfer
/// and kernel-argument calls, exactly as `ClArray` wraps one `cl_mem`
/// behind a reference count in the source this is based on. Here, a
/// `VirtualDevice` is the buffer's sole owner, so a plain `Drop` releasing
/// the buffer once suffices without shared ownership.
pub struct DeviceArray<T> {
    accel: Arc<dyn Accelerator>,
    context: ContextHandle,
    buffer: BufferHandle,
    capacity: usize,
    _marker: PhantomData<T>,
}

impl<T> DeviceArray<T> {
    /// Allocate a device buffer holding `capacity` elements of `T`.
    pub fn new(accel: Arc<dyn Accelerator>, context: ContextHandle, capacity: usize) -> VmaResult<Self> {
        let buffer = accel.create_device_buffer(context, capacity * size_of::<T>())?;
        Ok(Self {
            accel,
            context,
            buffer,
            capacity,
            _marker: PhantomData,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer
    }

    pub fn context(&self) -> ContextHandle {
        self.context
    }

    pub fn accelerator(&self) -> &Arc<dyn Accelerator> {
        &self.accel
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn byte_len(&self) -> usize {
        self.capacity * size_of::<T>()
    }
}

impl<T> Drop for DeviceArray<T> {
    fn drop(&mut self) {
        if let Err(e) = self.accel.release_buffer(self.context, self.buffer) {
            log::error!("releasing device array buffer: {e}");
        }
    }
}
