//! Enumerates every GPU-class device across every platform once, at
//! construction time. Grounded on `GraphicsCardSupplyDepot`: a one-shot
//! scan whose result `VirtualMultiArray` consumes to pick physical
//! devices and size virtual devices against reported VRAM.

use std::sync::Arc;

use accel::{Accelerator, DeviceInfo};
use systype::VmaResult;

/// A one-shot snapshot of every device visible across every enumerated
/// platform. Holds no state beyond that snapshot.
pub struct DeviceDepot {
    devices: Vec<DeviceInfo>,
}

impl DeviceDepot {
    pub fn survey(accel: &Arc<dyn Accelerator>) -> VmaResult<Self> {
        let mut devices = Vec::new();
        for platform in accel.enumerate_platforms()? {
            devices.extend(accel.enumerate_devices(platform)?);
        }
        log::info!("device depot surveyed {} device(s)", devices.len());
        Ok(Self { devices })
    }

    /// The devices found at survey time, in enumeration order.
    pub fn request_gpus(&self) -> &[DeviceInfo] {
        &self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel::host::HostAccelerator;

    #[test]
    fn survey_reports_every_configured_device() {
        let _ = env_logger::builder().is_test(true).try_init();
        let accel: Arc<dyn Accelerator> = Arc::new(HostAccelerator::with_devices(vec![4, 8, 16]));
        let depot = DeviceDepot::survey(&accel).unwrap();
        assert_eq!(depot.request_gpus().len(), 3);
        assert_eq!(depot.request_gpus()[2].vram_gb, 16);
    }
}
