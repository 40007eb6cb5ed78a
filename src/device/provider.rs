//! Sources of devices.

use super::Device;
use crate::error::Result;
use parking_lot::Mutex;
use tracing::debug;

/// Something that can list devices, such as a platform backend.
///
/// A monitor calls [`probe`](DeviceProvider::probe) from its polling thread
/// between [`start`](DeviceProvider::start) and
/// [`stop`](DeviceProvider::stop).
pub trait DeviceProvider: Send + Sync {
    /// Name, for diagnostics.
    fn name(&self) -> &str;

    /// Devices present right now.
    fn probe(&self) -> Vec<Device>;

    /// Prepare for probing.
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Release whatever `start` acquired.
    fn stop(&self) {}
}

/// In-memory provider; devices are plugged and unplugged by hand.
///
/// Useful in tests and for applications that learn about devices from
/// elsewhere.
#[derive(Debug)]
pub struct VirtualDeviceProvider {
    name: String,
    devices: Mutex<Vec<Device>>,
}

impl VirtualDeviceProvider {
    /// Create a provider without devices.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Plug a device in.
    pub fn add(&self, device: Device) {
        debug!(provider = %self.name, device = %device.display_name(), "device plugged");
        self.devices.lock().push(device);
    }

    /// Unplug a device; false if it was not plugged.
    pub fn remove(&self, device: &Device) -> bool {
        let mut devices = self.devices.lock();
        let before = devices.len();
        devices.retain(|d| d != device);
        let removed = devices.len() != before;
        if removed {
            debug!(provider = %self.name, device = %device.display_name(), "device unplugged");
        }
        removed
    }
}

impl DeviceProvider for VirtualDeviceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn probe(&self) -> Vec<Device> {
        self.devices.lock().clone()
    }
}
