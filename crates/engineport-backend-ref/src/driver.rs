use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use engineport_core::{DeviceDescriptor, DeviceDriver, DeviceError};

/// In-process stand-in for an accelerator driver. Device ids are positions
/// in the list given at construction.
#[derive(Debug)]
pub struct SimulatedDriver {
    devices: Vec<DeviceDescriptor>,
    current: AtomicI32,
    switches: AtomicUsize,
}

impl SimulatedDriver {
    /// One device per `(major, minor)` capability.
    pub fn new(capabilities: &[(i32, i32)]) -> Self {
        let devices = capabilities
            .iter()
            .enumerate()
            .map(|(id, &(major, minor))| DeviceDescriptor::new(id as i32, major, minor))
            .collect();
        Self {
            devices,
            current: AtomicI32::new(0),
            switches: AtomicUsize::new(0),
        }
    }

    /// Number of `set_device` calls so far.
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    fn lookup(&self, call: &'static str, device_id: i32) -> Result<DeviceDescriptor, DeviceError> {
        usize::try_from(device_id)
            .ok()
            .and_then(|i| self.devices.get(i))
            .copied()
            .ok_or_else(|| DeviceError::Driver {
                call,
                device_id,
                message: format!("invalid device ordinal ({} devices)", self.devices.len()),
            })
    }
}

impl DeviceDriver for SimulatedDriver {
    fn device_count(&self) -> Result<i32, DeviceError> {
        Ok(self.devices.len() as i32)
    }

    fn properties(&self, device_id: i32) -> Result<DeviceDescriptor, DeviceError> {
        self.lookup("properties", device_id)
    }

    fn set_device(&self, device_id: i32) -> Result<(), DeviceError> {
        self.lookup("set_device", device_id)?;
        self.current.store(device_id, Ordering::SeqCst);
        self.switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn current_device(&self) -> Result<i32, DeviceError> {
        Ok(self.current.load(Ordering::SeqCst))
    }
}
