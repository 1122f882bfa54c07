use std::collections::BTreeMap;
use std::fmt::Write;

use engineport_core::{Capability, DeviceDescriptor, DeviceDriver, DeviceError};
use tracing::{debug, warn};

/// Devices visible at startup, keyed by id.
#[derive(Clone, Debug, Default)]
pub struct DeviceList {
    devices: BTreeMap<i32, DeviceDescriptor>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries the driver once. A driver that cannot report its devices
    /// yields an empty list.
    pub fn enumerate(driver: &dyn DeviceDriver) -> Self {
        let mut list = Self::new();
        let count = match driver.device_count() {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "unable to read accelerator devices");
                return list;
            }
        };

        for id in 0..count {
            match driver.properties(id) {
                Ok(device) => list.insert(id, device),
                Err(err) => warn!(device_id = id, error = %err, "skipping device"),
            }
        }
        debug!("available devices:\n{}", list.dump_list());
        list
    }

    pub fn insert(&mut self, device_id: i32, device: DeviceDescriptor) {
        self.devices.insert(device_id, device);
    }

    pub fn find(&self, device_id: i32) -> Result<DeviceDescriptor, DeviceError> {
        self.devices
            .get(&device_id)
            .copied()
            .ok_or(DeviceError::NotFound(device_id))
    }

    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.values().copied().collect()
    }

    pub fn supports(&self, device_id: i32, built_for: Capability) -> Result<bool, DeviceError> {
        Ok(self.find(device_id)?.capability().can_run(built_for))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// One indented line per device.
    pub fn dump_list(&self) -> String {
        let mut out = String::new();
        for device in self.devices.values() {
            let _ = writeln!(out, "    {device}");
        }
        out
    }
}
