use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use engineport_core::{DeviceDescriptor, DeviceDriver, DeviceError};

/// Owns the driver and serializes device switches. The active device is
/// process-wide state, so a switch and the work that depends on it must
/// happen under one guard.
pub struct DeviceContext {
    driver: Arc<dyn DeviceDriver>,
    lock: Mutex<()>,
}

impl DeviceContext {
    pub fn new(driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            lock: Mutex::new(()),
        }
    }

    pub fn driver(&self) -> &dyn DeviceDriver {
        self.driver.as_ref()
    }

    pub fn lock(&self) -> DeviceGuard<'_> {
        // The guarded data is `()`, so a poisoned lock carries no broken state.
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        DeviceGuard {
            driver: self.driver.as_ref(),
            _guard: guard,
        }
    }

    pub fn current(&self) -> Result<DeviceDescriptor, DeviceError> {
        self.lock().current()
    }
}

pub struct DeviceGuard<'a> {
    driver: &'a dyn DeviceDriver,
    _guard: MutexGuard<'a, ()>,
}

impl DeviceGuard<'_> {
    pub fn driver(&self) -> &dyn DeviceDriver {
        self.driver
    }

    pub fn set_device(&self, device_id: i32) -> Result<(), DeviceError> {
        self.driver.set_device(device_id)
    }

    /// Id and capability of the active device.
    pub fn current(&self) -> Result<DeviceDescriptor, DeviceError> {
        let id = self.driver.current_device()?;
        self.driver.properties(id)
    }
}
