use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::{DeviceError, MalformedDeviceRecord};

/// Size of the encoded device record: id, major, minor as host-endian `i32`.
pub const DEVICE_RECORD_LEN: usize = 12;

/// Compute capability. Ordering is lexicographic on (major, minor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Capability {
    pub major: i32,
    pub minor: i32,
}

impl Capability {
    pub fn new(major: i32, minor: i32) -> Self {
        Self { major, minor }
    }

    /// Default compatibility rule: a device runs engines built for its own or
    /// an older capability.
    pub fn can_run(self, built_for: Capability) -> bool {
        self >= built_for
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sm_{}.{}", self.major, self.minor)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub device_id: i32,
    pub major: i32,
    pub minor: i32,
}

impl DeviceDescriptor {
    pub fn new(device_id: i32, major: i32, minor: i32) -> Self {
        Self {
            device_id,
            major,
            minor,
        }
    }

    pub fn capability(&self) -> Capability {
        Capability::new(self.major, self.minor)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DEVICE_RECORD_LEN);
        buf.put_i32_ne(self.device_id);
        buf.put_i32_ne(self.major);
        buf.put_i32_ne(self.minor);
        buf.freeze()
    }

    pub fn decode(record: &[u8]) -> Result<Self, MalformedDeviceRecord> {
        if record.len() != DEVICE_RECORD_LEN {
            return Err(MalformedDeviceRecord {
                expected: DEVICE_RECORD_LEN,
                len: record.len(),
            });
        }
        let mut buf = record;
        let device_id = buf.get_i32_ne();
        let major = buf.get_i32_ne();
        let minor = buf.get_i32_ne();
        Ok(Self::new(device_id, major, minor))
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device(id: {}, {})", self.device_id, self.capability())
    }
}

/// Accelerator driver. `set_device` changes process-wide state; callers go
/// through a device context that serializes switches.
pub trait DeviceDriver: Send + Sync {
    fn device_count(&self) -> Result<i32, DeviceError>;
    fn properties(&self, device_id: i32) -> Result<DeviceDescriptor, DeviceError>;
    fn set_device(&self, device_id: i32) -> Result<(), DeviceError>;
    fn current_device(&self) -> Result<i32, DeviceError>;

    fn supports(&self, device: &DeviceDescriptor, built_for: Capability) -> bool {
        device.capability().can_run(built_for)
    }
}
