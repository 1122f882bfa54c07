use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{DeviceDescriptor, PayloadError};

/// Output of an engine build: the opaque engine plus the device it targets.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineArtifact {
    pub engine: Bytes,
    pub device: DeviceDescriptor,
}

impl EngineArtifact {
    pub fn new(device: DeviceDescriptor, engine: Bytes) -> Self {
        Self { engine, device }
    }

    pub fn to_payload(&self) -> EnginePayload {
        EnginePayload {
            device_info: self.device.encode(),
            engine: self.engine.clone(),
        }
    }
}

/// Persisted two-part form: device record first, engine second. An empty
/// `device_info` is the legacy form (load on whatever device is active).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnginePayload {
    pub device_info: Bytes,
    pub engine: Bytes,
}

impl EnginePayload {
    pub fn legacy(engine: Bytes) -> Self {
        Self {
            device_info: Bytes::new(),
            engine,
        }
    }

    pub fn into_parts(self) -> [Bytes; 2] {
        [self.device_info, self.engine]
    }

    pub fn from_parts([device_info, engine]: [Bytes; 2]) -> Self {
        Self {
            device_info,
            engine,
        }
    }

    /// File layout: `u32` little-endian device part length, device part,
    /// engine part.
    pub fn to_file_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + self.device_info.len() + self.engine.len());
        buf.put_u32_le(self.device_info.len() as u32);
        buf.put_slice(&self.device_info);
        buf.put_slice(&self.engine);
        buf.freeze()
    }

    pub fn from_file_bytes(mut bytes: Bytes) -> Result<Self, PayloadError> {
        if bytes.remaining() < 4 {
            return Err(PayloadError::Truncated {
                offset: 0,
                needed: 4 - bytes.remaining(),
            });
        }
        let device_len = bytes.get_u32_le() as usize;
        if bytes.remaining() < device_len {
            return Err(PayloadError::Truncated {
                offset: 4,
                needed: device_len - bytes.remaining(),
            });
        }
        let device_info = bytes.split_to(device_len);
        Ok(Self {
            device_info,
            engine: bytes,
        })
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_file_bytes())
    }
}
