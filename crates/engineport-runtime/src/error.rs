use engineport_core::{
    BackendError, Capability, DeviceDescriptor, DeviceError, MalformedBindingName,
    MalformedDeviceRecord,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine was built for {built_for}, which {device} cannot run")]
    DeviceMismatch {
        device: DeviceDescriptor,
        built_for: Capability,
    },

    #[error(transparent)]
    MalformedBindingName(#[from] MalformedBindingName),

    #[error("invalid engine device metadata: {0}")]
    MalformedDeviceRecord(#[from] MalformedDeviceRecord),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("binding `{name}` has logical index {index}: {reason}")]
    BindingIndex {
        name: String,
        index: usize,
        reason: &'static str,
    },

    #[error("engine expects {expected} inputs, got {got}")]
    InputCount { expected: usize, got: usize },

    #[error("engine produced no tensor for output {index}")]
    MissingOutput { index: usize },

    #[error("engine worker has shut down")]
    WorkerClosed,
}
