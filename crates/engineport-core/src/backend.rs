use bytes::Bytes;

use crate::{
    BackendError, BindingSpec, BuildConfig, BuildError, Capability, DeviceDescriptor,
    EngineArtifact, Network, Tensor,
};

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    pub supports_dynamic_shapes: bool,
    pub max_rank: usize,
}

/// Compiles a finished network into an opaque engine. Blocking; not retried.
pub trait EngineBuilder: Send + Sync {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> BackendCapabilities;
    fn build(
        &self,
        network: &Network,
        config: &BuildConfig,
        device: &DeviceDescriptor,
    ) -> Result<EngineArtifact, BuildError>;
}

/// Hands out one runtime per execution engine.
pub trait RuntimeFactory: Send + Sync {
    fn create_runtime(&self) -> Result<Box<dyn InferRuntime>, BackendError>;
}

pub trait InferRuntime: Send {
    fn deserialize_engine(&self, blob: &[u8]) -> Result<Box<dyn Engine>, BackendError>;
}

pub trait Engine: Send + Sync {
    fn num_bindings(&self) -> usize;
    fn binding(&self, slot: usize) -> Option<&BindingSpec>;

    /// Capability the engine was compiled for, when the format records it.
    fn built_for(&self) -> Option<Capability>;

    fn serialize(&self) -> Result<Bytes, BackendError>;
    fn create_execution_context(&self) -> Result<Box<dyn ExecutionContext>, BackendError>;
}

pub trait ExecutionContext: Send {
    /// `slots` is indexed by physical binding slot. Input slots arrive filled;
    /// output slots are filled in.
    fn execute(&mut self, slots: &mut [Option<Tensor>]) -> Result<(), BackendError>;
}
