use std::sync::Arc;

use bytes::Bytes;
use engineport_core::{
    BackendError, BindingSpec, Capability, Engine, ExecutionContext, InferRuntime,
    RuntimeFactory, Tensor,
};
use tracing::debug;

use crate::{interpreter, EnginePlan, PLAN_FORMAT_VERSION};

/// Deserializes reference plans. Also its own factory: every execution
/// engine gets a fresh runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefRuntime;

impl RefRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl RuntimeFactory for RefRuntime {
    fn create_runtime(&self) -> Result<Box<dyn InferRuntime>, BackendError> {
        Ok(Box::new(RefRuntime))
    }
}

impl InferRuntime for RefRuntime {
    fn deserialize_engine(&self, blob: &[u8]) -> Result<Box<dyn Engine>, BackendError> {
        let plan = EnginePlan::from_json(blob).map_err(|e| BackendError::Deserialize(e.to_string()))?;
        if plan.format_version != PLAN_FORMAT_VERSION {
            return Err(BackendError::Deserialize(format!(
                "plan format {} is not supported (expected {PLAN_FORMAT_VERSION})",
                plan.format_version
            )));
        }
        plan.validate()?;
        debug!(engine = %plan.engine_name, built_for = %plan.built_for, "deserialized plan");
        Ok(Box::new(RefEngine {
            plan: Arc::new(plan),
            blob: Bytes::copy_from_slice(blob),
        }))
    }
}

pub struct RefEngine {
    plan: Arc<EnginePlan>,
    blob: Bytes,
}

impl RefEngine {
    pub fn plan(&self) -> &EnginePlan {
        &self.plan
    }
}

impl Engine for RefEngine {
    fn num_bindings(&self) -> usize {
        self.plan.bindings.len()
    }

    fn binding(&self, slot: usize) -> Option<&BindingSpec> {
        self.plan.bindings.get(slot).map(|b| &b.spec)
    }

    fn built_for(&self) -> Option<Capability> {
        Some(self.plan.built_for)
    }

    fn serialize(&self) -> Result<Bytes, BackendError> {
        Ok(self.blob.clone())
    }

    fn create_execution_context(&self) -> Result<Box<dyn ExecutionContext>, BackendError> {
        Ok(Box::new(RefExecutionContext {
            plan: Arc::clone(&self.plan),
        }))
    }
}

pub struct RefExecutionContext {
    plan: Arc<EnginePlan>,
}

impl ExecutionContext for RefExecutionContext {
    fn execute(&mut self, slots: &mut [Option<Tensor>]) -> Result<(), BackendError> {
        interpreter::execute(&self.plan, slots)
    }
}
