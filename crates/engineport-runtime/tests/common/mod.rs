#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use engineport_core::{
    BackendError, BindingName, BindingSpec, Capability, DType, DeviceDescriptor, DeviceDriver,
    DeviceError, Dims, Engine, ExecutionContext, InferRuntime, RuntimeFactory, Tensor,
};

pub type DropLog = Arc<Mutex<Vec<&'static str>>>;

pub struct MockDriver {
    devices: Vec<DeviceDescriptor>,
    current: Mutex<i32>,
    switches: Mutex<Vec<i32>>,
    broken: bool,
}

impl MockDriver {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            devices,
            current: Mutex::new(0),
            switches: Mutex::new(Vec::new()),
            broken: false,
        }
    }

    pub fn broken() -> Self {
        Self {
            broken: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn switches(&self) -> Vec<i32> {
        self.switches.lock().unwrap().clone()
    }
}

impl DeviceDriver for MockDriver {
    fn device_count(&self) -> Result<i32, DeviceError> {
        if self.broken {
            return Err(DeviceError::Driver {
                call: "device_count",
                device_id: -1,
                message: "no driver".to_string(),
            });
        }
        Ok(self.devices.len() as i32)
    }

    fn properties(&self, device_id: i32) -> Result<DeviceDescriptor, DeviceError> {
        self.devices
            .iter()
            .find(|d| d.device_id == device_id)
            .copied()
            .ok_or(DeviceError::NotFound(device_id))
    }

    fn set_device(&self, device_id: i32) -> Result<(), DeviceError> {
        self.properties(device_id)?;
        *self.current.lock().unwrap() = device_id;
        self.switches.lock().unwrap().push(device_id);
        Ok(())
    }

    fn current_device(&self) -> Result<i32, DeviceError> {
        Ok(*self.current.lock().unwrap())
    }
}

/// Two devices; device 0 is active.
pub fn two_devices() -> Arc<MockDriver> {
    Arc::new(MockDriver::new(vec![
        DeviceDescriptor::new(0, 7, 5),
        DeviceDescriptor::new(1, 8, 6),
    ]))
}

pub fn binding(name: &str, is_input: bool) -> BindingSpec {
    BindingSpec {
        name: BindingName(name.to_string()),
        is_input,
        dtype: DType::F32,
        dims: Dims::from_slice(&[2]),
    }
}

/// Physical slots deliberately differ from logical order.
pub fn shuffled_bindings() -> Vec<BindingSpec> {
    vec![
        binding("input_1", true),
        binding("output_1", false),
        binding("input_0", true),
        binding("output_0", false),
    ]
}

#[derive(Clone)]
pub struct MockFactory {
    pub bindings: Vec<BindingSpec>,
    pub built_for: Option<Capability>,
    pub log: DropLog,
}

impl MockFactory {
    pub fn new(bindings: Vec<BindingSpec>) -> Self {
        Self {
            bindings,
            built_for: None,
            log: DropLog::default(),
        }
    }

    pub fn drops(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }
}

impl RuntimeFactory for MockFactory {
    fn create_runtime(&self) -> Result<Box<dyn InferRuntime>, BackendError> {
        Ok(Box::new(MockRuntime(self.clone())))
    }
}

struct MockRuntime(MockFactory);

impl InferRuntime for MockRuntime {
    fn deserialize_engine(&self, blob: &[u8]) -> Result<Box<dyn Engine>, BackendError> {
        if blob == b"corrupt" {
            return Err(BackendError::Deserialize("bad magic".to_string()));
        }
        Ok(Box::new(MockEngine {
            blob: Bytes::copy_from_slice(blob),
            bindings: self.0.bindings.clone(),
            built_for: self.0.built_for,
            log: self.0.log.clone(),
        }))
    }
}

impl Drop for MockRuntime {
    fn drop(&mut self) {
        self.0.log.lock().unwrap().push("runtime");
    }
}

struct MockEngine {
    blob: Bytes,
    bindings: Vec<BindingSpec>,
    built_for: Option<Capability>,
    log: DropLog,
}

impl Engine for MockEngine {
    fn num_bindings(&self) -> usize {
        self.bindings.len()
    }

    fn binding(&self, slot: usize) -> Option<&BindingSpec> {
        self.bindings.get(slot)
    }

    fn built_for(&self) -> Option<Capability> {
        self.built_for
    }

    fn serialize(&self) -> Result<Bytes, BackendError> {
        Ok(self.blob.clone())
    }

    fn create_execution_context(&self) -> Result<Box<dyn ExecutionContext>, BackendError> {
        Ok(Box::new(EchoContext {
            bindings: self.bindings.clone(),
            log: self.log.clone(),
        }))
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.log.lock().unwrap().push("engine");
    }
}

/// Output `i` receives a copy of input `i`.
struct EchoContext {
    bindings: Vec<BindingSpec>,
    log: DropLog,
}

impl ExecutionContext for EchoContext {
    fn execute(&mut self, slots: &mut [Option<Tensor>]) -> Result<(), BackendError> {
        let index = |b: &BindingSpec| b.name.logical_index().unwrap_or(usize::MAX);
        for (out_slot, out) in self.bindings.iter().enumerate().filter(|(_, b)| !b.is_input) {
            let in_slot = self
                .bindings
                .iter()
                .position(|b| b.is_input && index(b) == index(out))
                .ok_or_else(|| BackendError::Execution(format!("no input for {}", out.name.0)))?;
            slots[out_slot] = slots[in_slot].clone();
        }
        Ok(())
    }
}

impl Drop for EchoContext {
    fn drop(&mut self) {
        self.log.lock().unwrap().push("context");
    }
}
