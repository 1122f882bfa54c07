//! Execution engine: a deserialized engine plus everything needed to run it
//! and to persist it again.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use engineport_core::{
    BackendError, DeviceDescriptor, Engine, EnginePayload, ExecutionContext, InferRuntime,
    RuntimeFactory, Tensor,
};
use tracing::{debug, info, info_span, Span};

use crate::{DeviceContext, EngineError};

pub type EngineId = i64;

/// Name used when an engine is restored without a module name.
pub const DESERIALIZED_NAME: &str = "deserialized_trt";

pub fn slugify(name: &str) -> String {
    name.replace('.', "_")
}

pub struct ExecutionEngine {
    // Declaration order is drop order: the context dies before the engine it
    // came from, the engine before its runtime.
    exec_ctx: Box<dyn ExecutionContext>,
    engine: Box<dyn Engine>,
    runtime: Box<dyn InferRuntime>,
    /// Physical binding slot -> logical input index.
    in_binding_map: HashMap<usize, usize>,
    /// Physical binding slot -> logical output index.
    out_binding_map: HashMap<usize, usize>,
    num_io: (usize, usize),
    device: DeviceDescriptor,
    id: EngineId,
    name: String,
    span: Span,
}

impl ExecutionEngine {
    pub fn new(
        devices: &DeviceContext,
        runtimes: &dyn RuntimeFactory,
        mod_name: &str,
        serialized_engine: &[u8],
        device_info: &[u8],
    ) -> Result<Self, EngineError> {
        let name = format!("{}_engine", slugify(mod_name));
        let span = info_span!("engine", name = %name);
        let init = span.in_scope(|| initialize(devices, runtimes, serialized_engine, device_info))?;
        span.in_scope(|| {
            info!(
                id = init.id,
                device = %init.device,
                inputs = init.num_io.0,
                outputs = init.num_io.1,
                "engine ready"
            )
        });

        Ok(Self {
            exec_ctx: init.exec_ctx,
            engine: init.engine,
            runtime: init.runtime,
            in_binding_map: init.in_binding_map,
            out_binding_map: init.out_binding_map,
            num_io: init.num_io,
            device: init.device,
            id: init.id,
            name,
            span,
        })
    }

    /// Legacy form: no device metadata, runs on the active device.
    pub fn from_serialized(
        devices: &DeviceContext,
        runtimes: &dyn RuntimeFactory,
        serialized_engine: &[u8],
    ) -> Result<Self, EngineError> {
        Self::new(devices, runtimes, DESERIALIZED_NAME, serialized_engine, &[])
    }

    /// Two-part persisted form: `[device record, engine]`.
    pub fn from_parts(
        devices: &DeviceContext,
        runtimes: &dyn RuntimeFactory,
        parts: &[Bytes; 2],
    ) -> Result<Self, EngineError> {
        let [device_info, engine] = parts;
        Self::new(devices, runtimes, DESERIALIZED_NAME, engine, device_info)
    }

    pub fn from_payload(
        devices: &DeviceContext,
        runtimes: &dyn RuntimeFactory,
        mod_name: &str,
        payload: &EnginePayload,
    ) -> Result<Self, EngineError> {
        Self::new(devices, runtimes, mod_name, &payload.engine, &payload.device_info)
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    /// `(inputs, outputs)`.
    pub fn num_io(&self) -> (usize, usize) {
        self.num_io
    }

    pub fn in_binding_map(&self) -> &HashMap<usize, usize> {
        &self.in_binding_map
    }

    pub fn out_binding_map(&self) -> &HashMap<usize, usize> {
        &self.out_binding_map
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn runtime(&self) -> &dyn InferRuntime {
        self.runtime.as_ref()
    }

    /// `[device record, engine]`, loadable with [`Self::from_parts`]. The
    /// record is the device this engine was restored for.
    pub fn serialize(&self) -> Result<[Bytes; 2], EngineError> {
        Ok([self.device.encode(), self.engine.serialize()?])
    }

    pub fn to_payload(&self) -> Result<EnginePayload, EngineError> {
        Ok(EnginePayload::from_parts(self.serialize()?))
    }

    /// Runs one inference. `inputs` and the result are in logical order.
    pub fn execute(&mut self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, EngineError> {
        let _enter = self.span.enter();
        let (num_inputs, num_outputs) = self.num_io;
        if inputs.len() != num_inputs {
            return Err(EngineError::InputCount {
                expected: num_inputs,
                got: inputs.len(),
            });
        }

        let mut inputs: Vec<Option<Tensor>> = inputs.into_iter().map(Some).collect();
        let mut slots: Vec<Option<Tensor>> = vec![None; self.engine.num_bindings()];
        for (&slot, &logical) in &self.in_binding_map {
            slots[slot] = inputs[logical].take();
        }

        self.exec_ctx.execute(&mut slots)?;

        let mut outputs: Vec<Option<Tensor>> = vec![None; num_outputs];
        for (&slot, &logical) in &self.out_binding_map {
            outputs[logical] = slots[slot].take();
        }
        debug!(inputs = num_inputs, outputs = num_outputs, "executed");
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, t)| t.ok_or(EngineError::MissingOutput { index }))
            .collect()
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("device", &self.device)
            .field("num_io", &self.num_io)
            .field("in_binding_map", &self.in_binding_map)
            .field("out_binding_map", &self.out_binding_map)
            .finish_non_exhaustive()
    }
}

struct Initialized {
    exec_ctx: Box<dyn ExecutionContext>,
    engine: Box<dyn Engine>,
    runtime: Box<dyn InferRuntime>,
    in_binding_map: HashMap<usize, usize>,
    out_binding_map: HashMap<usize, usize>,
    num_io: (usize, usize),
    device: DeviceDescriptor,
    id: EngineId,
}

// Handles are locals declared in acquisition order, so an early return
// releases them context first, then engine, then runtime.
fn initialize(
    devices: &DeviceContext,
    runtimes: &dyn RuntimeFactory,
    serialized_engine: &[u8],
    device_info: &[u8],
) -> Result<Initialized, EngineError> {
    let guard = devices.lock();
    let recorded = if device_info.is_empty() {
        None
    } else {
        let requested = DeviceDescriptor::decode(device_info)?;
        guard.set_device(requested.device_id)?;
        debug!(device = %requested, "selected device from engine metadata");
        Some(requested)
    };
    let active = guard.current()?;
    if let Some(requested) = recorded {
        let built_for = requested.capability();
        if !guard.driver().supports(&active, built_for) {
            return Err(EngineError::DeviceMismatch {
                device: active,
                built_for,
            });
        }
    }

    let runtime = runtimes.create_runtime()?;
    let engine = runtime.deserialize_engine(serialized_engine)?;
    if let Some(built_for) = engine.built_for() {
        if !guard.driver().supports(&active, built_for) {
            return Err(EngineError::DeviceMismatch {
                device: active,
                built_for,
            });
        }
    }
    drop(guard);

    // Unique while the engine lives.
    let id = engine.as_ref() as *const dyn Engine as *const () as usize as EngineId;
    let exec_ctx = engine.create_execution_context()?;

    let (in_binding_map, out_binding_map) = binding_maps(engine.as_ref())?;
    let num_io = (in_binding_map.len(), out_binding_map.len());

    Ok(Initialized {
        exec_ctx,
        engine,
        runtime,
        in_binding_map,
        out_binding_map,
        num_io,
        device: recorded.unwrap_or(active),
        id,
    })
}

fn binding_maps(
    engine: &dyn Engine,
) -> Result<(HashMap<usize, usize>, HashMap<usize, usize>), EngineError> {
    let mut inputs = HashMap::new();
    let mut outputs = HashMap::new();
    let mut names = Vec::with_capacity(engine.num_bindings());

    for slot in 0..engine.num_bindings() {
        let binding = engine.binding(slot).ok_or_else(|| {
            BackendError::Deserialize(format!("engine reports no binding at slot {slot}"))
        })?;
        let index = binding.name.logical_index()?;
        debug!(slot, name = %binding.name.0, index, input = binding.is_input, "binding");
        if binding.is_input {
            inputs.insert(slot, index);
        } else {
            outputs.insert(slot, index);
        }
        names.push(binding.name.0.clone());
    }

    for map in [&inputs, &outputs] {
        let mut seen = vec![false; map.len()];
        for (&slot, &index) in map {
            let reject = |reason| EngineError::BindingIndex {
                name: names[slot].clone(),
                index,
                reason,
            };
            match seen.get_mut(index) {
                None => return Err(reject("index is past the binding count")),
                Some(true) => return Err(reject("index is used twice")),
                Some(slot_seen) => *slot_seen = true,
            }
        }
    }
    Ok((inputs, outputs))
}
