use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use engineport_core::{EnginePayload, RuntimeFactory, Tensor};
use tracing::info;

use crate::{DeviceContext, EngineError, EngineId, ExecutionEngine};

pub struct LoadedEngine {
    pub name: String,
    pub id: EngineId,
    pub num_io: (usize, usize),
    engine: Mutex<ExecutionEngine>,
}

impl LoadedEngine {
    pub fn execute(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>, EngineError> {
        self.lock().execute(inputs)
    }

    pub fn serialize(&self) -> Result<EnginePayload, EngineError> {
        self.lock().to_payload()
    }

    // A panic inside a backend leaves no partial state in the engine itself.
    fn lock(&self) -> std::sync::MutexGuard<'_, ExecutionEngine> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Engines restored in this process, keyed by engine id.
pub struct EngineRegistry {
    devices: Arc<DeviceContext>,
    runtimes: Arc<dyn RuntimeFactory>,
    engines: HashMap<EngineId, Arc<LoadedEngine>>,
}

impl EngineRegistry {
    pub fn new(devices: Arc<DeviceContext>, runtimes: Arc<dyn RuntimeFactory>) -> Self {
        Self {
            devices,
            runtimes,
            engines: HashMap::new(),
        }
    }

    pub fn load(&mut self, name: &str, payload: &EnginePayload) -> Result<EngineId, EngineError> {
        let engine =
            ExecutionEngine::from_payload(&self.devices, self.runtimes.as_ref(), name, payload)?;
        let id = engine.id();
        let loaded = LoadedEngine {
            name: engine.name().to_string(),
            id,
            num_io: engine.num_io(),
            engine: Mutex::new(engine),
        };
        info!(id, name = %loaded.name, "registered engine");
        self.engines.insert(id, Arc::new(loaded));
        Ok(id)
    }

    pub fn get(&self, id: EngineId) -> Option<Arc<LoadedEngine>> {
        self.engines.get(&id).cloned()
    }

    /// Matches either the module name or the derived `<name>_engine` form.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<LoadedEngine>> {
        let engine_name = format!("{}_engine", crate::slugify(name));
        self.engines
            .values()
            .find(|e| e.name == name || e.name == engine_name)
            .cloned()
    }

    pub fn remove(&mut self, id: EngineId) -> Option<Arc<LoadedEngine>> {
        self.engines.remove(&id)
    }

    pub fn ids(&self) -> Vec<EngineId> {
        let mut ids: Vec<EngineId> = self.engines.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}
