use std::time::Instant;

use engineport_core::Tensor;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{EngineError, EngineId, ExecuteRequest, ExecuteResponse, ExecutionEngine, Timings};

/// Owns one engine and runs its requests one at a time.
pub struct EngineWorker {
    pub inbox: mpsc::Receiver<ExecuteRequest>,
    pub engine: ExecutionEngine,
}

impl EngineWorker {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn(engine: ExecutionEngine, capacity: usize) -> (EngineHandle, JoinHandle<()>) {
        let (tx, inbox) = mpsc::channel(capacity.max(1));
        let handle = EngineHandle {
            id: engine.id(),
            name: engine.name().to_string(),
            tx,
        };
        let task = tokio::spawn(Self { inbox, engine }.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!(engine_id = self.engine.id(), name = self.engine.name(), "engine worker started");
        while let Some(req) = self.inbox.recv().await {
            let queued_us = req.enqueued_at.elapsed().as_micros() as u64;
            let started = Instant::now();
            let result = self.engine.execute(req.inputs);
            let backend_us = started.elapsed().as_micros() as u64;
            debug!(queued_us, backend_us, ok = result.is_ok(), "request done");

            let response = result.map(|outputs| ExecuteResponse {
                outputs,
                timings: Timings {
                    queued_us,
                    backend_us,
                },
            });
            // The caller may have given up waiting.
            let _ = req.resp_tx.send(response);
        }
        info!(engine_id = self.engine.id(), "engine worker stopped");
    }
}

#[derive(Clone, Debug)]
pub struct EngineHandle {
    id: EngineId,
    name: String,
    tx: mpsc::Sender<ExecuteRequest>,
}

impl EngineHandle {
    pub fn id(&self) -> EngineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn execute(&self, inputs: Vec<Tensor>) -> Result<ExecuteResponse, EngineError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        let req = ExecuteRequest {
            inputs,
            enqueued_at: Instant::now(),
            resp_tx,
        };
        self.tx
            .send(req)
            .await
            .map_err(|_| EngineError::WorkerClosed)?;
        resp_rx.await.map_err(|_| EngineError::WorkerClosed)?
    }
}
