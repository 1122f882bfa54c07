use std::time::Instant;

use engineport_core::Tensor;
use tokio::sync::oneshot;

use crate::EngineError;

#[derive(Debug)]
pub struct ExecuteRequest {
    /// Logical input order.
    pub inputs: Vec<Tensor>,
    pub enqueued_at: Instant,
    pub resp_tx: oneshot::Sender<Result<ExecuteResponse, EngineError>>,
}

#[derive(Debug)]
pub struct ExecuteResponse {
    pub outputs: Vec<Tensor>,
    pub timings: Timings,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Timings {
    pub queued_us: u64,
    pub backend_us: u64,
}
