//! Fleet error taxonomy

use thiserror::Error;

use super::manager::FleetPhase;
use super::worker::WorkerStatus;

/// Errors from launching, routing to, and calling workers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FleetError {
    #[error("failed to launch {worker}: {reason}")]
    Launch { worker: String, reason: String },

    #[error("port {port} in use but {worker} is not responding")]
    PortConflict { worker: String, port: u16 },

    #[error("workers not ready after readiness polling: {}", workers.join(", "))]
    ReadinessTimeout { workers: Vec<String> },

    #[error("unknown worker: {worker}")]
    UnknownWorker { worker: String },

    #[error("worker {worker} is not ready (status: {status})")]
    NotReady { worker: String, status: WorkerStatus },

    #[error("{worker}.{tool} failed: {status} - {body}")]
    CallStatus {
        worker: String,
        tool: String,
        status: u16,
        body: String,
    },

    #[error("error calling {worker}.{tool}: {reason}")]
    CallTransport {
        worker: String,
        tool: String,
        reason: String,
    },

    #[error("{worker}.{tool} returned malformed JSON: {reason}")]
    CallDecode {
        worker: String,
        tool: String,
        reason: String,
    },

    #[error("fleet is not operational (phase: {phase})")]
    NotOperational { phase: FleetPhase },

    #[error("invalid fleet phase: expected {expected}, found {actual}")]
    InvalidPhase { expected: FleetPhase, actual: FleetPhase },

    #[error("fleet actor channel closed")]
    ChannelClosed,
}

impl FleetError {
    /// Call was refused before any network traffic
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            FleetError::UnknownWorker { .. } | FleetError::NotReady { .. } | FleetError::NotOperational { .. }
        )
    }

    /// A ready worker was called and the call itself failed
    pub fn is_call_failure(&self) -> bool {
        matches!(
            self,
            FleetError::CallStatus { .. } | FleetError::CallTransport { .. } | FleetError::CallDecode { .. }
        )
    }
}
