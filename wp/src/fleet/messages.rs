//! Fleet actor messages
//!
//! Commands and replies for the actor that owns the worker handles.

use tokio::sync::oneshot;

use super::error::FleetError;
use super::readiness::ReadinessSummary;
use super::router::Route;
use super::worker::WorkerInfo;

/// Response from fleet operations
pub type FleetResponse<T> = Result<T, FleetError>;

/// Commands sent to the fleet actor
#[derive(Debug)]
pub enum FleetCommand {
    /// Launch every worker and wait for readiness
    Initialize {
        reply: oneshot::Sender<FleetResponse<ReadinessSummary>>,
    },

    /// Look up where a call to `worker` should go
    Resolve {
        worker: String,
        reply: oneshot::Sender<FleetResponse<Route>>,
    },

    /// Report how a routed call went (Err carries the failure reason)
    RecordOutcome {
        worker: String,
        outcome: Result<(), String>,
    },

    /// Detailed view of every worker
    Workers {
        reply: oneshot::Sender<Vec<WorkerInfo>>,
    },

    /// Terminate spawned workers and clear all handles
    Shutdown { reply: oneshot::Sender<()> },
}
