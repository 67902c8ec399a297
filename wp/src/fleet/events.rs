//! Fleet events
//!
//! Broadcast on every phase change and worker status transition so status
//! surfaces can react without polling.

use serde::Serialize;

use super::manager::FleetPhase;
use super::worker::WorkerStatus;

/// Default broadcast capacity (events)
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// The fleet moved to a new lifecycle phase
    PhaseChanged { phase: FleetPhase },

    /// A worker's status changed
    WorkerStatusChanged {
        worker: String,
        from: WorkerStatus,
        to: WorkerStatus,
        reason: Option<String>,
    },
}

impl FleetEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            FleetEvent::PhaseChanged { .. } => "phase_changed",
            FleetEvent::WorkerStatusChanged { .. } => "worker_status_changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = FleetEvent::WorkerStatusChanged {
            worker: "hotel-server".to_string(),
            from: WorkerStatus::Starting,
            to: WorkerStatus::Ready,
            reason: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "worker_status_changed");
        assert_eq!(json["to"], "ready");
        assert_eq!(event.event_type(), "worker_status_changed");
    }
}
