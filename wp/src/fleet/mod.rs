//! Worker fleet supervision
//!
//! Launches the configured worker processes (or attaches to ones already
//! running), waits for them to answer health checks, routes tool calls to the
//! ready ones, and tears everything down on shutdown.

pub mod error;
pub mod events;
pub mod launcher;
pub mod manager;
pub mod messages;
pub mod output;
pub mod prober;
pub mod readiness;
pub mod router;
pub mod transport;
pub mod worker;

pub use error::FleetError;
pub use events::FleetEvent;
pub use manager::{CallPolicy, FleetManager, FleetPhase, empty_result};
pub use readiness::ReadinessSummary;
pub use transport::{HttpTransport, TransportError, TransportResponse, WorkerTransport};
pub use worker::{WorkerInfo, WorkerSpec, WorkerStatus};

#[cfg(test)]
pub(crate) mod testutil {
    use std::path::{Path, PathBuf};

    use super::worker::WorkerSpec;
    use crate::config::FleetConfig;

    /// Write a shell script run through `sh`, so no exec bit is needed
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        path
    }

    pub fn script_spec(name: &str, script: &Path, port: u16) -> WorkerSpec {
        WorkerSpec::new(name, script, port).with_interpreter("sh", &[])
    }

    /// Fleet config with short timings against 127.0.0.1
    pub fn test_config(workers: Vec<WorkerSpec>) -> FleetConfig {
        FleetConfig {
            host: "127.0.0.1".to_string(),
            workers,
            health_timeout_ms: 50,
            call_timeout_ms: 500,
            readiness_rounds: 5,
            readiness_delay_ms: 20,
            startup_grace_ms: 100,
            output_capture_timeout_ms: 500,
            shutdown_timeout_ms: 2000,
            ..FleetConfig::default()
        }
    }
}
