//! Worker specs and runtime handles
//!
//! A [`WorkerSpec`] is static configuration; a [`WorkerHandle`] is the runtime
//! state the fleet actor owns for each spec.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tracing::{debug, warn};

use super::output::OutputCapture;

/// Static description of one worker process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    /// Unique routing key
    pub name: String,

    /// Program or script to launch
    pub executable: PathBuf,

    /// Program used to run the executable (e.g. "node"); None runs it directly
    #[serde(default)]
    pub interpreter: Option<String>,

    /// Arguments placed between the interpreter and the executable
    #[serde(default, rename = "interpreter-args")]
    pub interpreter_args: Vec<String>,

    /// Working directory for the child process
    #[serde(default, rename = "working-dir")]
    pub working_dir: Option<PathBuf>,

    /// TCP port the worker listens on, unique across the fleet
    pub port: u16,
}

impl WorkerSpec {
    /// Create a spec that runs `executable` directly
    pub fn new(name: impl Into<String>, executable: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            name: name.into(),
            executable: executable.into(),
            interpreter: None,
            interpreter_args: Vec::new(),
            working_dir: None,
            port,
        }
    }

    /// Run the executable through an interpreter
    pub fn with_interpreter(mut self, interpreter: impl Into<String>, args: &[&str]) -> Self {
        self.interpreter = Some(interpreter.into());
        self.interpreter_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Set the child's working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Executable path as seen from this process
    ///
    /// Relative executables are resolved against the working directory.
    pub fn resolved_executable(&self) -> PathBuf {
        match &self.working_dir {
            Some(dir) if self.executable.is_relative() => dir.join(&self.executable),
            _ => self.executable.clone(),
        }
    }

    /// Base URL for all HTTP calls to this worker
    pub fn base_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.port)
    }
}

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Unknown,
    Starting,
    Ready,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Unknown => "unknown",
            WorkerStatus::Starting => "starting",
            WorkerStatus::Ready => "ready",
            WorkerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime state for one worker, owned by the fleet actor
#[derive(Debug)]
pub struct WorkerHandle {
    pub spec: WorkerSpec,
    pub status: WorkerStatus,
    pub base_url: String,
    /// Spawned child; None when attached to an already-running worker
    pub process: Option<Child>,
    /// Captured stdout/stderr of the spawned child
    pub output: Option<OutputCapture>,
    pub last_error: Option<String>,
    /// Call failures since the last successful call
    pub consecutive_failures: u32,
}

impl WorkerHandle {
    pub fn new(spec: WorkerSpec, host: &str) -> Self {
        let base_url = spec.base_url(host);
        Self {
            spec,
            status: WorkerStatus::Unknown,
            base_url,
            process: None,
            output: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn mark_starting(&mut self) {
        debug!(worker = %self.spec.name, "WorkerHandle::mark_starting: called");
        self.status = WorkerStatus::Starting;
    }

    pub fn mark_ready(&mut self) {
        debug!(worker = %self.spec.name, "WorkerHandle::mark_ready: called");
        self.status = WorkerStatus::Ready;
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(worker = %self.spec.name, %reason, "Worker failed");
        self.status = WorkerStatus::Failed;
        self.last_error = Some(reason);
    }

    /// PID of the spawned child, if any
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|c| c.id())
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            name: self.spec.name.clone(),
            status: self.status,
            port: self.spec.port,
            base_url: self.base_url.clone(),
            pid: self.pid(),
            last_error: self.last_error.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}

/// Read-only view of a worker for status surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub name: String,
    pub status: WorkerStatus,
    pub port: u16,
    pub base_url: String,
    pub pid: Option<u32>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_from_port() {
        let spec = WorkerSpec::new("flight-server", "flight-server.js", 3001);
        assert_eq!(spec.base_url("localhost"), "http://localhost:3001");
    }

    #[test]
    fn test_resolved_executable_joins_working_dir() {
        let spec = WorkerSpec::new("hotel-server", "hotel-server.js", 3002).with_working_dir("../mcp-servers");
        assert_eq!(
            spec.resolved_executable(),
            PathBuf::from("../mcp-servers/hotel-server.js")
        );

        let absolute = WorkerSpec::new("hotel-server", "/opt/hotel.js", 3002).with_working_dir("../mcp-servers");
        assert_eq!(absolute.resolved_executable(), PathBuf::from("/opt/hotel.js"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&WorkerStatus::Starting).unwrap();
        assert_eq!(json, "\"starting\"");
        assert_eq!(WorkerStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_handle_transitions() {
        let spec = WorkerSpec::new("w1", "w1.sh", 4001);
        let mut handle = WorkerHandle::new(spec, "127.0.0.1");
        assert_eq!(handle.status, WorkerStatus::Unknown);
        assert_eq!(handle.base_url, "http://127.0.0.1:4001");

        handle.mark_failed("boom");
        assert_eq!(handle.status, WorkerStatus::Failed);
        assert_eq!(handle.last_error.as_deref(), Some("boom"));

        handle.consecutive_failures = 3;
        handle.mark_ready();
        assert_eq!(handle.status, WorkerStatus::Ready);
        assert!(handle.last_error.is_none());
        assert_eq!(handle.consecutive_failures, 0);
    }

    #[test]
    fn test_spec_deserializes_kebab_case() {
        let yaml = r#"
name: flight-server
executable: flight-server.js
interpreter: node
interpreter-args: ["-r", "dotenv/config"]
working-dir: ../mcp-servers
port: 3001
"#;
        let spec: WorkerSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.interpreter.as_deref(), Some("node"));
        assert_eq!(spec.interpreter_args, vec!["-r", "dotenv/config"]);
        assert_eq!(spec.working_dir, Some(PathBuf::from("../mcp-servers")));
    }
}
