//! Worker process launcher
//!
//! Attaches to a healthy worker already on the assigned port, or spawns one and
//! checks whether it died during the startup grace period.

use std::process::Stdio;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::error::FleetError;
use super::output::{OutputCapture, describe_exit};
use super::prober::probe;
use super::transport::WorkerTransport;
use super::worker::{WorkerHandle, WorkerSpec};
use crate::config::FleetConfig;

static ADDRESS_IN_USE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)EADDRINUSE|address already in use").expect("address-in-use pattern is valid")
});

/// Timing and mode knobs for a launch
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub host: String,
    pub health_timeout: Duration,
    pub startup_grace: Duration,
    pub output_capture_timeout: Duration,
    /// Never spawn; only adopt workers that already answer
    pub attach_only: bool,
}

impl From<&FleetConfig> for LaunchSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            host: config.host.clone(),
            health_timeout: config.health_timeout(),
            startup_grace: config.startup_grace(),
            output_capture_timeout: config.output_capture_timeout(),
            attach_only: config.attach_only,
        }
    }
}

/// Launches workers and produces their initial handles
pub struct Launcher {
    transport: Arc<dyn WorkerTransport>,
    settings: LaunchSettings,
}

impl Launcher {
    pub fn new(transport: Arc<dyn WorkerTransport>, settings: LaunchSettings) -> Self {
        Self { transport, settings }
    }

    /// Launch one worker
    ///
    /// Never fails: every problem is recorded on the returned handle so the rest
    /// of the fleet keeps launching.
    pub async fn launch(&self, spec: &WorkerSpec) -> WorkerHandle {
        debug!(worker = %spec.name, port = spec.port, "Launcher::launch: called");
        let mut handle = WorkerHandle::new(spec.clone(), &self.settings.host);

        if probe(self.transport.as_ref(), &handle.base_url, self.settings.health_timeout).await {
            info!(worker = %spec.name, port = spec.port, "Worker already running, attaching");
            handle.mark_ready();
            return handle;
        }

        if self.settings.attach_only {
            debug!(worker = %spec.name, "Launcher::launch: attach-only, not spawning");
            handle.mark_failed(
                FleetError::Launch {
                    worker: spec.name.clone(),
                    reason: format!("no healthy worker on port {}", spec.port),
                }
                .to_string(),
            );
            return handle;
        }

        let mut child = match spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                handle.mark_failed(e.to_string());
                return handle;
            }
        };
        info!(worker = %spec.name, port = spec.port, pid = ?child.id(), "Starting worker");

        handle.output = Some(OutputCapture::attach(&spec.name, &mut child));
        handle.process = Some(child);
        handle.mark_starting();

        tokio::time::sleep(self.settings.startup_grace).await;
        self.check_early_exit(&mut handle).await;
        handle
    }

    /// Resolve a worker that exited during the grace period
    async fn check_early_exit(&self, handle: &mut WorkerHandle) {
        let Some(child) = handle.process.as_mut() else {
            return;
        };
        let status = match child.try_wait() {
            Ok(Some(status)) => status,
            Ok(None) => {
                debug!(worker = %handle.name(), "check_early_exit: still running");
                return;
            }
            Err(e) => {
                warn!(worker = %handle.name(), error = %e, "Could not poll worker process");
                return;
            }
        };
        debug!(worker = %handle.name(), %status, "check_early_exit: process exited");
        handle.process = None;

        let (stdout, stderr) = match handle.output.take() {
            Some(mut output) => {
                if !output.finish(self.settings.output_capture_timeout).await {
                    debug!(worker = %handle.name(), "check_early_exit: output capture timed out");
                }
                (output.stdout(), output.stderr())
            }
            None => (String::new(), String::new()),
        };

        if is_address_in_use(&stderr) || is_address_in_use(&stdout) {
            if probe(self.transport.as_ref(), &handle.base_url, self.settings.health_timeout).await {
                info!(
                    worker = %handle.name(),
                    port = handle.spec.port,
                    "Worker already running (detected after startup attempt)"
                );
                handle.mark_ready();
            } else {
                let err = FleetError::PortConflict {
                    worker: handle.spec.name.clone(),
                    port: handle.spec.port,
                };
                handle.mark_failed(err.to_string());
            }
            return;
        }

        let err = FleetError::Launch {
            worker: handle.spec.name.clone(),
            reason: describe_exit(status, &stderr, &stdout),
        };
        handle.mark_failed(err.to_string());
    }
}

/// Spawn the worker process with its port as the last argument
///
/// The child inherits this process's environment unchanged, so provider
/// credentials reach the worker.
fn spawn(spec: &WorkerSpec) -> Result<Child, FleetError> {
    debug!(worker = %spec.name, "spawn: called");
    let launch_error = |reason: String| FleetError::Launch {
        worker: spec.name.clone(),
        reason,
    };

    let resolved = spec.resolved_executable();
    if !resolved.exists() {
        return Err(launch_error(format!("executable not found: {}", resolved.display())));
    }
    let executable = std::fs::canonicalize(&resolved)
        .map_err(|e| launch_error(format!("cannot resolve {}: {}", resolved.display(), e)))?;

    let mut cmd = match &spec.interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.args(&spec.interpreter_args).arg(&executable);
            cmd
        }
        None => Command::new(&executable),
    };
    cmd.arg(spec.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    cmd.spawn()
        .map_err(|e| launch_error(format!("failed to spawn {}: {}", executable.display(), e)))
}

fn is_address_in_use(output: &str) -> bool {
    ADDRESS_IN_USE.is_match(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::testutil::{script_spec, write_script};
    use crate::fleet::transport::mock::MockTransport;
    use crate::fleet::worker::WorkerStatus;
    use tempfile::TempDir;

    fn settings() -> LaunchSettings {
        LaunchSettings {
            host: "127.0.0.1".to_string(),
            health_timeout: Duration::from_millis(50),
            startup_grace: Duration::from_millis(300),
            output_capture_timeout: Duration::from_secs(2),
            attach_only: false,
        }
    }

    fn launcher(transport: &Arc<MockTransport>, settings: LaunchSettings) -> Launcher {
        Launcher::new(transport.clone(), settings)
    }

    #[test]
    fn test_address_in_use_detection() {
        assert!(is_address_in_use("Error: listen EADDRINUSE: address already in use :::3001"));
        assert!(is_address_in_use("OSError: [Errno 98] Address already in use"));
        assert!(!is_address_in_use("TypeError: undefined is not a function"));
    }

    #[tokio::test]
    async fn test_attach_to_running_worker_does_not_spawn() {
        let transport = Arc::new(MockTransport::new());
        transport.healthy("http://127.0.0.1:4101");
        let spec = WorkerSpec::new("flight-server", "/nonexistent/flight-server.js", 4101);

        let handle = launcher(&transport, settings()).launch(&spec).await;

        assert_eq!(handle.status, WorkerStatus::Ready);
        assert!(handle.process.is_none());
        assert!(handle.last_error.is_none());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_fast() {
        let transport = Arc::new(MockTransport::new());
        let spec = WorkerSpec::new("hotel-server", "/nonexistent/hotel-server.js", 4102);

        let start = std::time::Instant::now();
        let handle = launcher(&transport, settings()).launch(&spec).await;

        assert_eq!(handle.status, WorkerStatus::Failed);
        assert!(handle.last_error.as_deref().unwrap().contains("executable not found"));
        assert!(handle.process.is_none());
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_attach_only_never_spawns() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "w.sh", "exec sleep 30");
        let transport = Arc::new(MockTransport::new());
        let mut settings = settings();
        settings.attach_only = true;

        let handle = launcher(&transport, settings).launch(&script_spec("w", &script, 4103)).await;

        assert_eq!(handle.status, WorkerStatus::Failed);
        assert!(handle.process.is_none());
        assert!(handle.last_error.as_deref().unwrap().contains("no healthy worker on port 4103"));
    }

    #[tokio::test]
    async fn test_running_process_stays_starting() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "w.sh", "exec sleep 30");
        let transport = Arc::new(MockTransport::new());

        let handle = launcher(&transport, settings()).launch(&script_spec("w", &script, 4104)).await;

        assert_eq!(handle.status, WorkerStatus::Starting);
        assert!(handle.process.is_some());
        assert!(handle.pid().is_some());
    }

    #[tokio::test]
    async fn test_crash_records_exit_code_and_output() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "w.sh", "echo \"boom on $1\" >&2\nexit 3");
        let transport = Arc::new(MockTransport::new());

        let handle = launcher(&transport, settings()).launch(&script_spec("w", &script, 4105)).await;

        assert_eq!(handle.status, WorkerStatus::Failed);
        assert!(handle.process.is_none());
        let err = handle.last_error.unwrap();
        assert!(err.contains("exit code 3"), "{}", err);
        assert!(err.contains("boom on 4105"), "{}", err);
    }

    #[tokio::test]
    async fn test_environment_is_inherited() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "w.sh", "echo \"path=$PATH\"\nexit 1");
        let transport = Arc::new(MockTransport::new());

        let handle = launcher(&transport, settings()).launch(&script_spec("w", &script, 4106)).await;

        let path = std::env::var("PATH").unwrap();
        let err = handle.last_error.unwrap();
        let expected: String = format!("path={}", path).chars().take(20).collect();
        assert!(err.contains(&expected), "{}", err);
    }

    #[tokio::test]
    async fn test_port_conflict_with_healthy_occupant_adopts_it() {
        let temp = TempDir::new().unwrap();
        let script = write_script(
            temp.path(),
            "w.sh",
            "echo \"Error: listen EADDRINUSE: address already in use :::$1\" >&2\nexit 1",
        );
        let transport = Arc::new(MockTransport::new());
        // First probe (pre-spawn) fails, re-probe after the conflict succeeds
        transport.healthy_after("http://127.0.0.1:4107", 1);

        let handle = launcher(&transport, settings()).launch(&script_spec("w", &script, 4107)).await;

        assert_eq!(handle.status, WorkerStatus::Ready);
        assert!(handle.process.is_none());
        assert_eq!(transport.probe_count_for("http://127.0.0.1:4107"), 2);
    }

    #[tokio::test]
    async fn test_port_conflict_with_unresponsive_occupant_fails() {
        let temp = TempDir::new().unwrap();
        let script = write_script(temp.path(), "w.sh", "echo 'EADDRINUSE' >&2\nexit 1");
        let transport = Arc::new(MockTransport::new());

        let handle = launcher(&transport, settings()).launch(&script_spec("w", &script, 4108)).await;

        assert_eq!(handle.status, WorkerStatus::Failed);
        assert!(handle.last_error.unwrap().contains("port 4108 in use"));
    }
}
