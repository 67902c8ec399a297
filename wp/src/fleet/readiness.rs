//! Readiness coordinator
//!
//! Polls every `starting` worker on a fixed interval until it answers healthy,
//! its process dies, or the round budget runs out. Total time is bounded by
//! rounds x (delay + health timeout).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::FleetError;
use super::output::describe_exit;
use super::prober::probe;
use super::transport::WorkerTransport;
use super::worker::{WorkerHandle, WorkerStatus};
use crate::config::FleetConfig;

/// Polling budget for readiness
#[derive(Debug, Clone, Copy)]
pub struct ReadinessSettings {
    pub rounds: u32,
    pub delay: Duration,
    pub health_timeout: Duration,
}

impl From<&FleetConfig> for ReadinessSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            rounds: config.readiness_rounds,
            delay: config.readiness_delay(),
            health_timeout: config.health_timeout(),
        }
    }
}

/// Outcome of a readiness pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReadinessSummary {
    pub ready: Vec<String>,
    pub failed: Vec<String>,
    pub starting: Vec<String>,
    /// Polling rounds actually run
    pub rounds: u32,
}

impl ReadinessSummary {
    pub fn from_handles<'a>(handles: impl IntoIterator<Item = &'a WorkerHandle>, rounds: u32) -> Self {
        let mut summary = Self {
            rounds,
            ..Default::default()
        };
        for handle in handles {
            let name = handle.name().to_string();
            match handle.status {
                WorkerStatus::Ready => summary.ready.push(name),
                WorkerStatus::Failed => summary.failed.push(name),
                WorkerStatus::Starting | WorkerStatus::Unknown => summary.starting.push(name),
            }
        }
        summary
    }

    pub fn all_ready(&self) -> bool {
        self.failed.is_empty() && self.starting.is_empty()
    }

    /// Workers still starting when the budget ran out
    pub fn timeout_error(&self) -> Option<FleetError> {
        if self.starting.is_empty() {
            None
        } else {
            Some(FleetError::ReadinessTimeout {
                workers: self.starting.clone(),
            })
        }
    }
}

/// Poll starting workers until each is ready or failed, or the budget runs out
///
/// `on_round` sees the handles after every polling round. Workers still
/// starting at the end are left starting, not force-failed. Never fails.
pub async fn await_readiness<F>(
    handles: &mut BTreeMap<String, WorkerHandle>,
    transport: &dyn WorkerTransport,
    settings: &ReadinessSettings,
    mut on_round: F,
) -> ReadinessSummary
where
    F: FnMut(&BTreeMap<String, WorkerHandle>),
{
    debug!(rounds = settings.rounds, delay = ?settings.delay, "await_readiness: called");
    let mut rounds_run = 0;

    for round in 0..settings.rounds {
        reap_exited(handles);
        let pending = starting_workers(handles);
        if pending.is_empty() {
            debug!(round, "await_readiness: nothing left starting");
            break;
        }
        rounds_run = round + 1;

        let probes = pending.iter().map(|name| {
            let base_url = handles[name].base_url.clone();
            async move {
                let healthy = probe(transport, &base_url, settings.health_timeout).await;
                (name, healthy)
            }
        });
        let results = futures::future::join_all(probes).await;

        for (name, healthy) in results {
            if healthy && let Some(handle) = handles.get_mut(name) {
                handle.mark_ready();
                info!(worker = %name, round = rounds_run, "Worker is ready");
            }
        }
        on_round(handles);

        if starting_workers(handles).is_empty() {
            break;
        }
        if round + 1 < settings.rounds {
            tokio::time::sleep(settings.delay).await;
        }
    }

    let summary = ReadinessSummary::from_handles(handles.values(), rounds_run);
    if summary.all_ready() {
        info!(ready = summary.ready.len(), "All workers are ready");
    } else {
        if !summary.failed.is_empty() {
            warn!(failed = ?summary.failed, "Failed workers");
        }
        if !summary.starting.is_empty() {
            warn!(starting = ?summary.starting, "Workers still starting after readiness polling");
        }
        if summary.ready.is_empty() {
            warn!("No workers are ready, continuing anyway");
        } else {
            info!(ready = ?summary.ready, "Workers operational");
        }
    }
    summary
}

fn starting_workers(handles: &BTreeMap<String, WorkerHandle>) -> Vec<String> {
    handles
        .iter()
        .filter(|(_, h)| h.status == WorkerStatus::Starting)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Fail starting workers whose process has already exited
fn reap_exited(handles: &mut BTreeMap<String, WorkerHandle>) {
    for handle in handles.values_mut() {
        if handle.status != WorkerStatus::Starting {
            continue;
        }
        let Some(child) = handle.process.as_mut() else {
            continue;
        };
        if let Ok(Some(status)) = child.try_wait() {
            let (stdout, stderr) = handle
                .output
                .as_ref()
                .map(|o| (o.stdout(), o.stderr()))
                .unwrap_or_default();
            handle.process = None;
            let reason = format!(
                "exited before becoming healthy: {}",
                describe_exit(status, &stderr, &stdout)
            );
            handle.mark_failed(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::transport::mock::MockTransport;
    use crate::fleet::worker::WorkerSpec;
    use std::process::Stdio;
    use std::time::Instant;
    use tokio::process::Command;

    fn handle(name: &str, port: u16, status: WorkerStatus) -> WorkerHandle {
        let mut handle = WorkerHandle::new(WorkerSpec::new(name, format!("{}.sh", name), port), "127.0.0.1");
        handle.status = status;
        handle
    }

    fn fleet(handles: Vec<WorkerHandle>) -> BTreeMap<String, WorkerHandle> {
        handles.into_iter().map(|h| (h.name().to_string(), h)).collect()
    }

    fn settings(rounds: u32, delay_ms: u64) -> ReadinessSettings {
        ReadinessSettings {
            rounds,
            delay: Duration::from_millis(delay_ms),
            health_timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_terminates_early_once_resolved() {
        let transport = MockTransport::new();
        transport.healthy_after("http://127.0.0.1:4201", 0);
        transport.healthy_after("http://127.0.0.1:4202", 1);
        let mut handles = fleet(vec![
            handle("w1", 4201, WorkerStatus::Starting),
            handle("w2", 4202, WorkerStatus::Starting),
        ]);

        let start = Instant::now();
        let summary = await_readiness(&mut handles, &transport, &settings(30, 100), |_| {}).await;

        assert_eq!(summary.ready, vec!["w1", "w2"]);
        assert_eq!(summary.rounds, 2);
        assert!(summary.all_ready());
        assert!(start.elapsed() < Duration::from_secs(1));
        // w1 is not polled again once ready
        assert_eq!(transport.probe_count_for("http://127.0.0.1:4201"), 1);
    }

    #[tokio::test]
    async fn test_bounded_when_worker_never_healthy() {
        let transport = MockTransport::new();
        let mut handles = fleet(vec![handle("w1", 4203, WorkerStatus::Starting)]);

        let start = Instant::now();
        let summary = await_readiness(&mut handles, &transport, &settings(3, 20), |_| {}).await;

        assert_eq!(summary.starting, vec!["w1"]);
        assert_eq!(summary.rounds, 3);
        assert_eq!(handles["w1"].status, WorkerStatus::Starting);
        assert_eq!(transport.probe_count(), 3);
        assert!(start.elapsed() < Duration::from_millis(3 * (20 + 50) + 500));
        assert_eq!(
            summary.timeout_error(),
            Some(FleetError::ReadinessTimeout {
                workers: vec!["w1".to_string()]
            })
        );
    }

    #[tokio::test]
    async fn test_failed_workers_are_not_polled() {
        let transport = MockTransport::new();
        transport.healthy("http://127.0.0.1:4204");
        let mut handles = fleet(vec![
            handle("w1", 4204, WorkerStatus::Starting),
            handle("w2", 4205, WorkerStatus::Failed),
        ]);

        let summary = await_readiness(&mut handles, &transport, &settings(30, 10), |_| {}).await;

        assert_eq!(summary.ready, vec!["w1"]);
        assert_eq!(summary.failed, vec!["w2"]);
        assert!(!summary.all_ready());
        assert_eq!(transport.probe_count_for("http://127.0.0.1:4205"), 0);
    }

    #[tokio::test]
    async fn test_returns_immediately_when_nothing_starting() {
        let transport = MockTransport::new();
        let mut handles = fleet(vec![
            handle("w1", 4206, WorkerStatus::Ready),
            handle("w2", 4207, WorkerStatus::Failed),
        ]);
        let mut rounds_seen = 0;

        let summary = await_readiness(&mut handles, &transport, &settings(30, 1000), |_| rounds_seen += 1).await;

        assert_eq!(summary.rounds, 0);
        assert_eq!(rounds_seen, 0);
        assert_eq!(transport.probe_count(), 0);
    }

    #[tokio::test]
    async fn test_on_round_sees_every_round() {
        let transport = MockTransport::new();
        transport.healthy_after("http://127.0.0.1:4208", 2);
        let mut handles = fleet(vec![handle("w1", 4208, WorkerStatus::Starting)]);
        let mut statuses = Vec::new();

        await_readiness(&mut handles, &transport, &settings(10, 5), |h| statuses.push(h["w1"].status)).await;

        assert_eq!(
            statuses,
            vec![WorkerStatus::Starting, WorkerStatus::Starting, WorkerStatus::Ready]
        );
    }

    #[tokio::test]
    async fn test_exited_process_is_failed() {
        let transport = MockTransport::new();
        let child = Command::new("sh")
            .arg("-c")
            .arg("exit 2")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        let mut dead = handle("w1", 4209, WorkerStatus::Starting);
        dead.process = Some(child);
        let mut handles = fleet(vec![dead]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let summary = await_readiness(&mut handles, &transport, &settings(30, 10), |_| {}).await;

        assert_eq!(summary.failed, vec!["w1"]);
        let err = handles["w1"].last_error.clone().unwrap();
        assert!(err.contains("exited before becoming healthy: exit code 2"), "{}", err);
    }
}
