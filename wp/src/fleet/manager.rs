//! FleetManager - actor that owns the worker handles
//!
//! The actor task is the only owner of the name -> WorkerHandle map and of the
//! spawned child processes. [`FleetManager`] is a cheap cloneable handle that
//! talks to it over channels. Routed calls run outside the actor so calls to
//! different workers proceed concurrently; only the route lookup and the
//! outcome bookkeeping go through it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::error::FleetError;
use super::events::{DEFAULT_EVENT_CAPACITY, FleetEvent};
use super::launcher::{LaunchSettings, Launcher};
use super::messages::{FleetCommand, FleetResponse};
use super::readiness::{ReadinessSettings, ReadinessSummary, await_readiness};
use super::router::{Route, route};
use super::transport::{HttpTransport, WorkerTransport};
use super::worker::{WorkerHandle, WorkerInfo, WorkerStatus};
use crate::config::FleetConfig;

/// Lifecycle phase of the whole fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetPhase {
    Uninitialized,
    Initializing,
    Operational,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for FleetPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FleetPhase::Uninitialized => "uninitialized",
            FleetPhase::Initializing => "initializing",
            FleetPhase::Operational => "operational",
            FleetPhase::ShuttingDown => "shutting_down",
            FleetPhase::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// What a call to a non-ready worker, or a failed call, returns
///
/// One policy per manager; a manager never mixes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPolicy {
    /// Log and return an empty JSON object
    #[default]
    Lenient,
    /// Return the error to the caller
    Strict,
}

/// Neutral result returned under [`CallPolicy::Lenient`]
pub fn empty_result() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Point-in-time view published on every change
#[derive(Debug, Clone, PartialEq, Eq)]
struct FleetSnapshot {
    phase: FleetPhase,
    workers: BTreeMap<String, WorkerStatus>,
}

/// Publishes snapshots and emits events for whatever changed since the last one
struct Publisher {
    snapshot_tx: watch::Sender<FleetSnapshot>,
    event_tx: broadcast::Sender<FleetEvent>,
}

impl Publisher {
    fn publish(&self, phase: FleetPhase, workers: &BTreeMap<String, WorkerHandle>) {
        let previous = self.snapshot_tx.borrow().clone();

        if previous.phase != phase {
            let _ = self.event_tx.send(FleetEvent::PhaseChanged { phase });
        }
        for (name, handle) in workers {
            let from = previous.workers.get(name).copied().unwrap_or(WorkerStatus::Unknown);
            if from != handle.status {
                let _ = self.event_tx.send(FleetEvent::WorkerStatusChanged {
                    worker: name.clone(),
                    from,
                    to: handle.status,
                    reason: handle.last_error.clone(),
                });
            }
        }

        let statuses = workers.iter().map(|(name, h)| (name.clone(), h.status)).collect();
        self.snapshot_tx.send_replace(FleetSnapshot {
            phase,
            workers: statuses,
        });
    }
}

/// Handle to send commands to the fleet actor
#[derive(Clone)]
pub struct FleetManager {
    tx: mpsc::Sender<FleetCommand>,
    transport: Arc<dyn WorkerTransport>,
    policy: CallPolicy,
    call_timeout: Duration,
    snapshot_rx: watch::Receiver<FleetSnapshot>,
    event_tx: broadcast::Sender<FleetEvent>,
}

impl FleetManager {
    /// Spawn a fleet actor that talks to workers over HTTP
    pub fn spawn(config: FleetConfig) -> eyre::Result<Self> {
        debug!(workers = config.workers.len(), "FleetManager::spawn: called");
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::spawn_with_transport(config, transport))
    }

    /// Spawn a fleet actor over a custom transport
    pub fn spawn_with_transport(config: FleetConfig, transport: Arc<dyn WorkerTransport>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = watch::channel(FleetSnapshot {
            phase: FleetPhase::Uninitialized,
            workers: BTreeMap::new(),
        });
        let (event_tx, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);

        let policy = config.call_policy;
        let call_timeout = config.call_timeout();
        let actor = FleetActor {
            config,
            transport: transport.clone(),
            workers: BTreeMap::new(),
            phase: FleetPhase::Uninitialized,
            publisher: Publisher {
                snapshot_tx,
                event_tx: event_tx.clone(),
            },
        };
        tokio::spawn(actor.run(rx));

        info!(?policy, "FleetManager spawned");
        Self {
            tx,
            transport,
            policy,
            call_timeout,
            snapshot_rx,
            event_tx,
        }
    }

    /// Launch every configured worker and wait for readiness
    ///
    /// Ends operational however many workers became ready. Only fails when
    /// called twice or when the actor is gone.
    pub async fn initialize(&self) -> FleetResponse<ReadinessSummary> {
        debug!("FleetManager::initialize: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FleetCommand::Initialize { reply: reply_tx })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FleetError::ChannelClosed)?
    }

    /// Call `tool` on `worker` with the default call timeout
    pub async fn call(&self, worker: &str, tool: &str, params: Value) -> FleetResponse<Value> {
        self.call_with_timeout(worker, tool, params, self.call_timeout).await
    }

    /// Call `tool` on `worker`, overriding the call timeout for slow tools
    ///
    /// Under the lenient policy every refusal or failure yields `Ok({})`; under
    /// the strict policy it is returned as an error. Refused calls never touch
    /// the network.
    pub async fn call_with_timeout(
        &self,
        worker: &str,
        tool: &str,
        params: Value,
        timeout: Duration,
    ) -> FleetResponse<Value> {
        debug!(%worker, %tool, ?timeout, "FleetManager::call_with_timeout: called");
        let outcome = self.try_call(worker, tool, params, timeout).await;
        self.apply_policy(worker, tool, outcome)
    }

    /// Call `tool` on `worker` with the default timeout, bypassing the call policy
    ///
    /// Refusals and failures always come back as errors, for callers that need
    /// to tell an empty answer from a failed worker.
    pub async fn call_strict(&self, worker: &str, tool: &str, params: Value) -> FleetResponse<Value> {
        debug!(%worker, %tool, "FleetManager::call_strict: called");
        self.try_call(worker, tool, params, self.call_timeout).await
    }

    async fn try_call(&self, worker: &str, tool: &str, params: Value, timeout: Duration) -> FleetResponse<Value> {
        let target = self.resolve(worker).await?;
        let result = route(self.transport.as_ref(), &target, tool, params, timeout).await;

        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        };
        if self
            .tx
            .send(FleetCommand::RecordOutcome {
                worker: worker.to_string(),
                outcome,
            })
            .await
            .is_err()
        {
            debug!(%worker, "try_call: actor gone, outcome not recorded");
        }
        result
    }

    async fn resolve(&self, worker: &str) -> FleetResponse<Route> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FleetCommand::Resolve {
                worker: worker.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FleetError::ChannelClosed)?
    }

    fn apply_policy(&self, worker: &str, tool: &str, outcome: FleetResponse<Value>) -> FleetResponse<Value> {
        match (self.policy, outcome) {
            (_, Ok(value)) => Ok(value),
            (CallPolicy::Strict, Err(e)) => {
                debug!(%worker, %tool, error = %e, "apply_policy: strict, returning error");
                Err(e)
            }
            (CallPolicy::Lenient, Err(e)) => {
                if e.is_refusal() {
                    warn!(%worker, %tool, error = %e, "Worker not ready, returning empty result");
                } else {
                    warn!(%worker, %tool, error = %e, "Call failed, returning empty result");
                }
                Ok(empty_result())
            }
        }
    }

    /// Detailed state of every worker
    pub async fn workers(&self) -> FleetResponse<Vec<WorkerInfo>> {
        debug!("FleetManager::workers: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FleetCommand::Workers { reply: reply_tx })
            .await
            .map_err(|_| FleetError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FleetError::ChannelClosed)
    }

    /// Terminate every spawned worker and clear all handles
    ///
    /// Idempotent and never fails; problems stopping a worker are logged.
    pub async fn shutdown(&self) {
        debug!("FleetManager::shutdown: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(FleetCommand::Shutdown { reply: reply_tx }).await.is_err() {
            debug!("FleetManager::shutdown: actor already gone");
            return;
        }
        if reply_rx.await.is_err() {
            debug!("FleetManager::shutdown: actor dropped reply");
        }
    }

    /// Worker name -> status, current at any point including mid-initialize
    pub fn status_snapshot(&self) -> BTreeMap<String, WorkerStatus> {
        self.snapshot_rx.borrow().workers.clone()
    }

    pub fn phase(&self) -> FleetPhase {
        self.snapshot_rx.borrow().phase
    }

    /// Subscribe to phase and status transitions
    pub fn subscribe_events(&self) -> broadcast::Receiver<FleetEvent> {
        self.event_tx.subscribe()
    }
}

/// Owns the worker handles; runs as a single tokio task
struct FleetActor {
    config: FleetConfig,
    transport: Arc<dyn WorkerTransport>,
    workers: BTreeMap<String, WorkerHandle>,
    phase: FleetPhase,
    publisher: Publisher,
}

impl FleetActor {
    async fn run(mut self, mut rx: mpsc::Receiver<FleetCommand>) {
        debug!("FleetActor::run: started");
        while let Some(cmd) = rx.recv().await {
            match cmd {
                FleetCommand::Initialize { reply } => {
                    let result = self.initialize().await;
                    let _ = reply.send(result);
                }
                FleetCommand::Resolve { worker, reply } => {
                    let _ = reply.send(self.resolve(&worker));
                }
                FleetCommand::RecordOutcome { worker, outcome } => {
                    self.record_outcome(&worker, outcome);
                }
                FleetCommand::Workers { reply } => {
                    let _ = reply.send(self.workers.values().map(WorkerHandle::info).collect());
                }
                FleetCommand::Shutdown { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                }
            }
        }
        debug!("FleetActor::run: all handles dropped");
        self.shutdown().await;
    }

    fn set_phase(&mut self, phase: FleetPhase) {
        info!(from = %self.phase, to = %phase, "Fleet phase changed");
        self.phase = phase;
        self.publisher.publish(phase, &self.workers);
    }

    async fn initialize(&mut self) -> FleetResponse<ReadinessSummary> {
        debug!("FleetActor::initialize: called");
        if self.phase != FleetPhase::Uninitialized {
            return Err(FleetError::InvalidPhase {
                expected: FleetPhase::Uninitialized,
                actual: self.phase,
            });
        }

        let mut specs = Vec::new();
        for spec in &self.config.workers {
            if self.workers.contains_key(&spec.name) {
                warn!(worker = %spec.name, "Duplicate worker name, ignoring later entry");
                continue;
            }
            self.workers
                .insert(spec.name.clone(), WorkerHandle::new(spec.clone(), &self.config.host));
            specs.push(spec.clone());
        }
        self.set_phase(FleetPhase::Initializing);
        info!(count = specs.len(), "Starting workers");

        let launcher = Launcher::new(self.transport.clone(), LaunchSettings::from(&self.config));
        let launched = futures::future::join_all(specs.iter().map(|spec| launcher.launch(spec))).await;
        for handle in launched {
            self.workers.insert(handle.spec.name.clone(), handle);
        }
        self.publisher.publish(self.phase, &self.workers);

        let settings = ReadinessSettings::from(&self.config);
        let phase = self.phase;
        let publisher = &self.publisher;
        let summary = await_readiness(&mut self.workers, self.transport.as_ref(), &settings, |workers| {
            publisher.publish(phase, workers)
        })
        .await;

        self.set_phase(FleetPhase::Operational);
        Ok(summary)
    }

    fn resolve(&self, worker: &str) -> FleetResponse<Route> {
        if self.phase != FleetPhase::Operational {
            return Err(FleetError::NotOperational { phase: self.phase });
        }
        let handle = self.workers.get(worker).ok_or_else(|| FleetError::UnknownWorker {
            worker: worker.to_string(),
        })?;
        if handle.status != WorkerStatus::Ready {
            return Err(FleetError::NotReady {
                worker: worker.to_string(),
                status: handle.status,
            });
        }
        Ok(Route {
            worker: worker.to_string(),
            base_url: handle.base_url.clone(),
        })
    }

    /// Track consecutive failures and demote past the configured threshold
    ///
    /// Without a threshold, ready is sticky.
    fn record_outcome(&mut self, worker: &str, outcome: Result<(), String>) {
        let Some(handle) = self.workers.get_mut(worker) else {
            debug!(%worker, "record_outcome: worker no longer tracked");
            return;
        };
        match outcome {
            Ok(()) => handle.consecutive_failures = 0,
            Err(reason) => {
                handle.consecutive_failures += 1;
                debug!(%worker, failures = handle.consecutive_failures, "record_outcome: call failed");
                if let Some(threshold) = self.config.failure_threshold
                    && handle.status == WorkerStatus::Ready
                    && handle.consecutive_failures >= threshold
                {
                    let failures = handle.consecutive_failures;
                    handle.mark_failed(format!(
                        "demoted after {} consecutive call failures: {}",
                        failures, reason
                    ));
                    self.publisher.publish(self.phase, &self.workers);
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        debug!("FleetActor::shutdown: called");
        if self.phase == FleetPhase::Terminated {
            debug!("FleetActor::shutdown: already terminated");
            return;
        }
        self.set_phase(FleetPhase::ShuttingDown);

        let timeout = self.config.shutdown_timeout();
        let stops: Vec<_> = self
            .workers
            .iter_mut()
            .filter_map(|(name, handle)| handle.process.take().map(|child| terminate(name.clone(), child, timeout)))
            .collect();
        info!(count = stops.len(), "Stopping workers");
        futures::future::join_all(stops).await;

        self.workers.clear();
        self.set_phase(FleetPhase::Terminated);
    }
}

/// SIGTERM the child, wait up to `timeout`, then SIGKILL
async fn terminate(worker: String, mut child: Child, timeout: Duration) {
    debug!(%worker, "terminate: called");
    let Some(pid) = child.id() else {
        debug!(%worker, "terminate: already exited");
        return;
    };

    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(%worker, pid, error = %e, "Failed to send SIGTERM");
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            warn!(%worker, pid, error = %e, "Failed to terminate worker");
        }
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => info!(%worker, pid, %status, "Stopped worker"),
        Ok(Err(e)) => warn!(%worker, pid, error = %e, "Error waiting for worker to stop"),
        Err(_) => {
            warn!(%worker, pid, "Worker did not stop gracefully, sending SIGKILL");
            if let Err(e) = child.kill().await {
                warn!(%worker, pid, error = %e, "Failed to kill worker");
            }
        }
    }
}
