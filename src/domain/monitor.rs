//! Cluster monitor: owns every node session and the per-node state table.
//!
//! The node table is the only shared mutable state. Each update replaces a
//! node's whole record under a write lock that is never held across an
//! external call, so readers see either the old record or the new one.
//!
//! Polling fans out one task per node and waits for all of them; a slow or
//! hung node only delays its own record. Cycles never overlap: a cycle that
//! starts while another is still running is skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::catalog::{Command, CommandCatalog, CommandError};
use super::classifier::ClusterSummary;
use super::invoker::{InvokeError, ShellInvoker};
use super::session::{NodeSession, SessionError};
use super::types::{Credentials, Endpoint, HealthState, InvocationResult, Node};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("node {0} is already monitored")]
    DuplicateNode(String),
    #[error("unknown node {0}")]
    UnknownNode(String),
    #[error("a poll cycle is already running")]
    CycleInProgress,
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Launch(#[from] InvokeError),
    #[error("could not read cluster topology from {address}: {reason}")]
    Discovery { address: String, reason: String },
}

/// Change notifications for presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    NodeAdded { address: String },
    NodeRemoved { address: String },
    NodeUpdated { address: String, health: HealthState },
    /// mysqlsh could not be started for this node.
    LaunchFailed { address: String, error: String },
    CycleCompleted { states: BTreeMap<String, HealthState> },
}

struct PollOutcome {
    address: String,
    health: HealthState,
    launch_error: Option<InvokeError>,
}

struct NodeSlot {
    session: Arc<NodeSession>,
    record: Node,
}

struct Inner {
    invoker: Arc<dyn ShellInvoker>,
    status_check: Command,
    timeout: Duration,
    nodes: RwLock<BTreeMap<String, NodeSlot>>,
    cycle_running: AtomicBool,
    events: broadcast::Sender<MonitorEvent>,
}

/// Marks a poll cycle as running until every clone is dropped.
struct CycleGuard(Arc<Inner>);

impl CycleGuard {
    fn acquire(inner: &Arc<Inner>) -> Option<Self> {
        inner
            .cycle_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(inner.clone()))
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.0.cycle_running.store(false, Ordering::Release);
    }
}

/// Handle to the monitor; cheap to clone, all clones share state.
#[derive(Clone)]
pub struct ClusterMonitor {
    inner: Arc<Inner>,
}

impl ClusterMonitor {
    pub fn new(invoker: Arc<dyn ShellInvoker>, timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                invoker,
                status_check: CommandCatalog::builtin().status_check().clone(),
                timeout,
                nodes: RwLock::new(BTreeMap::new()),
                cycle_running: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    // ── Membership ─────────────────────────────────────────

    /// Start managing a node. Returns its address key.
    pub async fn add_node(
        &self,
        endpoint: Endpoint,
        credentials: Credentials,
    ) -> Result<String, MonitorError> {
        let address = endpoint.address();
        let record = Node::new(endpoint.clone(), &credentials.user);
        let session = Arc::new(self.session_for(endpoint, credentials));

        {
            let mut nodes = self.inner.nodes.write().await;
            if nodes.contains_key(&address) {
                return Err(MonitorError::DuplicateNode(address));
            }
            nodes.insert(address.clone(), NodeSlot { session, record });
        }

        info!(node = %address, "node added");
        self.publish(MonitorEvent::NodeAdded {
            address: address.clone(),
        });
        Ok(address)
    }

    /// Stop managing a node; in-flight results for it are discarded.
    pub async fn remove_node(&self, address: &str) -> Result<Node, MonitorError> {
        let slot = self
            .inner
            .nodes
            .write()
            .await
            .remove(address)
            .ok_or_else(|| MonitorError::UnknownNode(address.to_string()))?;

        info!(node = %address, "node removed");
        self.publish(MonitorEvent::NodeRemoved {
            address: address.to_string(),
        });
        Ok(slot.record)
    }

    /// Read the seed's cluster topology and add every member with the same
    /// credentials. Returns the newly added addresses.
    pub async fn discover(
        &self,
        seed: Endpoint,
        credentials: Credentials,
    ) -> Result<Vec<String>, MonitorError> {
        let address = seed.address();
        let seed_session = self.session_for(seed.clone(), credentials.clone());
        let result = seed_session.run(&self.inner.status_check).await?;

        if !result.succeeded() {
            return Err(MonitorError::Discovery {
                address,
                reason: failure_message(&result).unwrap_or_else(|| "no output".into()),
            });
        }

        let members = match ClusterSummary::parse(&result.stdout) {
            Some(summary) if !summary.members.is_empty() => {
                info!(
                    seed = %address,
                    cluster = %summary.cluster_name,
                    members = summary.members.len(),
                    "discovered cluster topology"
                );
                summary.member_addresses()
            }
            _ => {
                warn!(seed = %address, "no topology in cluster status, managing seed only");
                vec![address.clone()]
            }
        };

        let mut added = Vec::new();
        for member in members {
            let endpoint =
                Endpoint::parse(&member, seed.port).map_err(|e| MonitorError::Discovery {
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
            match self.add_node(endpoint, credentials.clone()).await {
                Ok(a) => added.push(a),
                Err(MonitorError::DuplicateNode(a)) => debug!(node = %a, "already monitored"),
                Err(e) => return Err(e),
            }
        }
        Ok(added)
    }

    // ── Reads ──────────────────────────────────────────────

    /// Copy of every node record, keyed by address.
    pub async fn snapshot(&self) -> BTreeMap<String, Node> {
        self.inner
            .nodes
            .read()
            .await
            .iter()
            .map(|(address, slot)| (address.clone(), slot.record.clone()))
            .collect()
    }

    pub async fn node(&self, address: &str) -> Option<Node> {
        self.inner
            .nodes
            .read()
            .await
            .get(address)
            .map(|slot| slot.record.clone())
    }

    pub async fn addresses(&self) -> Vec<String> {
        self.inner.nodes.read().await.keys().cloned().collect()
    }

    // ── Commands ───────────────────────────────────────────

    /// Run an operator command on one node, right away but behind anything
    /// already queued on that node. Unfilled `<node>` placeholders target the
    /// node itself.
    pub async fn run_command(
        &self,
        address: &str,
        command: &Command,
    ) -> Result<InvocationResult, MonitorError> {
        let session = self.session(address).await?;
        let command = command.render(session.user(), Some(address))?;

        match session.run(&command).await {
            Ok(result) => {
                let output = result.combined();
                let error = failure_message(&result);
                self.update(&session, |n| Node {
                    last_output: output,
                    last_error: error,
                    ..n.clone()
                })
                .await;

                if command.refresh_after {
                    debug!(
                        node = %address,
                        command = %command.label,
                        "refreshing cluster after command"
                    );
                    self.spawn_cycle();
                }
                Ok(result)
            }
            Err(e) => {
                error!(node = %address, error = %e, "could not launch mysqlsh");
                let message = e.to_string();
                self.update(&session, |n| Node {
                    health: HealthState::Unknown,
                    last_error: Some(message.clone()),
                    ..n.clone()
                })
                .await;
                self.publish(MonitorEvent::LaunchFailed {
                    address: address.to_string(),
                    error: message,
                });
                Err(MonitorError::Launch(e))
            }
        }
    }

    // ── Polling ────────────────────────────────────────────

    /// Poll every node concurrently and wait for all of them.
    ///
    /// Fails with [`MonitorError::Launch`] when mysqlsh could not be started
    /// for any node at all; the records are updated either way.
    pub async fn poll_all(&self) -> Result<BTreeMap<String, HealthState>, MonitorError> {
        let cycle = Arc::new(
            CycleGuard::acquire(&self.inner).ok_or(MonitorError::CycleInProgress)?,
        );

        let sessions: Vec<Arc<NodeSession>> = self
            .inner
            .nodes
            .read()
            .await
            .values()
            .map(|slot| slot.session.clone())
            .collect();

        debug!(nodes = sessions.len(), "starting poll cycle");

        // Detached tasks: a caller that stops waiting does not strand a node
        // mid-update, and the cycle stays marked until the last one finishes.
        let handles: Vec<JoinHandle<PollOutcome>> = sessions
            .into_iter()
            .map(|session| {
                let monitor = self.clone();
                let cycle = cycle.clone();
                tokio::spawn(async move {
                    let (health, launch_error) = monitor.poll_node(&session).await;
                    drop(cycle);
                    PollOutcome {
                        address: session.address(),
                        health,
                        launch_error,
                    }
                })
            })
            .collect();
        drop(cycle);

        let mut states = BTreeMap::new();
        let mut launch_errors = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(outcome) => {
                    states.insert(outcome.address, outcome.health);
                    launch_errors.extend(outcome.launch_error);
                }
                Err(e) => warn!(error = %e, "poll task failed"),
            }
        }

        info!(nodes = states.len(), failed_launches = launch_errors.len(), "poll cycle completed");
        self.publish(MonitorEvent::CycleCompleted {
            states: states.clone(),
        });

        if !states.is_empty() && launch_errors.len() == states.len() {
            if let Some(first) = launch_errors.into_iter().next() {
                return Err(MonitorError::Launch(first));
            }
        }
        Ok(states)
    }

    /// Poll on a fixed cadence until the returned handle is aborted.
    pub fn spawn_scheduler(&self, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.spawn_cycle();
            }
        })
    }

    fn spawn_cycle(&self) {
        let monitor = self.clone();
        tokio::spawn(async move {
            match monitor.poll_all().await {
                Ok(_) => {}
                Err(MonitorError::CycleInProgress) => {
                    debug!("previous poll cycle still running, skipping")
                }
                Err(e @ MonitorError::Launch(_)) => error!(error = %e, "poll cycle failed"),
                Err(e) => warn!(error = %e, "poll cycle failed"),
            }
        });
    }

    /// Poll one node and record the outcome. A launch failure is handed back
    /// alongside the node's resulting state.
    async fn poll_node(&self, session: &Arc<NodeSession>) -> (HealthState, Option<InvokeError>) {
        self.update(session, |n| Node {
            checking: true,
            ..n.clone()
        })
        .await;

        let outcome = session.poll_status().await;
        let now = Utc::now();

        let mut launch_error = None;
        let updated = match outcome {
            Ok((health, result)) => {
                let summary = ClusterSummary::parse(&result.stdout);
                let output = result.combined();
                let error = failure_message(&result);
                self.update(session, |n| Node {
                    health,
                    checking: false,
                    last_checked: Some(now),
                    last_seen: if health.is_reachable() {
                        Some(now)
                    } else {
                        n.last_seen
                    },
                    last_output: output,
                    last_error: error,
                    cluster: summary,
                    ..n.clone()
                })
                .await
            }
            Err(SessionError::PollPending(_)) => None,
            Err(SessionError::Launch(e)) => {
                error!(node = %session.endpoint(), error = %e, "could not launch mysqlsh");
                let message = e.to_string();
                let updated = self
                    .update(session, |n| Node {
                        health: HealthState::Unknown,
                        checking: false,
                        last_checked: Some(now),
                        last_error: Some(message.clone()),
                        ..n.clone()
                    })
                    .await;
                self.publish(MonitorEvent::LaunchFailed {
                    address: session.address(),
                    error: message,
                });
                launch_error = Some(e);
                updated
            }
        };

        let health = match updated {
            Some(health) => health,
            None => self
                .node(&session.address())
                .await
                .map(|n| n.health)
                .unwrap_or_default(),
        };
        (health, launch_error)
    }

    // ── Internals ──────────────────────────────────────────

    fn session_for(&self, endpoint: Endpoint, credentials: Credentials) -> NodeSession {
        NodeSession::new(
            endpoint,
            credentials,
            self.inner.invoker.clone(),
            self.inner.status_check.clone(),
            self.inner.timeout,
        )
    }

    async fn session(&self, address: &str) -> Result<Arc<NodeSession>, MonitorError> {
        self.inner
            .nodes
            .read()
            .await
            .get(address)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| MonitorError::UnknownNode(address.to_string()))
    }

    /// Replace a node's record. Skipped when the node was removed or re-added
    /// since `session` was handed out.
    async fn update<F>(&self, session: &Arc<NodeSession>, next: F) -> Option<HealthState>
    where
        F: FnOnce(&Node) -> Node,
    {
        let address = session.address();
        let health = {
            let mut nodes = self.inner.nodes.write().await;
            let slot = nodes.get_mut(&address)?;
            if !Arc::ptr_eq(&slot.session, session) {
                return None;
            }
            slot.record = next(&slot.record);
            slot.record.health
        };

        self.publish(MonitorEvent::NodeUpdated { address, health });
        Some(health)
    }

    fn publish(&self, event: MonitorEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }
}

/// Operator-facing reason an invocation did not succeed.
fn failure_message(result: &InvocationResult) -> Option<String> {
    if result.timed_out {
        return Some(format!("timed out after {} ms", result.elapsed_ms));
    }
    match result.exit_code {
        Some(0) => None,
        code if !result.stderr.is_empty() => {
            debug!(exit_code = ?code, "mysqlsh reported an error");
            Some(result.stderr.clone())
        }
        Some(code) => Some(format!("mysqlsh exited with code {}", code)),
        None => Some("mysqlsh was terminated by a signal".into()),
    }
}
