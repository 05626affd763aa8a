//! Node session: one managed node and the ordered stream of commands run on it.
//!
//! All invocations for a node pass through a fair async mutex, so commands
//! run one at a time in arrival order. Operator commands queue without limit;
//! at most one status poll may wait behind the gate, later ones are rejected.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::catalog::Command;
use super::classifier::StatusClassifier;
use super::invoker::{InvokeError, ShellInvoker};
use super::types::{Credentials, Endpoint, HealthState, InvocationResult};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Launch(#[from] InvokeError),
    #[error("a status poll is already queued for {0}")]
    PollPending(String),
}

pub struct NodeSession {
    endpoint: Endpoint,
    credentials: Credentials,
    invoker: Arc<dyn ShellInvoker>,
    status_check: Command,
    timeout: Duration,
    gate: Mutex<()>,
    poll_waiting: AtomicBool,
}

/// Clears the poll-waiting flag even if the waiting future is dropped.
struct WaitingPoll<'a>(&'a AtomicBool);

impl Drop for WaitingPoll<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl NodeSession {
    pub fn new(
        endpoint: Endpoint,
        credentials: Credentials,
        invoker: Arc<dyn ShellInvoker>,
        status_check: Command,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            credentials,
            invoker,
            status_check,
            timeout,
            gate: Mutex::new(()),
            poll_waiting: AtomicBool::new(false),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn address(&self) -> String {
        self.endpoint.address()
    }

    pub fn user(&self) -> &str {
        &self.credentials.user
    }

    /// Run a command after everything queued before it.
    pub async fn run(&self, command: &Command) -> Result<InvocationResult, InvokeError> {
        let _turn = self.gate.lock().await;
        self.invoke(command).await
    }

    /// Run the fixed status check and classify the node.
    pub async fn poll_status(&self) -> Result<(HealthState, InvocationResult), SessionError> {
        if self.poll_waiting.swap(true, Ordering::AcqRel) {
            debug!(node = %self.endpoint, "status poll already queued, dropping");
            return Err(SessionError::PollPending(self.address()));
        }
        let waiting = WaitingPoll(&self.poll_waiting);
        let _turn = self.gate.lock().await;
        drop(waiting);

        let result = self.invoke(&self.status_check).await?;
        let health = StatusClassifier::classify_for(&self.address(), &result);
        debug!(node = %self.endpoint, %health, "status classified");
        Ok((health, result))
    }

    async fn invoke(&self, command: &Command) -> Result<InvocationResult, InvokeError> {
        info!(
            node = %self.endpoint,
            command = %command.label,
            risk = %command.risk,
            "running command"
        );
        self.invoker
            .invoke(
                &self.endpoint,
                &self.credentials,
                command.language,
                &command.script(),
                self.timeout,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::CommandCatalog;
    use crate::domain::testing::{FakeInvoker, PARTIAL_STATUS, PEER_RECOVERING_STATUS, Reply};
    use crate::domain::types::Language;

    fn session(invoker: Arc<FakeInvoker>) -> Arc<NodeSession> {
        Arc::new(NodeSession::new(
            Endpoint::new("db1", 3306),
            Credentials::new("admin", "secret"),
            invoker,
            CommandCatalog::builtin().status_check().clone(),
            Duration::from_millis(500),
        ))
    }

    fn sql(text: &str) -> Command {
        Command::custom(Language::Sql, text).unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn invocations_never_overlap() {
        let reply = Reply::online().after(Duration::from_millis(20));
        let invoker = Arc::new(FakeInvoker::new(reply));
        let session = session(invoker.clone());

        let mut handles = Vec::new();
        for i in 0..8 {
            let s = session.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    s.run(&sql("SELECT 1;")).await.map(|_| ()).map_err(|e| e.to_string())
                } else {
                    // Polls beyond the single queued slot are rejected.
                    match s.poll_status().await {
                        Ok(_) | Err(SessionError::PollPending(_)) => Ok(()),
                        Err(e) => Err(e.to_string()),
                    }
                }
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(invoker.max_in_flight(), 1);
        assert!(invoker.calls().len() >= 4);
    }

    #[tokio::test]
    async fn commands_run_in_arrival_order() {
        let reply = Reply::online().after(Duration::from_millis(30));
        let invoker = Arc::new(FakeInvoker::new(reply));
        let session = session(invoker.clone());

        let mut handles = Vec::new();
        for i in 0..4 {
            let s = session.clone();
            handles.push(tokio::spawn(async move {
                s.run(&sql(&format!("SELECT {};", i))).await.unwrap()
            }));
            // Let each task reach the gate before the next one is spawned.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        for h in handles {
            h.await.unwrap();
        }

        let scripts: Vec<String> = invoker.calls().into_iter().map(|c| c.script).collect();
        assert_eq!(scripts, vec!["SELECT 0;", "SELECT 1;", "SELECT 2;", "SELECT 3;"]);
    }

    #[tokio::test]
    async fn only_one_poll_may_wait() {
        let reply = Reply::online().after(Duration::from_millis(200));
        let invoker = Arc::new(FakeInvoker::new(reply));
        let session = session(invoker.clone());

        let busy = {
            let s = session.clone();
            tokio::spawn(async move { s.run(&sql("SELECT SLEEP(1);")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let queued = {
            let s = session.clone();
            tokio::spawn(async move { s.poll_status().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let rejected = session.poll_status().await;
        assert!(matches!(rejected, Err(SessionError::PollPending(ref a)) if a == "db1:3306"));

        busy.await.unwrap().unwrap();
        let (health, _) = queued.await.unwrap().unwrap();
        assert_eq!(health, HealthState::Online);

        // The slot frees up once the queued poll got its turn.
        assert!(session.poll_status().await.is_ok());
    }

    #[tokio::test]
    async fn launch_failure_leaves_session_usable() {
        let invoker = Arc::new(FakeInvoker::new(Reply::missing_tool()));
        let session = session(invoker.clone());

        let err = session.poll_status().await.unwrap_err();
        assert!(matches!(err, SessionError::Launch(InvokeError::ToolNotFound { .. })));

        invoker.set_default(Reply::online());
        let (health, result) = session.poll_status().await.unwrap();
        assert_eq!(health, HealthState::Online);
        assert!(result.succeeded());
    }

    #[tokio::test]
    async fn timed_out_poll_is_offline() {
        let invoker = Arc::new(FakeInvoker::new(Reply::hang()));
        let session = session(invoker);

        let (health, result) = session.poll_status().await.unwrap();
        assert!(result.timed_out);
        assert_eq!(health, HealthState::Offline);
    }

    #[tokio::test]
    async fn poll_judges_the_node_by_its_own_member_entry() {
        let invoker = Arc::new(FakeInvoker::new(Reply::status(PARTIAL_STATUS)));
        let (health, result) = session(invoker.clone()).poll_status().await.unwrap();
        assert_eq!(health, HealthState::Online);
        assert!(result.stdout.contains("shellConnectError"));

        invoker.set_default(Reply::status(PEER_RECOVERING_STATUS));
        let (health, _) = session(invoker).poll_status().await.unwrap();
        assert_eq!(health, HealthState::Online);
    }

    #[tokio::test]
    async fn poll_runs_the_catalog_status_check() {
        let invoker = Arc::new(FakeInvoker::new(Reply::online()));
        let session = session(invoker.clone());

        session.poll_status().await.unwrap();

        let calls = invoker.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].address, "db1:3306");
        assert_eq!(calls[0].language, Language::Js);
        assert_eq!(calls[0].script, "print(JSON.stringify(dba.getCluster().status()))");
    }
}
