//! In-process stand-in for mysqlsh used by session and monitor tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::invoker::{InvokeError, ShellInvoker};
use super::types::{Credentials, Endpoint, InvocationResult, Language};

pub const HEALTHY_STATUS: &str = r#"{"clusterName":"prodCluster","defaultReplicaSet":{"name":"default","primary":"db1:3306","status":"OK","statusText":"Cluster is ONLINE and can tolerate up to ONE failure.","topology":{"db1:3306":{"address":"db1:3306","memberRole":"PRIMARY","mode":"R/W","status":"ONLINE"},"db2:3306":{"address":"db2:3306","memberRole":"SECONDARY","mode":"R/O","status":"ONLINE"},"db3:3306":{"address":"db3:3306","memberRole":"SECONDARY","mode":"R/O","status":"ONLINE"}},"topologyMode":"Single-Primary"}}"#;

pub const RECOVERING_STATUS: &str = r#"{"clusterName":"prodCluster","defaultReplicaSet":{"status":"OK_NO_TOLERANCE","topology":{"db2:3306":{"address":"db2:3306","memberRole":"SECONDARY","mode":"R/O","status":"RECOVERING"}}}}"#;

/// db3 is down: the cluster still answers, with db3's connection error
/// reported inside its topology entry.
pub const PARTIAL_STATUS: &str = r#"{"clusterName":"prodCluster","defaultReplicaSet":{"name":"default","primary":"db1:3306","status":"OK_NO_TOLERANCE_PARTIAL","statusText":"Cluster is NOT tolerant to any failures. 1 member is not active.","topology":{"db1:3306":{"address":"db1:3306","memberRole":"PRIMARY","mode":"R/W","status":"ONLINE"},"db2:3306":{"address":"db2:3306","memberRole":"SECONDARY","mode":"R/O","status":"ONLINE"},"db3:3306":{"address":"db3:3306","memberRole":"SECONDARY","mode":"n/a","shellConnectError":"MySQL Error 2003 (HY000): Can't connect to MySQL server on 'db3:3306' (111)","status":"(MISSING)"}},"topologyMode":"Single-Primary"}}"#;

/// db1 serves while db2 catches up.
pub const PEER_RECOVERING_STATUS: &str = r#"{"clusterName":"prodCluster","defaultReplicaSet":{"name":"default","primary":"db1:3306","status":"OK_NO_TOLERANCE","topology":{"db1:3306":{"address":"db1:3306","memberRole":"PRIMARY","mode":"R/W","status":"ONLINE"},"db2:3306":{"address":"db2:3306","memberRole":"SECONDARY","mode":"R/O","status":"RECOVERING"}},"topologyMode":"Single-Primary"}}"#;

/// What the fake shell does for one node.
#[derive(Debug, Clone)]
pub struct Reply {
    pub delay: Duration,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Sleep for the whole timeout, then report a timeout.
    pub hang: bool,
    pub missing_tool: bool,
}

impl Reply {
    pub fn online() -> Self {
        Self {
            delay: Duration::ZERO,
            exit_code: Some(0),
            stdout: HEALTHY_STATUS.to_string(),
            stderr: String::new(),
            hang: false,
            missing_tool: false,
        }
    }

    pub fn recovering() -> Self {
        Self::status(RECOVERING_STATUS)
    }

    /// Clean exit printing `stdout`.
    pub fn status(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            ..Self::online()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "MySQL Error 2003 (HY000): Can't connect to MySQL server on 'db9:3306' (111)"
                .into(),
            ..Self::online()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Self::online()
        }
    }

    pub fn missing_tool() -> Self {
        Self {
            missing_tool: true,
            ..Self::online()
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub address: String,
    pub language: Language,
    pub script: String,
}

/// Scripted invoker that also counts concurrent calls per node.
pub struct FakeInvoker {
    default: Mutex<Reply>,
    replies: Mutex<HashMap<String, Reply>>,
    in_flight: Mutex<HashMap<String, usize>>,
    max_in_flight: AtomicUsize,
    calls: Mutex<Vec<Call>>,
}

impl FakeInvoker {
    pub fn new(default: Reply) -> Self {
        Self {
            default: Mutex::new(default),
            replies: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            max_in_flight: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_reply(self, address: &str, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(address.to_string(), reply);
        self
    }

    pub fn set_default(&self, reply: Reply) {
        *self.default.lock().unwrap() = reply;
    }

    /// Highest number of simultaneous invocations seen on any single node.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn reply_for(&self, address: &str) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_else(|| self.default.lock().unwrap().clone())
    }

    fn enter(&self, address: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let count = in_flight.entry(address.to_string()).or_insert(0);
        *count += 1;
        self.max_in_flight.fetch_max(*count, Ordering::SeqCst);
    }

    fn leave(&self, address: &str) {
        if let Some(count) = self.in_flight.lock().unwrap().get_mut(address) {
            *count -= 1;
        }
    }
}

#[async_trait]
impl ShellInvoker for FakeInvoker {
    async fn invoke(
        &self,
        endpoint: &Endpoint,
        _credentials: &Credentials,
        language: Language,
        script: &str,
        timeout: Duration,
    ) -> Result<InvocationResult, InvokeError> {
        let address = endpoint.address();
        let reply = self.reply_for(&address);
        if reply.missing_tool {
            return Err(InvokeError::ToolNotFound {
                program: "mysqlsh".into(),
            });
        }

        self.calls.lock().unwrap().push(Call {
            address: address.clone(),
            language,
            script: script.to_string(),
        });

        self.enter(&address);
        let started_at = Utc::now();
        let clock = Instant::now();
        let wait = if reply.hang { timeout } else { reply.delay.min(timeout) };
        tokio::time::sleep(wait).await;
        let timed_out = reply.hang || reply.delay > timeout;
        self.leave(&address);

        Ok(InvocationResult {
            exit_code: if timed_out { None } else { reply.exit_code },
            stdout: if timed_out { String::new() } else { reply.stdout },
            stderr: reply.stderr,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
            timed_out,
        })
    }
}
