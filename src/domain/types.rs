use std::fmt;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classifier::ClusterSummary;

pub const DEFAULT_PORT: u16 = 3306;

/// Network location of a MySQL instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port` or `[v6]:port`, falling back to `default_port`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("empty node address");
        }

        if let Some(rest) = input.strip_prefix('[') {
            let Some((host, tail)) = rest.split_once(']') else {
                bail!("unterminated IPv6 address '{}'", input);
            };
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, input)?,
                None if tail.is_empty() => default_port,
                None => bail!("invalid node address '{}'", input),
            };
            return Ok(Self::new(host, port));
        }

        match input.rsplit_once(':') {
            // Bare IPv6 literal without brackets carries no port.
            Some((host, _)) if host.contains(':') => Ok(Self::new(input, default_port)),
            Some((host, port)) => Ok(Self::new(host, parse_port(port, input)?)),
            None => Ok(Self::new(input, default_port)),
        }
    }

    /// Identity key used throughout the monitor: `host:port`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connection URI without a password: `user@host:port`.
    pub fn uri(&self, user: &str) -> String {
        format!("{}@{}", user, self.address())
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(p) if p > 0 => Ok(p),
        _ => bail!("invalid port in node address '{}'", input),
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Login for a node. Never serialized; `Debug` hides the password.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Discrete node health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Online,
    Recovering,
    Offline,
    Unknown,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::Unknown
    }
}

impl HealthState {
    /// Indicator color the presentation layer maps this state to.
    pub fn color(&self) -> &'static str {
        match self {
            HealthState::Online => "green",
            HealthState::Recovering => "yellow",
            HealthState::Offline => "red",
            HealthState::Unknown => "blue",
        }
    }

    /// Whether the node answered, even if degraded.
    pub fn is_reachable(&self) -> bool {
        matches!(self, HealthState::Online | HealthState::Recovering)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Online => write!(f, "ONLINE"),
            HealthState::Recovering => write!(f, "RECOVERING"),
            HealthState::Offline => write!(f, "OFFLINE"),
            HealthState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Script dialect understood by mysqlsh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Js,
    Sql,
}

impl Language {
    /// mysqlsh mode flag.
    pub fn flag(&self) -> &'static str {
        match self {
            Language::Js => "--js",
            Language::Sql => "--sql",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Js => write!(f, "JS"),
            Language::Sql => write!(f, "SQL"),
        }
    }
}

/// How much damage a command can do to the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Safe,
    Caution,
    Dangerous,
}

impl Risk {
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Risk::Dangerous)
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Risk::Safe => write!(f, "safe"),
            Risk::Caution => write!(f, "caution"),
            Risk::Dangerous => write!(f, "dangerous"),
        }
    }
}

/// Outcome of one external shell invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// `None` when the process was killed or ended by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub timed_out: bool,
}

impl InvocationResult {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, each trimmed, skipping empty streams.
    pub fn combined(&self) -> String {
        [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Stdout re-indented when it embeds a JSON object, verbatim otherwise.
    pub fn pretty_stdout(&self) -> String {
        beautify_json(&self.stdout)
    }
}

/// Pretty-print the JSON object spanning the first `{` to the last `}`.
pub fn beautify_json(text: &str) -> String {
    let trimmed = text.trim();
    let parsed = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str::<serde_json::Value>(&trimmed[start..=end]).ok()
        }
        _ => None,
    };
    parsed
        .and_then(|v| serde_json::to_string_pretty(&v).ok())
        .unwrap_or_else(|| trimmed.to_string())
}

/// A managed node as seen by readers of the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    pub endpoint: Endpoint,
    pub user: String,
    pub health: HealthState,
    pub checking: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_output: String,
    pub last_error: Option<String>,
    pub cluster: Option<ClusterSummary>,
}

impl Node {
    pub fn new(endpoint: Endpoint, user: &str) -> Self {
        Self {
            address: endpoint.address(),
            endpoint,
            user: user.to_string(),
            health: HealthState::Unknown,
            checking: false,
            first_seen: Utc::now(),
            last_seen: None,
            last_checked: None,
            last_output: String::new(),
            last_error: None,
            cluster: None,
        }
    }
}
