pub mod exec;
pub mod list;
pub mod output;
pub mod run;
pub mod status;
pub mod watch;

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use clusterduck::config::Config;
use clusterduck::domain::invoker::MysqlShell;
use clusterduck::domain::monitor::ClusterMonitor;
use clusterduck::domain::types::{Credentials, Endpoint};

const PASSWORD_VAR: &str = "CLUSTERDUCK_PASSWORD";

/// Where to connect, as given on the command line.
pub struct Connection {
    pub host: String,
    pub port: Option<u16>,
    pub user: Option<String>,
}

/// Everything a command needs to talk to the cluster.
pub struct Cluster {
    pub monitor: ClusterMonitor,
    pub seed: Endpoint,
    pub credentials: Credentials,
}

impl Connection {
    /// Resolve the seed endpoint and credentials, then build a monitor around
    /// the local mysqlsh.
    pub fn open(&self, config: &Config) -> Result<Cluster> {
        let shell = match &config.shell.program {
            Some(program) => MysqlShell::new(program.clone()),
            None => MysqlShell::locate()?,
        };
        tracing::debug!(program = %shell.program().display(), "using mysqlsh");

        let seed = Endpoint::parse(&self.host, self.port.unwrap_or(config.shell.port))?;
        let user = self
            .user
            .clone()
            .unwrap_or_else(|| config.shell.user.clone());
        let credentials = Credentials::new(user, read_password(&seed)?);

        Ok(Cluster {
            monitor: ClusterMonitor::new(Arc::new(shell), config.shell_timeout()),
            seed,
            credentials,
        })
    }
}

/// Build the tokio runtime explicitly; `main` stays synchronous.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

fn read_password(seed: &Endpoint) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_VAR) {
        return Ok(password);
    }

    eprint!("{} password for {}: ", "??".blue().bold(), seed);
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin()
        .read_line(&mut input)
        .context("reading password from stdin")?;
    let password = input.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given (set {} or type it at the prompt)", PASSWORD_VAR);
    }
    Ok(password)
}

pub fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{} {} [y/N] ", "??".yellow().bold(), prompt);
    std::io::stderr().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
