use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::domain::types::DEFAULT_PORT;

const ENV_PREFIX: &str = "CLUSTERDUCK_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub shell: ShellConfig,
    pub monitor: MonitorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Explicit mysqlsh path; searched on PATH and install dirs when unset.
    pub program: Option<PathBuf>,
    pub timeout_secs: u64,
    pub user: String,
    pub port: u16,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: None,
            timeout_secs: 30,
            user: "root".into(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("clusterduck").join("config.yaml"))
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }

    fn validate(self) -> Result<Self> {
        if self.shell.timeout_secs == 0 {
            bail!("shell.timeout_secs must be at least 1");
        }
        if self.monitor.poll_interval_secs == 0 {
            bail!("monitor.poll_interval_secs must be at least 1");
        }
        if self.shell.user.trim().is_empty() {
            bail!("shell.user must not be empty");
        }
        Ok(self)
    }
}

/// Load defaults, then the YAML file, then `CLUSTERDUCK_*` variables.
/// A missing file is not an error.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => Config::path()?,
    };
    load_layers(&path, ENV_PREFIX)
}

fn load_layers(path: &Path, env_prefix: &str) -> Result<Config> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed(env_prefix).split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()
}
