//! Command catalog: the preset mysqlsh commands operators can run.
//!
//! Presets are built once per process and never mutated. Ad-hoc commands go
//! through [`Command::custom`], which applies the same sanity checks an
//! operator would otherwise trip over at the shell prompt.

use std::sync::OnceLock;

use serde::Serialize;
use thiserror::Error;

use super::types::{Language, Risk};

/// Catalog key of the command every status poll runs.
pub const STATUS_CHECK_KEY: &str = "status-check";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no command entered")]
    Empty,
    #[error("detected SQL syntax but JS mode is selected; switch to SQL mode")]
    LanguageMismatch,
    #[error("SQL statements should end with a semicolon")]
    MissingTerminator,
    #[error("command '{0}' needs a target node")]
    MissingTarget(String),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
}

/// An immutable command, either from the catalog or typed by an operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub key: Option<String>,
    pub label: String,
    pub language: Language,
    pub risk: Risk,
    pub text: String,
    pub hint: Option<String>,
    pub warning: Option<String>,
    /// Re-poll the cluster once this command finishes (topology changes).
    pub refresh_after: bool,
}

impl Command {
    /// Validate and build an operator-typed command.
    pub fn custom(language: Language, text: &str) -> Result<Self, CommandError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CommandError::Empty);
        }
        match language {
            Language::Js if text.to_ascii_lowercase().starts_with("select") => {
                return Err(CommandError::LanguageMismatch);
            }
            Language::Sql if !text.ends_with(';') => {
                return Err(CommandError::MissingTerminator);
            }
            _ => {}
        }

        Ok(Self {
            key: None,
            label: format!("Custom Command - {}", language),
            language,
            risk: Risk::Caution,
            text: text.to_string(),
            hint: None,
            warning: None,
            refresh_after: false,
        })
    }

    pub fn needs_target(&self) -> bool {
        self.text.contains("<node>")
    }

    /// Fill `<user>@<node>`, `<node>` and `<user>` placeholders.
    pub fn render(&self, user: &str, target: Option<&str>) -> Result<Self, CommandError> {
        let mut text = self.text.clone();
        if self.needs_target() {
            let node = target
                .filter(|t| !t.is_empty())
                .ok_or_else(|| CommandError::MissingTarget(self.label.clone()))?;
            text = text
                .replace("<user>@<node>", &format!("{}@{}", user, node))
                .replace("<node>", node);
        }
        text = text.replace("<user>", user);

        Ok(Self {
            text,
            ..self.clone()
        })
    }

    /// The script body handed to mysqlsh. JS expressions are printed as JSON
    /// so their result reaches stdout in batch mode.
    pub fn script(&self) -> String {
        match self.language {
            Language::Js if !self.text.trim_start().starts_with("print(") => {
                format!("print(JSON.stringify({}))", self.text.trim())
            }
            _ => self.text.clone(),
        }
    }
}

/// Read-only, ordered registry of preset commands.
#[derive(Debug)]
pub struct CommandCatalog {
    status_check: Command,
    commands: Vec<Command>,
}

impl CommandCatalog {
    /// Build a catalog; entries are sorted into display order.
    pub fn new(status_check: Command, mut commands: Vec<Command>) -> Self {
        commands.sort_by_key(|c| (c.risk, c.language == Language::Sql));
        Self {
            status_check,
            commands,
        }
    }

    /// The process-wide preset catalog.
    pub fn builtin() -> &'static CommandCatalog {
        static CATALOG: OnceLock<CommandCatalog> = OnceLock::new();
        CATALOG.get_or_init(|| CommandCatalog::new(Command::from(&STATUS_CHECK), presets()))
    }

    /// The fixed command every status poll runs.
    pub fn status_check(&self) -> &Command {
        &self.status_check
    }

    pub fn get(&self, key: &str) -> Option<&Command> {
        if key == STATUS_CHECK_KEY {
            return Some(&self.status_check);
        }
        self.commands.iter().find(|c| c.key.as_deref() == Some(key))
    }

    pub fn lookup(&self, key: &str) -> Result<&Command, CommandError> {
        self.get(key)
            .ok_or_else(|| CommandError::UnknownCommand(key.to_string()))
    }

    /// Operator-facing presets in display order: safe before caution before
    /// dangerous, JS before SQL within each level.
    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

// ── Presets ────────────────────────────────────────────────

struct Preset {
    key: &'static str,
    label: &'static str,
    language: Language,
    risk: Risk,
    text: &'static str,
    hint: Option<&'static str>,
    warning: Option<&'static str>,
    refresh_after: bool,
}

impl From<&Preset> for Command {
    fn from(p: &Preset) -> Self {
        Command {
            key: Some(p.key.to_string()),
            label: p.label.to_string(),
            language: p.language,
            risk: p.risk,
            text: p.text.to_string(),
            hint: p.hint.map(str::to_string),
            warning: p.warning.map(str::to_string),
            refresh_after: p.refresh_after,
        }
    }
}

const STATUS_CHECK: Preset = Preset {
    key: STATUS_CHECK_KEY,
    label: "Cluster Status Check",
    language: Language::Js,
    risk: Risk::Safe,
    text: "dba.getCluster().status()",
    hint: None,
    warning: None,
    refresh_after: false,
};

/// Operator presets, in source order; [`CommandCatalog::new`] sorts them.
const PRESETS: &[Preset] = &[
    // JS / AdminAPI
    Preset {
        key: "cluster-status",
        label: "Check Cluster Status",
        language: Language::Js,
        risk: Risk::Safe,
        text: "dba.getCluster().status({extended:true})",
        hint: Some("Full topology, lag, errors, etc."),
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "describe",
        label: "List Cluster Instances",
        language: Language::Js,
        risk: Risk::Safe,
        text: "dba.getCluster().describe()",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "rescan",
        label: "Rescan Topology",
        language: Language::Js,
        risk: Risk::Caution,
        text: "dba.getCluster().rescan()",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "check-instance",
        label: "Check Instance Health",
        language: Language::Js,
        risk: Risk::Safe,
        text: "dba.checkInstanceConfiguration('<user>@<node>')",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "check-config",
        label: "Check Global Config",
        language: Language::Js,
        risk: Risk::Safe,
        text: "dba.checkInstanceConfiguration()",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "rejoin",
        label: "Rejoin Instance",
        language: Language::Js,
        risk: Risk::Caution,
        text: "dba.getCluster().rejoinInstance('<node>')",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "set-primary",
        label: "Set Primary Instance",
        language: Language::Js,
        risk: Risk::Dangerous,
        text: "dba.getCluster().setPrimaryInstance('<node>')",
        hint: None,
        warning: Some("Triggers failover; brief downtime for writers."),
        refresh_after: true,
    },
    Preset {
        key: "force-rejoin",
        label: "Force Rejoin (Clone)",
        language: Language::Js,
        risk: Risk::Dangerous,
        text: "dba.getCluster().rejoinInstance('<node>',{force:true})",
        hint: None,
        warning: Some("May discard transactions on the target."),
        refresh_after: false,
    },
    Preset {
        key: "reboot-outage",
        label: "Reboot From Complete Outage",
        language: Language::Js,
        risk: Risk::Dangerous,
        text: "dba.rebootClusterFromCompleteOutage()",
        hint: None,
        warning: Some("Last-resort operation when every node is offline."),
        refresh_after: false,
    },
    Preset {
        key: "add-instance",
        label: "Add Instance (Clone)",
        language: Language::Js,
        risk: Risk::Dangerous,
        text: "dba.getCluster().addInstance('<user>@<node>',{recoveryMethod:'clone'})",
        hint: None,
        warning: Some("Target must be empty; will wipe existing data."),
        refresh_after: false,
    },
    Preset {
        key: "remove-instance",
        label: "Remove Instance",
        language: Language::Js,
        risk: Risk::Dangerous,
        text: "dba.getCluster().removeInstance('<user>@<node>')",
        hint: None,
        warning: Some("Permanent; instance leaves the replication group."),
        refresh_after: false,
    },
    // SQL diagnostics
    Preset {
        key: "hostname",
        label: "Show Hostname / Port",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT @@hostname AS Host, @@port AS Port;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "members",
        label: "Show Cluster Members",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT * FROM performance_schema.replication_group_members;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "processlist",
        label: "Show Processlist",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SHOW FULL PROCESSLIST;",
        hint: Some("Great for spotting long-running or locked queries."),
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "innodb-status",
        label: "Show Engine InnoDB Status",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SHOW ENGINE INNODB STATUS\\G",
        hint: Some("Deadlocks, semaphores, purge lag, etc."),
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "applier-status",
        label: "Show Replication Applier Status",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT * FROM performance_schema.replication_applier_status;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "connection-status",
        label: "Show Replication Connection Status",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT * FROM performance_schema.replication_connection_status;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "gtid-mode",
        label: "Check GTID Mode",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT @@gtid_mode;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "binlog-format",
        label: "Check Binlog Format",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT @@global.binlog_format;",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "ssl",
        label: "Check SSL Settings",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SHOW VARIABLES LIKE '%ssl_mode%';",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    Preset {
        key: "version",
        label: "Server Version",
        language: Language::Sql,
        risk: Risk::Safe,
        text: "SELECT VERSION();",
        hint: None,
        warning: None,
        refresh_after: false,
    },
    // SQL writes
    Preset {
        key: "read-only",
        label: "Set Read-Only Mode",
        language: Language::Sql,
        risk: Risk::Dangerous,
        text: "SET GLOBAL super_read_only=ON; SET GLOBAL read_only=ON;",
        hint: None,
        warning: Some("Stops all writes on this node."),
        refresh_after: false,
    },
    Preset {
        key: "read-write",
        label: "Set Read-Write Mode",
        language: Language::Sql,
        risk: Risk::Dangerous,
        text: "SET GLOBAL super_read_only=OFF; SET GLOBAL read_only=OFF;",
        hint: None,
        warning: Some("Re-enables writes; only safe on the primary."),
        refresh_after: false,
    },
    Preset {
        key: "start-gr",
        label: "START Group Replication",
        language: Language::Sql,
        risk: Risk::Dangerous,
        text: "START GROUP_REPLICATION;",
        hint: None,
        warning: Some("Node rejoins the group and starts distributed recovery."),
        refresh_after: false,
    },
    Preset {
        key: "stop-gr",
        label: "STOP Group Replication",
        language: Language::Sql,
        risk: Risk::Dangerous,
        text: "STOP GROUP_REPLICATION;",
        hint: None,
        warning: Some("Node leaves the group until replication is restarted."),
        refresh_after: false,
    },
    Preset {
        key: "reset-master",
        label: "RESET MASTER (purge binary logs)",
        language: Language::Sql,
        risk: Risk::Dangerous,
        text: "RESET MASTER;",
        hint: None,
        warning: Some("Deletes *all* binlogs; replicas must resync with clone or backup."),
        refresh_after: false,
    },
];

fn presets() -> Vec<Command> {
    PRESETS.iter().map(Command::from).collect()
}
