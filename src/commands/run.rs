//! `clusterduck run` / `clusterduck exec`: one command on the seed node.

use anyhow::Result;
use colored::Colorize;

use clusterduck::config::Config;
use clusterduck::domain::catalog::{Command, CommandCatalog};

use super::{confirm, output, runtime, Cluster, Connection};

pub fn run(
    conn: &Connection,
    config: &Config,
    key: &str,
    target: Option<&str>,
    yes: bool,
) -> Result<()> {
    let command = CommandCatalog::builtin().lookup(key)?;

    if command.risk.requires_confirmation() && !yes {
        if let Some(warning) = &command.warning {
            eprintln!("{} {}", "!!".red().bold(), warning);
        }
        if !confirm(&format!("Run '{}' on {}?", command.label, conn.host))? {
            eprintln!("{} cancelled", "::".blue().bold());
            return Ok(());
        }
    }

    let rt = runtime()?;
    rt.block_on(async {
        let cluster = conn.open(config)?;
        execute(&cluster, command, target).await
    })
}

/// Run `command` on the seed. `<node>` placeholders point at `target`, or at
/// the seed itself when no target is given. Tool errors are printed, not
/// returned.
pub async fn execute(cluster: &Cluster, command: &Command, target: Option<&str>) -> Result<()> {
    let address = cluster
        .monitor
        .add_node(cluster.seed.clone(), cluster.credentials.clone())
        .await?;

    let command = command.render(&cluster.credentials.user, Some(target.unwrap_or(&address)))?;
    let result = cluster.monitor.run_command(&address, &command).await?;

    output::print_result(&command, &address, &result);
    Ok(())
}
