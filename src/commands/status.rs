//! `clusterduck status`: one poll of every node, then exit.

use anyhow::Result;
use tracing::{info, warn};

use clusterduck::config::Config;
use clusterduck::domain::monitor::MonitorError;

use super::output::{self, Format};
use super::{runtime, Cluster, Connection};

pub fn run(conn: &Connection, config: &Config, discover: bool, format: Format) -> Result<()> {
    let rt = runtime()?;
    rt.block_on(run_async(conn, config, discover, format))
}

async fn run_async(
    conn: &Connection,
    config: &Config,
    discover: bool,
    format: Format,
) -> Result<()> {
    let cluster = conn.open(config)?;
    populate(&cluster, discover).await?;

    cluster.monitor.poll_all().await?;
    let nodes = cluster.monitor.snapshot().await;

    if output::print_structured(format, &nodes)? {
        return Ok(());
    }
    output::print_nodes(&nodes);
    if let Some(summary) = nodes.values().find_map(|n| n.cluster.as_ref()) {
        output::print_summary(summary);
    }
    Ok(())
}

/// Register the seed, plus the rest of its cluster when `discover` is set.
/// An unreachable seed is still monitored so its state gets reported.
pub async fn populate(cluster: &Cluster, discover: bool) -> Result<()> {
    if discover {
        match cluster
            .monitor
            .discover(cluster.seed.clone(), cluster.credentials.clone())
            .await
        {
            Ok(added) => {
                info!(nodes = added.len(), "monitoring discovered nodes");
                return Ok(());
            }
            Err(MonitorError::Launch(e)) => return Err(e.into()),
            Err(e) => warn!(error = %e, "discovery failed, monitoring seed only"),
        }
    }

    cluster
        .monitor
        .add_node(cluster.seed.clone(), cluster.credentials.clone())
        .await?;
    Ok(())
}
