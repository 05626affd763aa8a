//! `clusterduck watch`: poll on a cadence and redraw after every cycle.

use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use clusterduck::config::Config;
use clusterduck::domain::monitor::MonitorEvent;

use super::output;
use super::status::populate;
use super::{runtime, Connection};

pub fn run(
    conn: &Connection,
    config: &Config,
    discover: bool,
    interval: Option<u64>,
) -> Result<()> {
    let interval = interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.poll_interval());
    if interval.is_zero() {
        anyhow::bail!("--interval must be at least 1 second");
    }

    let rt = runtime()?;
    rt.block_on(run_async(conn, config, discover, interval))
}

async fn run_async(
    conn: &Connection,
    config: &Config,
    discover: bool,
    interval: Duration,
) -> Result<()> {
    let cluster = conn.open(config)?;
    populate(&cluster, discover).await?;

    let mut events = cluster.monitor.subscribe();
    let scheduler = cluster.monitor.spawn_scheduler(interval);
    info!(interval_secs = interval.as_secs(), "watching cluster");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            event = events.recv() => match event {
                Ok(MonitorEvent::CycleCompleted { .. }) => {
                    let nodes = cluster.monitor.snapshot().await;
                    // Clear screen, cursor home.
                    print!("\x1B[2J\x1B[H");
                    println!(
                        "{} {} (every {}s, Ctrl+C to quit)",
                        "clusterduck".bold(),
                        Local::now().format("%H:%M:%S"),
                        interval.as_secs()
                    );
                    output::print_nodes(&nodes);
                    if let Some(summary) = nodes.values().find_map(|n| n.cluster.as_ref()) {
                        output::print_summary(summary);
                    }
                }
                Ok(MonitorEvent::LaunchFailed { address, error }) => {
                    scheduler.abort();
                    anyhow::bail!("could not launch mysqlsh for {}: {}", address, error);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    scheduler.abort();
    info!("stopped watching");
    Ok(())
}
