//! Terminal rendering shared by the commands.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::{ColoredString, Colorize};

use clusterduck::domain::catalog::Command;
use clusterduck::domain::classifier::ClusterSummary;
use clusterduck::domain::types::{HealthState, InvocationResult, Language, Node, Risk};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Json,
    Yaml,
}

/// Print `data` as JSON or YAML. Returns false for table format so the
/// caller can render its own table.
pub fn print_structured<T: serde::Serialize>(format: Format, data: &T) -> Result<bool> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(data)?),
        Format::Yaml => print!("{}", serde_yaml::to_string(data)?),
        Format::Table => return Ok(false),
    }
    Ok(true)
}

// Pad before coloring; ANSI codes break width formatting.
fn padded(text: impl ToString, width: usize) -> String {
    format!("{:<width$}", text.to_string(), width = width)
}

pub fn health_label(health: HealthState, width: usize) -> ColoredString {
    padded(health, width).color(health.color()).bold()
}

pub fn risk_label(risk: Risk, width: usize) -> ColoredString {
    let text = padded(risk, width);
    match risk {
        Risk::Safe => text.green(),
        Risk::Caution => text.yellow(),
        Risk::Dangerous => text.red().bold(),
    }
}

fn language_label(language: Language, width: usize) -> ColoredString {
    let text = padded(language, width);
    match language {
        Language::Js => text.blue(),
        Language::Sql => text.cyan(),
    }
}

fn clock(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(t) => t.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "-".into(),
    }
}

pub fn print_nodes(nodes: &BTreeMap<String, Node>) {
    println!(
        "  {} {} {} {} {}",
        padded("NODE", 28).bold(),
        padded("HEALTH", 11).bold(),
        padded("CHECKED", 10).bold(),
        padded("SEEN", 10).bold(),
        "ERROR".bold()
    );
    for (address, node) in nodes {
        let checking = if node.checking { "*" } else { " " };
        let error = node
            .last_error
            .as_deref()
            .and_then(|e| e.lines().next())
            .unwrap_or("");
        println!(
            "{} {:<28} {} {:<10} {:<10} {}",
            checking,
            address,
            health_label(node.health, 11),
            clock(node.last_checked),
            clock(node.last_seen),
            error.dimmed()
        );
    }
}

pub fn print_summary(summary: &ClusterSummary) {
    println!();
    println!("{} {}", "cluster".bold(), summary.cluster_name);
    println!("  status:   {} {}", summary.status, summary.status_text.dimmed());
    println!("  topology: {}", summary.topology_mode);
    if let Some(primary) = &summary.primary {
        println!("  primary:  {}", primary);
    }
    for member in &summary.members {
        let marker = if member.is_primary() { "P" } else { " " };
        println!(
            "  {} {:<28} {} {:<4} {}",
            marker.bold(),
            member.address,
            padded(&member.status, 10).color(member.health().color()),
            member.mode,
            member.role.dimmed()
        );
        if let Some(err) = &member.shell_connect_error {
            println!("      {}", err.red());
        }
        for err in &member.instance_errors {
            println!("      {}", err.yellow());
        }
    }
}

pub fn print_catalog<'a>(commands: impl Iterator<Item = &'a Command>) {
    for command in commands {
        println!(
            "  {:<20} {} {} {}",
            command.key.as_deref().unwrap_or("-"),
            language_label(command.language, 4),
            risk_label(command.risk, 10),
            command.label
        );
        if let Some(hint) = &command.hint {
            println!("  {:<36} {}", "", hint.dimmed());
        }
        if let Some(warning) = &command.warning {
            println!("  {:<36} {}", "", warning.red());
        }
    }
}

pub fn print_result(command: &Command, target: &str, result: &InvocationResult) {
    let outcome = if result.timed_out {
        "timed out".red().bold()
    } else if result.succeeded() {
        "ok".green().bold()
    } else {
        "failed".red().bold()
    };
    eprintln!(
        "{} {} on {}: {} ({} ms)",
        "::".blue().bold(),
        command.label,
        target,
        outcome,
        result.elapsed_ms
    );

    let stdout = result.pretty_stdout();
    if !stdout.trim().is_empty() {
        println!("{}", stdout.trim_end());
    }
    if !result.stderr.trim().is_empty() {
        eprintln!("{}", result.stderr.trim_end().red());
    }
}
