use anyhow::Result;
use colored::Colorize;

use clusterduck::domain::catalog::{Command, CommandCatalog};

use super::output::{self, Format};

pub fn run(format: Format) -> Result<()> {
    let catalog = CommandCatalog::builtin();
    let commands: Vec<&Command> = catalog.iter().collect();

    if output::print_structured(format, &commands)? {
        return Ok(());
    }

    println!("{} ({} presets)", "clusterduck commands".bold(), catalog.len());
    output::print_catalog(commands.into_iter());
    println!();
    println!(
        "  run one with {} {}",
        "clusterduck run <key>".bold(),
        "[--target <node>]".dimmed()
    );
    Ok(())
}
