use anyhow::Result;

use clusterduck::config::Config;
use clusterduck::domain::catalog::Command;
use clusterduck::domain::types::Language;

use super::run::execute;
use super::{runtime, Connection};

pub fn run(conn: &Connection, config: &Config, language: Language, text: &str) -> Result<()> {
    // Validate before asking for a password.
    let command = Command::custom(language, text)?;

    let rt = runtime()?;
    rt.block_on(async {
        let cluster = conn.open(config)?;
        execute(&cluster, &command, None).await
    })
}
