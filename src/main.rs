mod commands;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use clusterduck::domain::types::Language;
use clusterduck::{config, logging};

use commands::output::Format;
use commands::Connection;

#[derive(Parser)]
#[command(
    name = "clusterduck",
    version,
    about = "Monitor and administer MySQL InnoDB Cluster nodes through mysqlsh"
)]
struct Cli {
    /// Path to config file (default: ~/.config/clusterduck/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConnectionArgs {
    /// Seed node, as host or host:port
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port when --host has none (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Cluster admin user (overrides config)
    #[arg(long, short)]
    user: Option<String>,
}

impl From<ConnectionArgs> for Connection {
    fn from(args: ConnectionArgs) -> Self {
        Connection {
            host: args.host,
            port: args.port,
            user: args.user,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every node once and print its health
    Status {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Only check the seed node, skip topology discovery
        #[arg(long)]
        no_discover: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Poll continuously and redraw after every cycle
    Watch {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Only watch the seed node, skip topology discovery
        #[arg(long)]
        no_discover: bool,

        /// Seconds between polls (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// List the preset commands
    #[command(name = "commands")]
    List {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Run a preset command on the seed node
    Run {
        /// Preset key (see `clusterduck commands`)
        key: String,

        /// Node the command acts on (defaults to the seed)
        #[arg(long)]
        target: Option<String>,

        /// Skip the confirmation prompt for dangerous presets
        #[arg(long, short)]
        yes: bool,

        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Run a custom JS or SQL command on the seed node
    Exec {
        /// Treat the command as AdminAPI JavaScript
        #[arg(long, conflicts_with = "sql", required_unless_present = "sql")]
        js: bool,

        /// Treat the command as SQL (must end with ';')
        #[arg(long)]
        sql: bool,

        /// Command text
        text: String,

        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    logging::init(&config.log)?;

    match cli.command {
        Commands::Status {
            connection,
            no_discover,
            format,
        } => commands::status::run(&connection.into(), &config, !no_discover, format),
        Commands::Watch {
            connection,
            no_discover,
            interval,
        } => commands::watch::run(&connection.into(), &config, !no_discover, interval),
        Commands::List { format } => commands::list::run(format),
        Commands::Run {
            key,
            target,
            yes,
            connection,
        } => commands::run::run(&connection.into(), &config, &key, target.as_deref(), yes),
        Commands::Exec {
            js,
            sql: _,
            text,
            connection,
        } => {
            let language = if js { Language::Js } else { Language::Sql };
            commands::exec::run(&connection.into(), &config, language, &text)
        }
    }
}
