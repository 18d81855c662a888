use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod formatter;

use commands::CommandContext;

#[derive(Parser)]
#[command(name = "pagestore")]
#[command(author, version, about = "CLI for the pagestore paged value store", long_about = None)]
struct Cli {
    /// Path to the store's data file
    #[arg(value_name = "STORE")]
    store: String,

    /// Output format: json, table, pretty
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Page size used when the store is created
    #[arg(long, default_value_t = 4096)]
    page_size: usize,

    /// Open without taking the write lock
    #[arg(long)]
    read_only: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value under a key
    Put {
        key: String,
        /// Value text; ignored when --file is given
        value: Option<String>,
        /// Read the value from a file
        #[arg(long)]
        file: Option<String>,
        /// Fail instead of replacing an existing value
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Append to the value stored under a key
    Append {
        key: String,
        value: Option<String>,
        #[arg(long)]
        file: Option<String>,
    },

    /// Print the value stored under a key
    Get {
        key: String,
        /// Write the raw value to a file instead
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Remove a key and its value
    Remove { key: String },

    /// List keys, optionally restricted to a prefix
    Scan {
        #[arg(long)]
        prefix: Option<String>,
        /// Stop after this many keys
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show page and cache statistics
    Stats,

    /// Show operation counters
    Metrics,

    /// Show what recovery did when the store was opened
    Recover,

    /// Count journal records per transaction
    Journal,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let ctx = CommandContext::new(&cli.store, &cli.format, cli.page_size, cli.read_only)?;

    match cli.command {
        Some(command) => execute_command(&ctx, command)?,
        None => commands::store::stats(&ctx)?,
    }

    ctx.close()
}

fn execute_command(ctx: &CommandContext, command: Commands) -> Result<()> {
    match command {
        Commands::Put { key, value, file, no_overwrite } => {
            commands::value::put(ctx, &key, value.as_deref(), file.as_deref(), !no_overwrite)
        }
        Commands::Append { key, value, file } => {
            commands::value::append(ctx, &key, value.as_deref(), file.as_deref())
        }
        Commands::Get { key, output } => commands::value::get(ctx, &key, output.as_deref()),
        Commands::Remove { key } => commands::value::remove(ctx, &key),
        Commands::Scan { prefix, limit } => commands::value::scan(ctx, prefix.as_deref(), limit),
        Commands::Stats => commands::store::stats(ctx),
        Commands::Metrics => commands::store::metrics(ctx),
        Commands::Recover => commands::store::recover(ctx),
        Commands::Journal => commands::store::journal(ctx),
    }
}
