//! Shoplist CLI
//!
//! Command-line interface for shoplist - shared shopping lists that stay in
//! sync across devices.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shoplist_core::Config;

mod commands;
mod output;

use output::{Output, OutputFormat};

/// Environment variable holding a tracing filter directive
const LOG_ENV: &str = "SHOPLIST_LOG";

#[derive(Parser)]
#[command(name = "shoplist")]
#[command(about = "Shoplist - shared shopping lists, synced in real time")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log sync activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use a different config file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new list
    Create {
        /// List name
        name: String,
    },
    /// Show a list's items and comments
    Show {
        /// List ID or share link
        list: String,
    },
    /// Add an item to a list
    Add {
        /// List ID or share link
        list: String,
        /// What to buy
        text: String,
    },
    /// Check or uncheck an item
    Toggle {
        /// List ID or share link
        list: String,
        /// Item ID, ID prefix, or exact text
        item: String,
    },
    /// Remove an item
    #[command(alias = "delete")]
    Rm {
        /// List ID or share link
        list: String,
        /// Item ID, ID prefix, or exact text
        item: String,
    },
    /// Comment on a list, or delete a comment with --delete
    Comment {
        /// List ID or share link
        list: String,
        /// Comment text
        #[arg(required_unless_present = "delete")]
        text: Option<String>,
        /// Delete the comment with this ID (or ID prefix)
        #[arg(long, conflicts_with = "text", value_name = "ID")]
        delete: Option<String>,
    },
    /// Follow a list live until interrupted
    Watch {
        /// List ID or share link
        list: String,
    },
    /// Print a list's share link
    Share {
        /// List ID or share link
        list: String,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (store_url, api_key, share_base_url, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));

    // Config commands don't need the store
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), cli.config.as_ref(), &output);
    }

    let config = Config::load_with_cli_override(cli.config.as_ref())
        .context("Failed to load configuration")?;
    let store = commands::connect(&config)?;

    match cli.command {
        Commands::Create { name } => commands::list::create(&store, &config, name, &output).await,
        Commands::Show { list } => commands::list::show(&store, list, &output).await,
        Commands::Add { list, text } => commands::item::add(&store, list, text, &output).await,
        Commands::Toggle { list, item } => {
            commands::item::toggle(&store, list, item, &output).await
        }
        Commands::Rm { list, item } => commands::item::delete(&store, list, item, &output).await,
        Commands::Comment {
            list,
            text,
            delete,
        } => match (text, delete) {
            (_, Some(id)) => commands::comment::delete(&store, list, id, &output).await,
            (Some(text), None) => commands::comment::add(&store, list, text, &output).await,
            (None, None) => anyhow::bail!("Nothing to do: give comment text or --delete <ID>"),
        },
        Commands::Watch { list } => commands::watch::watch(&store, list, &output).await,
        Commands::Share { list } => commands::list::share(&store, &config, list, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Initialize stderr logging
///
/// `SHOPLIST_LOG` takes a full filter directive; otherwise only warnings are
/// shown, or debug output for our own crates with `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(format!("shoplist_core={},shoplist_cli={}", level, level))
    });

    // Ignore error if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
