//! ftpscout - LAN FTP crawler and search indexer

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ftpscout_common::{init_logging, LogConfig, LogLevel};
use ftpscout_indexer::catalog::{Catalog, SqliteCatalog};
use ftpscout_indexer::iptools::Ip;
use ftpscout_indexer::{Indexer, IndexerConfig};
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "ftpscout")]
#[command(author, version, about = "LAN FTP crawler and search indexer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one scheduler tick: scan, sweep, prune, index
    Cron,

    /// Scan an IP range for FTP servers
    Scan {
        /// First address of the range
        first: String,

        /// Last address; defaults to scanning only `first`
        last: Option<String>,
    },

    /// (Re-)index the given FTP servers
    Index {
        /// Index every known server
        #[arg(long)]
        all: bool,

        /// Server addresses
        addresses: Vec<String>,
    },

    /// Check the availability of the given servers
    Checkstatus {
        /// Check every known server
        #[arg(long)]
        all: bool,

        /// Server addresses
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Environment settings first, then the CLI flag on top so `-v` always
    // raises the level.
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }

    // The commands must work even when logging cannot be set up.
    let _ = init_logging(&log_config);

    if let Err(e) = run(cli).await {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = IndexerConfig::load()?;
    let catalog = Arc::new(
        SqliteCatalog::connect(&config.database.url, config.database.bulk_size)
            .await
            .context("failed to open the catalog")?,
    );
    let indexer = Indexer::new(catalog.clone(), config)?;

    match cli.command {
        Commands::Cron => {
            indexer.tick().await?;
        },

        Commands::Scan { first, last } => {
            let first: Ip = first.parse()?;
            let last: Ip = match last {
                Some(text) => text.parse()?,
                None => first,
            };
            let found = indexer.scan_range(first, last).await?;
            println!("{found} servers found");
        },

        Commands::Index { all, addresses } => {
            index_command(&indexer, &catalog, all, &addresses).await?;
        },

        Commands::Checkstatus { all, addresses } => {
            if all {
                indexer.check_all_statuses().await?;
            } else if addresses.is_empty() {
                anyhow::bail!("expected at least one address, or --all");
            } else {
                indexer.check_statuses(&addresses).await?;
            }
        },
    }

    Ok(())
}

async fn index_command(
    indexer: &Indexer<SqliteCatalog>,
    catalog: &SqliteCatalog,
    all: bool,
    addresses: &[String],
) -> anyhow::Result<()> {
    let targets: Vec<String> = if all {
        catalog
            .list_servers()
            .await?
            .into_iter()
            .map(|s| s.address)
            .collect()
    } else if addresses.is_empty() {
        anyhow::bail!("expected at least one address, or --all");
    } else {
        addresses.to_vec()
    };

    let mut failures = 0usize;
    for address in &targets {
        match indexer.index_server(address).await {
            Ok(outcome) => {
                println!(
                    "{}: {} files, {} b ({} insertions, {} deletions)",
                    address,
                    outcome.nb_files,
                    outcome.total_size,
                    outcome.inserted,
                    outcome.deleted
                );
            },
            Err(e) => {
                // One dead server must not block the rest of the batch.
                eprintln!("Error: {address}: {e}");
                failures += 1;
            },
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} of {} servers failed to index", targets.len());
    }
    Ok(())
}
