//! movesia CLI entry point

use clap::{Parser, Subcommand};
use movesia_indexer::{
    commands::{
        cmd_search, cmd_serve, cmd_status, cmd_wipe, print_search_results, print_status,
        print_wipe_report, SearchOptions,
    },
    config::Config,
    error::Result,
    host::Host,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "movesia")]
#[command(version, about = "Live semantic index host for Unity projects", long_about = None)]
struct Cli {
    /// Base directory for catalog and config (defaults to per-user app data)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host, reading event envelopes from stdin
    Serve,

    /// Show catalog and vector backend status
    Status,

    /// Wipe the vector collection and catalog
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },

    /// Search the index
    Search {
        /// The search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long, default_value = "5")]
        limit: usize,

        /// Minimum similarity score (0-1)
        #[arg(long)]
        min_score: Option<f32>,

        /// Filter by asset kind (Script | Scene)
        #[arg(long)]
        kind: Option<String>,

        /// Filter by exact project-relative path
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("movesia_indexer=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_from(cli.base_dir.clone())?;
    let host = Host::new(config);

    match cli.command {
        Commands::Serve => cmd_serve(&host).await,
        Commands::Status => {
            let report = cmd_status(&host).await?;
            print_status(&report, cli.json);
            Ok(())
        }
        Commands::Wipe { yes } => {
            let report = cmd_wipe(&host, yes).await?;
            print_wipe_report(&report, cli.json);
            Ok(())
        }
        Commands::Search {
            query,
            limit,
            min_score,
            kind,
            path,
        } => {
            let options = SearchOptions {
                limit,
                min_score,
                kind,
                rel_path: path,
            };
            let results = cmd_search(&host, &query, &options).await?;
            print_search_results(&results, cli.json);
            Ok(())
        }
    }
}
