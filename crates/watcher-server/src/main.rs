//! webwatch binary

use clap::Parser;
use std::path::PathBuf;
use watcher_server::{Config, WatchServer, load_targets};

/// Watch web pages for content, status and error changes
#[derive(Debug, Parser)]
#[command(name = "webwatch", version, about)]
struct Args {
    /// Configuration file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File with one URL per line
    urls_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Configuration comes first, it decides how logs look.
    let config = Config::load(args.config.as_deref())?;
    common::logging::init_with(config.logging.format, config.log_level());

    let links = load_targets(&args.urls_file)?;
    tracing::info!(
        links = links.len(),
        file = %args.urls_file.display(),
        "URL list loaded"
    );

    WatchServer::new(config, links).run().await?;

    Ok(())
}
