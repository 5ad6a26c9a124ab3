//! analyzer-worker — stream-driven article enrichment worker.
//!
//! Consumes scraped articles from the broker stream in a consumer group,
//! batches them, enriches them with categories and embeddings, and bulk
//! writes the results to the search index.

use clap::Parser;
use tracing::info;

use newsflow_analyzer::PipelineHost;
use newsflow_core::{config, Config};

/// Stream-driven article enrichment worker.
#[derive(Parser, Debug)]
#[command(name = "analyzer-worker", version, about)]
struct Cli {
    /// Path to an env file with deployment configuration. Defaults to `.env`
    /// in the working directory.
    #[arg(long, env = "NEWSFLOW_ENV_FILE")]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)?;
        }
        None => config::load_dotenv(),
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    config.log_summary();

    let host = PipelineHost::new(config);
    let shutdown = host.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received termination signal, shutting down");
            let _ = shutdown.send(true);
        }
    });

    host.run().await
}
