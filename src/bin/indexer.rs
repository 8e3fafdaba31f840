use anyhow::Result;
use clap::{Parser, ValueEnum};
use contract_indexer::auto::AutoIngestor;
use contract_indexer::config::Config;
use contract_indexer::ingest::TokenMetadataCache;
use contract_indexer::jobs::{JobProcessor, JobScheduler, ProcessorTimings};
use contract_indexer::repository::{Repository, SqliteRepository};
use contract_indexer::rpc::ClientRegistry;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Scheduler and processor over the job queue.
    Jobs,
    /// Cursor-driven ingestion of every contract, no job queue.
    Auto,
}

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index traces, events and token transfers of registered contracts", long_about = None)]
struct Cli {
    #[arg(short, long, value_enum, default_value = "jobs")]
    mode: Mode,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("Starting contract indexer in {:?} mode", cli.mode);

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Networks: {:?}", config.networks.keys().collect::<Vec<_>>());

    let repository: Arc<dyn Repository> = Arc::new(SqliteRepository::open(&config.database_url)?);
    info!("Database initialized");

    let registry = Arc::new(ClientRegistry::from_config(&config)?);
    info!("RPC clients connected for {} network(s)", registry.chains().len());

    let tokens = Arc::new(TokenMetadataCache::new());
    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    match cli.mode {
        Mode::Jobs => {
            let scheduler = JobScheduler::new(
                repository.clone(),
                registry.clone(),
                config.job_poll_interval,
            );
            let processor = JobProcessor::new(
                repository,
                registry,
                tokens,
                config.max_batch_attempts,
                ProcessorTimings {
                    job_delay: config.job_delay,
                    poll_interval: config.job_poll_interval,
                    error_backoff: config.job_error_backoff,
                },
            );
            let token = shutdown.clone();
            tasks.spawn(async move { scheduler.run(token).await });
            let token = shutdown.clone();
            tasks.spawn(async move { processor.run(token).await });
        }
        Mode::Auto => {
            let auto = AutoIngestor::new(repository, registry, tokens, &config);
            let token = shutdown.clone();
            tasks.spawn(async move { auto.run(token).await });
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested");
    shutdown.cancel();

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Indexer task failed: {:#}", e),
            Err(e) => error!("Indexer task panicked: {}", e),
        }
    }

    info!("Contract indexer stopped");
    Ok(())
}
