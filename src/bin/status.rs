use anyhow::Result;
use clap::{Parser, Subcommand};
use contract_indexer::query::commands::{cmd_contracts, cmd_cursors, cmd_jobs};
use contract_indexer::query::formatters::OutputFormat;
use contract_indexer::repository::{JobStatus, SqliteRepository};

#[derive(Parser)]
#[command(name = "status")]
#[command(about = "Inspect indexing jobs, cursors and contracts", long_about = None)]
struct Cli {
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Only show this contract.
    #[arg(short, long)]
    contract: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Most recent jobs, newest first.
    Jobs {
        #[arg(long)]
        status: Option<JobStatus>,
    },
    /// Per-contract cursors.
    Cursors,
    /// Registered contracts with stored record counts.
    Contracts,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./indexer.db".to_string());
    let repository = SqliteRepository::open(&database_url)?;

    match cli.command {
        Commands::Jobs { status } => {
            cmd_jobs(&repository, cli.contract, status, &cli.format).await?;
        }
        Commands::Cursors => {
            cmd_cursors(&repository, cli.contract, &cli.format).await?;
        }
        Commands::Contracts => {
            cmd_contracts(&repository, cli.contract, &cli.format).await?;
        }
    }

    Ok(())
}
