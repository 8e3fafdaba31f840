use crate::query::formatters::{OutputFormat, format_contracts, format_cursors, format_jobs};
use crate::repository::{Contract, Job, JobStatus, Repository, SqliteRepository};
use anyhow::Result;

/// A contract with the number of records stored for it.
#[derive(Debug, Clone)]
pub struct ContractStatus {
    pub contract: Contract,
    pub raw_invocations: usize,
    pub event_logs: usize,
    pub undecoded_event_logs: usize,
    pub transfers: usize,
}

pub async fn load_jobs(
    repository: &SqliteRepository,
    contract_id: Option<i64>,
    status: Option<JobStatus>,
) -> Result<Vec<Job>> {
    let jobs = repository.list_jobs(contract_id).await?;
    Ok(jobs
        .into_iter()
        .filter(|job| status.is_none_or(|status| job.status == status))
        .collect())
}

pub async fn load_contracts(
    repository: &SqliteRepository,
    contract_id: Option<i64>,
) -> Result<Vec<ContractStatus>> {
    let mut statuses = Vec::new();

    for contract in repository.list_contracts().await? {
        if contract_id.is_some_and(|id| id != contract.id) {
            continue;
        }
        let address = contract.address;
        statuses.push(ContractStatus {
            raw_invocations: repository.count_raw_invocations(address).await?,
            event_logs: repository.count_event_logs(address).await?,
            undecoded_event_logs: repository.count_undecoded_event_logs(address).await?,
            transfers: repository.count_transfers(address).await?,
            contract,
        });
    }

    Ok(statuses)
}

pub async fn cmd_jobs(
    repository: &SqliteRepository,
    contract_id: Option<i64>,
    status: Option<JobStatus>,
    format: &OutputFormat,
) -> Result<()> {
    let jobs = load_jobs(repository, contract_id, status).await?;
    println!("{}", format_jobs(&jobs, format));
    Ok(())
}

pub async fn cmd_cursors(
    repository: &SqliteRepository,
    contract_id: Option<i64>,
    format: &OutputFormat,
) -> Result<()> {
    let cursors = repository.list_cursors(contract_id).await?;
    println!("{}", format_cursors(&cursors, format));
    Ok(())
}

pub async fn cmd_contracts(
    repository: &SqliteRepository,
    contract_id: Option<i64>,
    format: &OutputFormat,
) -> Result<()> {
    let contracts = load_contracts(repository, contract_id).await?;
    println!("{}", format_contracts(&contracts, format));
    Ok(())
}
