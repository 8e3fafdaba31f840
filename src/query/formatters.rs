use super::commands::ContractStatus;
use crate::repository::{Job, MetadataCursor, CURRENT_BLOCK, TOTAL_BLOCKS};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde_json::{Value, json};

const ERROR_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

pub fn format_jobs(jobs: &[Job], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_jobs_table(jobs),
        OutputFormat::Json => format_jobs_json(jobs),
        OutputFormat::Csv => format_jobs_csv(jobs),
    }
}

fn format_jobs_table(jobs: &[Job]) -> String {
    if jobs.is_empty() {
        return "No jobs found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "ID", "Contract", "Type", "Status", "Start", "End", "Progress", "Created", "Error",
        ]);

    for job in jobs {
        table.add_row(vec![
            Cell::new(job.id),
            Cell::new(job.contract_id),
            Cell::new(job.job_type),
            Cell::new(job.status),
            Cell::new(optional(job.start_block())),
            Cell::new(optional(job.end_block())),
            Cell::new(progress(job)),
            Cell::new(job.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(job.error_message.as_deref().map(preview).unwrap_or_default()),
        ]);
    }

    table.to_string()
}

fn format_jobs_json(jobs: &[Job]) -> String {
    let json_jobs: Vec<_> = jobs
        .iter()
        .map(|job| {
            json!({
                "id": job.id,
                "contract_id": job.contract_id,
                "job_type": job.job_type,
                "status": job.status,
                "metadata": Value::Object(job.metadata.clone()),
                "created_at": job.created_at.to_rfc3339(),
                "updated_at": job.updated_at.to_rfc3339(),
                "started_at": job.started_at.map(|at| at.to_rfc3339()),
                "completed_at": job.completed_at.map(|at| at.to_rfc3339()),
                "error_message": job.error_message,
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_jobs).unwrap_or_else(|_| "[]".to_string())
}

fn format_jobs_csv(jobs: &[Job]) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record([
        "id",
        "contract_id",
        "job_type",
        "status",
        "start_block",
        "end_block",
        "current_block",
        "created_at",
        "completed_at",
        "error_message",
    ]);

    for job in jobs {
        let _ = wtr.write_record([
            job.id.to_string(),
            job.contract_id.to_string(),
            job.job_type.to_string(),
            job.status.to_string(),
            optional(job.start_block()),
            optional(job.end_block()),
            optional(job.metadata.get(CURRENT_BLOCK).and_then(Value::as_u64)),
            job.created_at.to_rfc3339(),
            job.completed_at.map(|at| at.to_rfc3339()).unwrap_or_default(),
            job.error_message.clone().unwrap_or_default(),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

pub fn format_cursors(cursors: &[MetadataCursor], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if cursors.is_empty() {
                return "No cursors found.".to_string();
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Contract", "Key", "Value", "Updated"]);

            for cursor in cursors {
                table.add_row(vec![
                    Cell::new(cursor.contract_id),
                    Cell::new(&cursor.key),
                    Cell::new(&cursor.value),
                    Cell::new(cursor.updated_at.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }

            table.to_string()
        }
        OutputFormat::Json => {
            let json_cursors: Vec<_> = cursors
                .iter()
                .map(|cursor| {
                    json!({
                        "contract_id": cursor.contract_id,
                        "key": cursor.key,
                        "value": cursor.value,
                        "updated_at": cursor.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&json_cursors).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["contract_id", "key", "value", "updated_at"]);
            for cursor in cursors {
                let _ = wtr.write_record([
                    cursor.contract_id.to_string(),
                    cursor.key.clone(),
                    cursor.value.clone(),
                    cursor.updated_at.to_rfc3339(),
                ]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

pub fn format_contracts(contracts: &[ContractStatus], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if contracts.is_empty() {
                return "No contracts registered.".to_string();
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    "ID",
                    "Name",
                    "Chain",
                    "Address",
                    "Type",
                    "Invocations",
                    "Events (undecoded)",
                    "Transfers",
                ]);

            for status in contracts {
                let contract = &status.contract;
                table.add_row(vec![
                    Cell::new(contract.id),
                    Cell::new(&contract.name),
                    Cell::new(contract.chain),
                    Cell::new(format!("{:#x}", contract.address)),
                    Cell::new(&contract.contract_type),
                    Cell::new(status.raw_invocations),
                    Cell::new(format!("{} ({})", status.event_logs, status.undecoded_event_logs)),
                    Cell::new(status.transfers),
                ]);
            }

            table.to_string()
        }
        OutputFormat::Json => {
            let json_contracts: Vec<_> = contracts
                .iter()
                .map(|status| {
                    json!({
                        "id": status.contract.id,
                        "name": status.contract.name,
                        "chain": status.contract.chain.slug(),
                        "address": format!("{:#x}", status.contract.address),
                        "contract_type": status.contract.contract_type,
                        "raw_invocations": status.raw_invocations,
                        "event_logs": status.event_logs,
                        "undecoded_event_logs": status.undecoded_event_logs,
                        "transfers": status.transfers,
                    })
                })
                .collect();
            serde_json::to_string_pretty(&json_contracts).unwrap_or_else(|_| "[]".to_string())
        }
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record([
                "id",
                "name",
                "chain",
                "address",
                "contract_type",
                "raw_invocations",
                "event_logs",
                "undecoded_event_logs",
                "transfers",
            ]);
            for status in contracts {
                let _ = wtr.write_record([
                    status.contract.id.to_string(),
                    status.contract.name.clone(),
                    status.contract.chain.slug().to_string(),
                    format!("{:#x}", status.contract.address),
                    status.contract.contract_type.clone(),
                    status.raw_invocations.to_string(),
                    status.event_logs.to_string(),
                    status.undecoded_event_logs.to_string(),
                    status.transfers.to_string(),
                ]);
            }
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}

fn optional(block: Option<u64>) -> String {
    block.map(|block| block.to_string()).unwrap_or_default()
}

fn progress(job: &Job) -> String {
    let current = job.metadata.get(CURRENT_BLOCK).and_then(Value::as_u64);
    let total = job.metadata.get(TOTAL_BLOCKS).and_then(Value::as_u64);
    match (current, total) {
        (Some(current), Some(total)) => format!("{current} / {total} blocks"),
        _ => String::new(),
    }
}

fn preview(message: &str) -> String {
    if message.chars().count() <= ERROR_PREVIEW_CHARS {
        return message.to_string();
    }
    let head: String = message.chars().take(ERROR_PREVIEW_CHARS).collect();
    format!("{head}...")
}
