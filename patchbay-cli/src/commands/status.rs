//! `patchbay status` — per-status counts and records of a batch.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use patchbay_apply::pipeline::load_sandbox_at;
use patchbay_core::{Batch, BatchId, DiffRecord, DiffStore, RecordStatus};

use super::{collaborators, home};

/// Arguments for `patchbay status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Identifier of the batch to inspect.
    pub batch: u64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let batch_id = BatchId(self.batch);
        let collaborators = collaborators(&home, batch_id)?;
        let store = &collaborators.store;

        let batch = store
            .batch(batch_id)
            .with_context(|| format!("failed to load batch {batch_id}"))?;
        let records = store
            .records(batch_id)
            .with_context(|| format!("failed to load records of batch {batch_id}"))?;
        let sandbox = load_sandbox_at(&home, batch_id)
            .with_context(|| format!("failed to load the step sandbox of batch {batch_id}"))?;
        let progress = sandbox.progress.map(|p| (p.processed, p.total));

        if self.json {
            return print_json(&batch, &records, progress);
        }
        print_table(&batch, records, progress);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusJson<'a> {
    batch_id: BatchId,
    created_at: String,
    counts: Vec<CountJson>,
    in_progress: Option<ProgressJson>,
    records: Vec<RecordJson<'a>>,
}

#[derive(Serialize)]
struct CountJson {
    status: RecordStatus,
    count: usize,
}

#[derive(Serialize)]
struct ProgressJson {
    processed: usize,
    total: usize,
}

#[derive(Serialize)]
struct RecordJson<'a> {
    id: u64,
    target: &'a str,
    sub_resource: &'a str,
    status: RecordStatus,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "id")]
    id: u64,
    #[tabled(rename = "target")]
    target: String,
    #[tabled(rename = "sub-resource")]
    sub_resource: String,
    #[tabled(rename = "status")]
    status: String,
}

fn counts(records: &[DiffRecord]) -> Vec<(RecordStatus, usize)> {
    RecordStatus::ALL
        .iter()
        .map(|status| (*status, records.iter().filter(|r| r.status == *status).count()))
        .filter(|(_, n)| *n > 0)
        .collect()
}

fn print_json(
    batch: &Batch,
    records: &[DiffRecord],
    progress: Option<(usize, usize)>,
) -> Result<()> {
    let payload = StatusJson {
        batch_id: batch.batch_id,
        created_at: batch.created_at.to_rfc3339(),
        counts: counts(records)
            .into_iter()
            .map(|(status, count)| CountJson { status, count })
            .collect(),
        in_progress: progress.map(|(processed, total)| ProgressJson { processed, total }),
        records: records
            .iter()
            .map(|r| RecordJson {
                id: r.id.0,
                target: &r.target_id.0,
                sub_resource: &r.sub_resource_id.0,
                status: r.status,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
    );
    Ok(())
}

fn print_table(batch: &Batch, records: Vec<DiffRecord>, progress: Option<(usize, usize)>) {
    println!(
        "Batch {} | created {} | {} record(s)",
        batch.batch_id,
        batch.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        records.len()
    );
    if let Some((processed, total)) = progress {
        println!("Step run in progress: {processed}/{total} processed.");
    }

    if records.is_empty() {
        println!("No diff records.");
        return;
    }

    let summary = counts(&records)
        .into_iter()
        .map(|(status, n)| format!("{} {}", n, status_label(status)))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{summary}");

    let rows: Vec<RecordRow> = records
        .into_iter()
        .map(|r| RecordRow {
            id: r.id.0,
            target: r.target_id.0,
            sub_resource: r.sub_resource_id.0,
            status: r.status.to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn status_label(status: RecordStatus) -> String {
    let label = status.as_str();
    match status {
        RecordStatus::Pending => label.bright_black().bold().to_string(),
        RecordStatus::Applied => label.green().bold().to_string(),
        RecordStatus::Ignored => label.yellow().bold().to_string(),
        _ => label.red().bold().to_string(),
    }
}
