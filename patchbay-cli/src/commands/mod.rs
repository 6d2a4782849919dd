pub mod apply;
pub mod status;
pub mod step;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::Colorize;

use patchbay_apply::{Collaborators, FinalReport, Message, MessageLevel, MessageSink};
use patchbay_core::{config, BatchId};

/// Prints finalizer messages: info to stdout, warnings and errors to stderr.
pub struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn emit(&mut self, message: Message) {
        match message.level {
            MessageLevel::Info => println!("{}", message.text),
            MessageLevel::Warning => eprintln!("{} {}", "warning:".yellow().bold(), message.text),
            MessageLevel::Error => eprintln!("{} {}", "error:".red().bold(), message.text),
        }
    }
}

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load `config.yaml` and wire the filesystem collaborators under `home` for
/// the run of `batch_id`.
pub fn collaborators(home: &Path, batch_id: BatchId) -> Result<Collaborators> {
    let config = config::load_at(home)
        .with_context(|| format!("failed to load {}", config::config_path_at(home).display()))?;
    Ok(Collaborators::from_config_at(home, &config, batch_id))
}

/// Turn a failed run into a non-zero exit once its report has been printed.
pub fn check_report(report: &FinalReport) -> Result<()> {
    if report.success {
        return Ok(());
    }
    match &report.failing_operation {
        Some(op) => anyhow::bail!("batch {} failed in {op}", report.batch_id),
        None => anyhow::bail!("batch {} failed", report.batch_id),
    }
}
