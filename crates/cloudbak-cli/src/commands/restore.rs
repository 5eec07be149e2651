//! Restore command - bring backed up files back from the bucket
//!
//! Provides the `cloudbak restore` CLI command which:
//! 1. Downloads the database snapshot from the bucket
//! 2. Selects the entries whose key starts with the given prefix
//! 3. Asks for confirmation (unless `--yes`)
//! 4. Downloads, decrypts and unpacks each entry under `--output`
//!
//! With `--test`, entries are decoded to the temp directory and compared
//! with the local originals instead.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;

use cloudbak_core::domain::database_key;
use cloudbak_core::ports::{AssumeYes, IConfirm};
use cloudbak_sync::{RestoreOptions, RestoreReport, Restorer};

use crate::confirm::StdinConfirm;
use crate::context::{self, GlobalArgs};
use crate::output::{format_bytes, plural, to_json, OutputFormatter};

#[derive(Debug, Args)]
pub struct RestoreCommand {
    /// Key prefix to restore, e.g. `/photos/2019`
    pub prefix: String,

    /// Directory the restored tree is written to
    #[arg(long, short, required_unless_present = "test")]
    pub output: Option<PathBuf>,

    /// Do not ask for confirmation
    #[arg(long, short)]
    pub yes: bool,

    /// Compare with the local originals instead of writing files
    #[arg(long)]
    pub test: bool,
}

impl RestoreCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let config = global.load_config()?;
        context::check_storage(&config).await?;

        let temp_dir = context::temp_dir(&config).await?;
        let confirm: Arc<dyn IConfirm> = if self.yes {
            Arc::new(AssumeYes)
        } else {
            Arc::new(StdinConfirm)
        };
        let restorer = Restorer::new(
            context::object_store(&config)?,
            context::crypter(&config, &temp_dir)?,
            context::archiver(&temp_dir),
            confirm,
            database_key(&config.backup.database),
            config.backup.prefix_remove.clone(),
            temp_dir,
        );

        let options = RestoreOptions {
            prefix: self.prefix.clone(),
            output: self.output.clone().unwrap_or_default(),
            test_mode: self.test,
            dry_run: global.dry_run,
            assume_yes: self.yes,
        };
        let report = restorer.restore(&options).await?;

        if global.is_json() {
            formatter.print_json(&to_json(&report));
        } else {
            print_restore(&report, self.test, formatter.as_ref());
        }

        let failed = report.failed.len() + report.mismatched.len();
        if failed > 0 {
            bail!("{} file{} not restored", failed, plural(failed));
        }
        Ok(())
    }
}

fn print_restore(report: &RestoreReport, test: bool, formatter: &dyn OutputFormatter) {
    if report.matched == 0 {
        formatter.warn("No files matched");
        return;
    }
    formatter.info(&format!(
        "{} file{} matched ({})",
        report.matched,
        plural(report.matched),
        format_bytes(report.matched_bytes)
    ));
    if !report.listed.is_empty() {
        for key in &report.listed {
            formatter.info(&format!("  {}", key));
        }
        formatter.success("Dry run, nothing restored");
        return;
    }
    if report.cancelled {
        formatter.warn("Restore cancelled");
        return;
    }

    let verb = if test { "verified" } else { "restored" };
    formatter.success(&format!(
        "{} {}, {} failed",
        report.restored,
        verb,
        report.failed.len() + report.mismatched.len()
    ));
    if !report.failed.is_empty() {
        formatter.error("Failed to restore:");
        for key in &report.failed {
            formatter.info(&format!("  - {}", key));
        }
    }
    if !report.mismatched.is_empty() {
        formatter.error("Content differs from the local original:");
        for key in &report.mismatched {
            formatter.info(&format!("  - {}", key));
        }
    }
}
