//! Verify command - compare the remote inventory with the bucket
//!
//! Provides the `cloudbak verify` CLI command. Orphaned objects are only
//! reported; stale records are dropped from the database unless
//! `--dry-run` is given.

use anyhow::Result;
use clap::Args;

use cloudbak_core::domain::database_key;
use cloudbak_sync::Verifier;

use crate::context::{self, GlobalArgs};
use crate::output::{plural, to_json};

#[derive(Debug, Args)]
pub struct VerifyCommand {}

impl VerifyCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let config = global.load_config()?;
        context::check_storage(&config).await?;

        // dry run is handled by the verifier itself, no copy needed
        let open = context::open_store(&config, false).await?;
        let verifier = Verifier::new(
            open.store.clone(),
            context::object_store(&config)?,
            config.backup.prefix_remove.clone(),
            database_key(&config.backup.database),
            global.dry_run,
        );
        let result = verifier.verify().await;
        open.close().await;
        let report = result?;

        if global.is_json() {
            formatter.print_json(&to_json(&report));
            return Ok(());
        }

        if report.is_consistent() {
            formatter.success(&format!(
                "{} object{} verified, no discrepancies",
                report.listed,
                plural(report.listed)
            ));
            return Ok(());
        }

        formatter.warn(&format!(
            "{} object{} listed, {} orphan{}, {} stale record{}",
            report.listed,
            plural(report.listed),
            report.orphans.len(),
            plural(report.orphans.len()),
            report.stale.len(),
            plural(report.stale.len())
        ));
        if !report.orphans.is_empty() {
            formatter.info("Objects in the bucket unknown to the database:");
            for key in &report.orphans {
                formatter.info(&format!("  - {}", key));
            }
        }
        if !report.stale.is_empty() {
            formatter.info("Records whose object is missing:");
            for path in &report.stale {
                formatter.info(&format!("  - {}", path));
            }
            if global.dry_run {
                formatter.info("Dry run, stale records kept");
            } else {
                formatter.success(&format!(
                    "Removed {} stale record{}",
                    report.repaired,
                    plural(report.repaired)
                ));
            }
        }
        for path in &report.repair_failures {
            formatter.error(&format!("Failed to remove stale record {}", path));
        }
        Ok(())
    }
}
