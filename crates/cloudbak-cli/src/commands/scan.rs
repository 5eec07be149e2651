//! Scan command - update the local inventory without transferring
//!
//! Provides the `cloudbak scan` CLI command. The scan interval applies
//! unless `--force` is given.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;

use cloudbak_sync::{now_millis, ScanOutcome, ScanSettings, Scanner, WalkDirScanner};

use crate::context::{self, GlobalArgs};
use crate::output::{format_timestamp, plural, to_json, OutputFormatter};

#[derive(Debug, Args)]
pub struct ScanCommand {
    /// Scan even if the scan interval has not elapsed
    #[arg(long)]
    pub force: bool,
}

impl ScanCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let config = global.load_config()?;
        context::check_sources(&config)?;

        let open = context::open_store(&config, global.dry_run).await?;
        let scanner = Scanner::new(
            open.store.clone(),
            Arc::new(WalkDirScanner::new(config.scan.ignore_patterns.clone())),
            ScanSettings::from_config(&config),
        );
        let now = now_millis();
        let result = if self.force {
            scanner.scan_now(now).await.map(ScanOutcome::Completed)
        } else {
            scanner.scan(now).await
        };
        open.close().await;
        let outcome = result?;

        if global.is_json() {
            formatter.print_json(&to_json(&outcome));
        } else {
            print_scan(&outcome, formatter.as_ref());
        }
        Ok(())
    }
}

pub fn print_scan(outcome: &ScanOutcome, formatter: &dyn OutputFormatter) {
    match outcome {
        ScanOutcome::Skipped {
            last_scan,
            next_scan_at,
        } => {
            formatter.success("Scan skipped, a scan was performed recently");
            formatter.info(&format!("Last scan: {}", format_timestamp(*last_scan)));
            formatter.info(&format!("Next scan: {}", format_timestamp(*next_scan_at)));
        }
        ScanOutcome::Completed(report) => {
            formatter.success(&format!(
                "Scanned {} source{}",
                report.sources_scanned,
                plural(report.sources_scanned)
            ));
            formatter.info(&format!(
                "Files:      {} ({} archive unit{})",
                report.files,
                report.archives,
                plural(report.archives)
            ));
            formatter.info(&format!("Changed:    {}", report.updated));
            formatter.info(&format!("Deleted:    {}", report.tombstoned));
            if report.pruned > 0 {
                formatter.info(&format!("Pruned:     {}", report.pruned));
            }
            if report.sources_skipped > 0 {
                formatter.warn(&format!(
                    "{} source{} unreadable or empty, left untouched",
                    report.sources_skipped,
                    plural(report.sources_skipped)
                ));
            }
        }
    }
}
