//! Backup command - scan sources, then run one transfer session
//!
//! Provides the `cloudbak backup` CLI command which:
//! 1. Loads the configuration and checks preconditions
//! 2. Scans the sources (unless the scan interval has not elapsed)
//! 3. Runs a transfer session: uploads, then removals, within budgets
//! 4. Uploads the database snapshot and notifies Slack

use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use cloudbak_core::config::Config;
use cloudbak_core::ports::INotifier;
use cloudbak_sync::{
    now_millis, ScanOutcome, ScanSettings, Scanner, SessionOutcome, SessionReport,
    SessionSettings, TransferSession, WalkDirScanner,
};

use crate::commands::scan::print_scan;
use crate::context::{self, GlobalArgs};
use crate::notify::notifier_from_config;
use crate::output::{format_bytes, format_duration, plural, to_json, OutputFormatter};

#[derive(Debug, Args)]
pub struct BackupCommand {
    /// Do not scan the sources before transferring
    #[arg(long, conflicts_with = "only_scan")]
    pub skip_scan: bool,

    /// Scan the sources and stop before transferring
    #[arg(long)]
    pub only_scan: bool,

    /// Pick files in random order instead of path order
    #[arg(long)]
    pub random_order: bool,
}

#[derive(Debug, Serialize)]
struct BackupOutput<'a> {
    dry_run: bool,
    scan: Option<&'a ScanOutcome>,
    session: Option<&'a SessionReport>,
}

impl BackupCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let config = global.load_config()?;
        context::check_sources(&config)?;
        if !self.only_scan {
            context::check_storage(&config).await?;
        }

        if global.dry_run {
            formatter.info("Dry run - nothing is uploaded or deleted");
        }

        let open = context::open_store(&config, global.dry_run).await?;

        let scan = if self.skip_scan {
            None
        } else {
            let scanner = Scanner::new(
                open.store.clone(),
                Arc::new(WalkDirScanner::new(config.scan.ignore_patterns.clone())),
                ScanSettings::from_config(&config),
            );
            Some(scanner.scan(now_millis()).await?)
        };

        let session = if self.only_scan {
            None
        } else {
            Some(self.run_session(&config, global, &open).await?)
        };
        open.close().await;

        if global.is_json() {
            formatter.print_json(&to_json(&BackupOutput {
                dry_run: global.dry_run,
                scan: scan.as_ref(),
                session: session.as_ref(),
            }));
        } else {
            if let Some(scan) = &scan {
                print_scan(scan, formatter.as_ref());
            }
            if let Some(report) = &session {
                print_session(report, formatter.as_ref());
            }
        }

        if let Some(report) = &session {
            if !global.dry_run {
                notify(&config, report).await;
            }
            if report.outcome == SessionOutcome::MaxSessionFailed {
                bail!(
                    "Session stopped after {} failed transfer{}",
                    report.failed,
                    plural(report.failed as usize)
                );
            }
        }
        Ok(())
    }

    async fn run_session(
        &self,
        config: &Config,
        global: &GlobalArgs,
        open: &context::OpenStore,
    ) -> Result<SessionReport> {
        let temp_dir = context::temp_dir(config).await?;
        let mut settings = SessionSettings::from_config(config, global.dry_run);
        settings.random_order |= self.random_order;

        let session = TransferSession::new(
            open.store.clone(),
            context::object_store(config)?,
            context::crypter(config, &temp_dir)?,
            context::archiver(&temp_dir),
            settings,
        );
        session.run_session().await
    }
}

fn print_session(report: &SessionReport, formatter: &dyn OutputFormatter) {
    let done = (report.uploaded + report.removed) as usize;
    if done == 0 && report.failed == 0 {
        formatter.success("Already up to date");
    } else {
        formatter.success(&format!(
            "Session finished in {}: {}",
            format_duration(report.duration_ms),
            report.outcome
        ));
    }
    formatter.info(&format!(
        "Uploaded:   {} file{} ({})",
        report.uploaded,
        plural(report.uploaded as usize),
        format_bytes(report.uploaded_bytes)
    ));
    formatter.info(&format!(
        "Removed:    {} file{}",
        report.removed,
        plural(report.removed as usize)
    ));
    if report.deferred > 0 {
        formatter.info(&format!(
            "Deferred:   {} removal{} (minimum storage duration)",
            report.deferred,
            plural(report.deferred as usize)
        ));
    }
    if report.failed > 0 {
        formatter.error(&format!(
            "{} transfer{} failed:",
            report.failed,
            plural(report.failed as usize)
        ));
        for path in &report.failed_paths {
            formatter.info(&format!("  - {}", path));
        }
    }
    if done > 0 && !report.database_uploaded {
        formatter.warn("Database snapshot was not uploaded");
    }
}

/// Summary line posted to Slack
fn summary(report: &SessionReport) -> String {
    format!(
        "Backup finished: {} - {} uploaded ({}), {} removed, {} failed",
        report.outcome,
        report.uploaded,
        format_bytes(report.uploaded_bytes),
        report.removed,
        report.failed
    )
}

async fn notify(config: &Config, report: &SessionReport) {
    let notifier: Arc<dyn INotifier> = match notifier_from_config(&config.notify) {
        Ok(notifier) => notifier,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "Notifier unavailable");
            return;
        }
    };
    match notifier.notify(&summary(report)).await {
        Ok(()) => info!("Notification sent"),
        Err(err) => warn!(error = %format!("{err:#}"), "Notification failed"),
    }
}
