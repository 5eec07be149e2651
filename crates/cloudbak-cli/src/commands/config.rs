//! Config command - View, validate and create the configuration file
//!
//! Provides the `cloudbak config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON), passphrase masked
//! 2. Validates the configuration file and reports every error
//! 3. Writes a starter configuration file

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use tracing::info;

use cloudbak_core::config::Config;

use crate::context::GlobalArgs;
use crate::output::plural;

const MASK: &str = "********";

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub async fn execute(&self, global: &GlobalArgs) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(global),
            ConfigCommand::Validate => self.execute_validate(global),
            ConfigCommand::Init { force } => self.execute_init(global, *force),
        }
    }

    fn execute_show(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let path = &global.config_path;
        let mut config = Config::load(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        config.apply_env_overrides();
        let config = masked(config);

        info!(config_path = %path.display(), "Showing configuration");

        if global.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            formatter.success(&format!("Configuration ({})", path.display()));
            formatter.info("");
            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }
        Ok(())
    }

    fn execute_validate(&self, global: &GlobalArgs) -> Result<()> {
        let formatter = global.formatter();
        let path = &global.config_path;

        if !path.exists() {
            bail!("Configuration file not found at {}", path.display());
        }
        let mut config = Config::load(path)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        config.apply_env_overrides();

        info!(config_path = %path.display(), "Validating configuration");
        let errors = config.validate();

        if global.is_json() {
            let error_strings: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                plural(errors.len())
            ));
            formatter.info(&format!("File: {}", path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        if !errors.is_empty() {
            bail!("Invalid configuration");
        }
        Ok(())
    }

    fn execute_init(&self, global: &GlobalArgs, force: bool) -> Result<()> {
        let formatter = global.formatter();
        let path = &global.config_path;
        write_starter(path, force)?;

        if global.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "config_path": path.display().to_string(),
            }));
        } else {
            formatter.success(&format!("Wrote {}", path.display()));
            formatter.info("Set storage.bucket, backup.sources and crypto.passphrase, then run");
            formatter.info("'cloudbak config validate'.");
        }
        Ok(())
    }
}

/// Replaces the passphrase with a fixed mask
fn masked(mut config: Config) -> Config {
    if config.crypto.passphrase.is_some() {
        config.crypto.passphrase = Some(MASK.to_string());
    }
    config
}

/// Writes the default configuration to `path`, readable by the owner only
fn write_starter(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists; use --force to overwrite it",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create configuration directory")?;
    }
    let yaml = serde_yaml::to_string(&Config::default())
        .context("Failed to serialize configuration")?;
    std::fs::write(path, yaml).context("Failed to write configuration file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to restrict configuration file permissions")?;
    }
    info!(config_path = %path.display(), "Configuration file written");
    Ok(())
}
