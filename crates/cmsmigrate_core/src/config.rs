use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::job::JobPolicy;
use crate::report::Thresholds;

pub const DEFAULT_RUN_NAME: &str = "Joomla import";
pub const DEFAULT_ERROR_PREVIEW_LIMIT: usize = 10;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub migration: MigrationSection,
    #[serde(default)]
    pub job: JobSection,
    #[serde(default)]
    pub validation: ValidationSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrationSection {
    pub default_name: Option<String>,
    pub error_preview_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct JobSection {
    pub max_attempts: Option<u32>,
    pub backoff_minutes: Option<Vec<u64>>,
    pub timeout_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ValidationSection {
    pub pass_threshold: Option<f64>,
    pub warn_threshold: Option<f64>,
}

impl MigrateConfig {
    /// Run name: env CMSMIGRATE_RUN_NAME > config > DEFAULT_RUN_NAME.
    pub fn default_run_name(&self) -> String {
        if let Ok(value) = env::var("CMSMIGRATE_RUN_NAME") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.migration
            .default_name
            .clone()
            .unwrap_or_else(|| DEFAULT_RUN_NAME.to_string())
    }

    pub fn error_preview_limit(&self) -> usize {
        self.migration
            .error_preview_limit
            .unwrap_or(DEFAULT_ERROR_PREVIEW_LIMIT)
    }

    /// Job policy with env CMSMIGRATE_MAX_ATTEMPTS taking precedence over config.
    pub fn job_policy(&self) -> JobPolicy {
        let defaults = JobPolicy::default();
        let max_attempts = env::var("CMSMIGRATE_MAX_ATTEMPTS")
            .ok()
            .and_then(|value| value.trim().parse::<u32>().ok())
            .or(self.job.max_attempts)
            .unwrap_or(defaults.max_attempts);
        let backoff = self
            .job
            .backoff_minutes
            .as_ref()
            .map(|minutes| {
                minutes
                    .iter()
                    .map(|m| Duration::from_secs(m * 60))
                    .collect()
            })
            .unwrap_or(defaults.backoff);
        let timeout = self
            .job
            .timeout_minutes
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(defaults.timeout);
        JobPolicy {
            max_attempts: max_attempts.max(1),
            backoff,
            timeout,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        let defaults = Thresholds::default();
        Thresholds {
            pass: self.validation.pass_threshold.unwrap_or(defaults.pass),
            warn: self.validation.warn_threshold.unwrap_or(defaults.warn),
        }
    }

    fn check(&self) -> Result<()> {
        let thresholds = self.thresholds();
        if thresholds.warn > thresholds.pass {
            bail!(
                "validation.warn_threshold ({}) must not exceed validation.pass_threshold ({})",
                thresholds.warn,
                thresholds.pass
            );
        }
        if self.job.max_attempts == Some(0) {
            bail!("job.max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Load and parse the config from a TOML file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .check()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# cmsmigrate configuration (materialized by `cmsmigrate init`)\n\n[migration]\ndefault_name = \"{DEFAULT_RUN_NAME}\"\nerror_preview_limit = {DEFAULT_ERROR_PREVIEW_LIMIT}\n\n[job]\nmax_attempts = 3\nbackoff_minutes = [1, 5, 15]\ntimeout_minutes = 60\n\n[validation]\npass_threshold = 95.0\nwarn_threshold = 80.0\n"
    )
}
