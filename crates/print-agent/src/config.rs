// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;
use tracing::warn;

use crate::error::AgentError;

const DEFAULT_COLLECTOR_URL: &str = "http://192.168.0.4:5002/api/print_events";
const DEFAULT_STATE_FILE: &str = "processed_events.json";

/// Agent configuration.
///
/// Constructed explicitly (typically via [`Config::from_env`]) and passed into
/// the monitor; there is no ambient global configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Collector intake URL for event batches.
    pub collector_url: String,
    /// Seconds between steady-state polling ticks.
    pub check_interval_secs: u64,
    /// Seconds to back off after an unexpected tick error.
    pub retry_interval_secs: u64,
    /// Delivery attempts per batch.
    pub max_retries: u32,
    /// Events per delivery batch.
    pub batch_size: usize,
    /// Per-request timeout for collector calls, in seconds.
    pub request_timeout_secs: u64,
    /// Trailing look-back window for steady-state polling, in minutes.
    pub lookback_minutes: u64,
    /// Whether to reconcile the full event history at startup.
    pub catch_up_on_start: bool,
    /// Path of the persisted dedup state file.
    pub state_path: PathBuf,
    /// Name of the local machine, used in event identities.
    pub machine_name: String,
    /// Log level for the daemon (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collector_url: DEFAULT_COLLECTOR_URL.to_string(),
            check_interval_secs: 5,
            retry_interval_secs: 30,
            max_retries: 3,
            batch_size: 50,
            request_timeout_secs: 30,
            lookback_minutes: 5,
            catch_up_on_start: true,
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            machine_name: "unknown".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Creates configuration from `PRINT_AGENT_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Result<Self, AgentError> {
        let defaults = Config::default();

        let config = Self {
            collector_url: env::var("PRINT_AGENT_COLLECTOR_URL")
                .unwrap_or(defaults.collector_url),
            check_interval_secs: env_u64("PRINT_AGENT_CHECK_INTERVAL", defaults.check_interval_secs),
            retry_interval_secs: env_u64("PRINT_AGENT_RETRY_INTERVAL", defaults.retry_interval_secs),
            max_retries: env::var("PRINT_AGENT_MAX_RETRIES")
                .ok()
                .and_then(|val| val.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
            batch_size: env::var("PRINT_AGENT_BATCH_SIZE")
                .ok()
                .and_then(|val| val.parse::<usize>().ok())
                .unwrap_or(defaults.batch_size),
            request_timeout_secs: env_u64("PRINT_AGENT_REQUEST_TIMEOUT", defaults.request_timeout_secs),
            lookback_minutes: env_u64("PRINT_AGENT_LOOKBACK_MINUTES", defaults.lookback_minutes),
            catch_up_on_start: env::var("PRINT_AGENT_CATCH_UP_ON_START")
                .map(|val| val.to_lowercase() != "false")
                .unwrap_or(defaults.catch_up_on_start),
            state_path: env::var("PRINT_AGENT_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_path),
            machine_name: detect_machine_name(),
            log_level: env::var("PRINT_AGENT_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.collector_url.trim().is_empty() {
            return Err(AgentError::InvalidConfig(
                "collector URL cannot be empty".to_string(),
            ));
        }
        if reqwest::Url::parse(&self.collector_url).is_err() {
            return Err(AgentError::InvalidConfig(format!(
                "collector URL '{}' is not a valid URL",
                self.collector_url
            )));
        }
        if self.batch_size == 0 {
            return Err(AgentError::InvalidConfig(
                "batch size must be greater than 0".to_string(),
            ));
        }
        if self.check_interval_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "check interval must be greater than 0".to_string(),
            ));
        }
        if self.retry_interval_secs == 0 {
            return Err(AgentError::InvalidConfig(
                "retry interval must be greater than 0".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(AgentError::InvalidConfig(
                "max retries must be at least 1".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(AgentError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Machine name used to namespace event identities.
///
/// `PRINT_AGENT_HOSTNAME` wins when set, for hosts whose reported name differs
/// from the one recorded in historical state files.
fn detect_machine_name() -> String {
    if let Ok(name) = env::var("PRINT_AGENT_HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }

    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy().to_string();
            if !name.is_empty() {
                return name;
            }
            warn!("empty system hostname, using 'unknown'");
            "unknown".to_string()
        }
        Err(error) => {
            warn!("could not determine hostname: {error}, using 'unknown'");
            "unknown".to_string()
        }
    }
}
