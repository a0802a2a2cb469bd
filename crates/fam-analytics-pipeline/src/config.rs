// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;
use crate::retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;
pub const DEFAULT_UPLOAD_SIZE: usize = 100;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Settings shared by every pipeline, whatever the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Buffer capacity; enqueues beyond it are rejected
    pub max_queue_size: usize,
    /// Maximum number of records per batch
    pub upload_size: usize,
    /// Optional cap on the summed encoded size of a batch
    pub max_batch_bytes: Option<usize>,
    /// Number of background workers
    pub workers: usize,
    /// Attempts per request before the failure callback fires
    pub max_attempts: u32,
    /// Base delay of the default linear backoff
    pub retry_base_delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    /// HTTPS proxy URL
    pub proxy_https: Option<String>,
    /// Spawn workers when the pipeline is built
    pub start_workers: bool,
    pub debug: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            upload_size: DEFAULT_UPLOAD_SIZE,
            max_batch_bytes: None,
            workers: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay: DEFAULT_BASE_DELAY,
            timeout: DEFAULT_TIMEOUT,
            proxy_https: None,
            start_workers: true,
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|val| val.trim().parse::<T>().ok())
}

fn flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|val| match val.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Create configuration from `FAM_ANALYTICS_*` environment variables
    pub fn from_env() -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let debug = flag("FAM_ANALYTICS_DEBUG", false);
        let log_level = if debug {
            "debug".to_string()
        } else {
            env::var("FAM_ANALYTICS_LOG_LEVEL")
                .map(|val| val.to_lowercase())
                .unwrap_or(defaults.log_level)
        };

        let config = Self {
            max_queue_size: parsed("FAM_ANALYTICS_MAX_QUEUE_SIZE").unwrap_or(defaults.max_queue_size),
            upload_size: parsed("FAM_ANALYTICS_UPLOAD_SIZE").unwrap_or(defaults.upload_size),
            max_batch_bytes: parsed("FAM_ANALYTICS_MAX_BATCH_BYTES"),
            workers: parsed("FAM_ANALYTICS_WORKERS").unwrap_or(defaults.workers),
            max_attempts: parsed("FAM_ANALYTICS_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            retry_base_delay: parsed("FAM_ANALYTICS_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            timeout: parsed("FAM_ANALYTICS_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            proxy_https: env::var("FAM_ANALYTICS_PROXY_HTTPS")
                .or_else(|_| env::var("HTTPS_PROXY"))
                .ok()
                .filter(|val| !val.trim().is_empty()),
            start_workers: flag("FAM_ANALYTICS_START_WORKERS", defaults.start_workers),
            debug,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_queue_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.upload_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "upload_size must be at least 1".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_batch_bytes == Some(0) {
            return Err(PipelineError::InvalidConfig(
                "max_batch_bytes must be greater than 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }
        Ok(())
    }

    /// Level handed to the log subscriber; `debug` overrides `log_level`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.log_level
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_queue_size, 10_000);
        assert_eq!(config.upload_size, 100);
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        for config in [
            PipelineConfig {
                max_queue_size: 0,
                ..Default::default()
            },
            PipelineConfig {
                upload_size: 0,
                ..Default::default()
            },
            PipelineConfig {
                workers: 0,
                ..Default::default()
            },
            PipelineConfig {
                max_attempts: 0,
                ..Default::default()
            },
            PipelineConfig {
                max_batch_bytes: Some(0),
                ..Default::default()
            },
            PipelineConfig {
                timeout: Duration::ZERO,
                ..Default::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = PipelineConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_overrides_log_level() {
        let config = PipelineConfig {
            debug: true,
            log_level: "error".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_log_level(), "debug");
    }

    // Single test touching the environment so parallel tests do not race on it.
    #[test]
    fn test_from_env() {
        env::set_var("FAM_ANALYTICS_MAX_QUEUE_SIZE", "5");
        env::set_var("FAM_ANALYTICS_UPLOAD_SIZE", "2");
        env::set_var("FAM_ANALYTICS_WORKERS", "3");
        env::set_var("FAM_ANALYTICS_RETRY_BASE_DELAY_MS", "7");
        env::set_var("FAM_ANALYTICS_START_WORKERS", "false");
        env::set_var("FAM_ANALYTICS_TIMEOUT_SECS", "not-a-number");
        let config = PipelineConfig::from_env().expect("valid env config");
        assert_eq!(config.max_queue_size, 5);
        assert_eq!(config.upload_size, 2);
        assert_eq!(config.workers, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(7));
        assert!(!config.start_workers);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);

        env::set_var("FAM_ANALYTICS_WORKERS", "0");
        assert!(PipelineConfig::from_env().is_err());

        for name in [
            "FAM_ANALYTICS_MAX_QUEUE_SIZE",
            "FAM_ANALYTICS_UPLOAD_SIZE",
            "FAM_ANALYTICS_WORKERS",
            "FAM_ANALYTICS_RETRY_BASE_DELAY_MS",
            "FAM_ANALYTICS_START_WORKERS",
            "FAM_ANALYTICS_TIMEOUT_SECS",
        ] {
            env::remove_var(name);
        }
    }
}
