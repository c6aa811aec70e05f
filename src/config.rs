use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::GdcError;
use crate::gdc::DEFAULT_API_BASE_URL;
use crate::transport::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "gdc-cohort.json";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// On-disk shape of `gdc-cohort.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub validation_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub stream: Option<bool>,
    #[serde(default)]
    pub chunk_size_bytes: Option<usize>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub backoff_factor_secs: Option<f64>,
    #[serde(default)]
    pub backoff_max_secs: Option<f64>,
    #[serde(default)]
    pub status_forcelist: Option<Vec<u16>>,
    #[serde(default)]
    pub respect_retry_after: Option<bool>,
    #[serde(default)]
    pub manual_attempts: Option<u32>,
    #[serde(default)]
    pub manual_delay_secs: Option<f64>,
}

/// How a bundle body is moved from the socket to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fixed-size chunks; peak memory is one chunk regardless of bundle size.
    Streamed { chunk_size: usize },
    /// Whole body in memory, then one write.
    Buffered,
}

/// Application-level retry of a whole batch, on top of the transport's own retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualRetry {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ManualRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub api_base_url: String,
    pub batch_size: NonZeroUsize,
    pub validation_timeout: Duration,
    /// Longest wait for the data endpoint to connect, answer, or deliver the next piece of
    /// the body. A bundle that keeps flowing may take longer than this in total.
    pub request_timeout: Duration,
    pub write_mode: WriteMode,
    pub transport: RetryPolicy,
    pub manual_retry: ManualRetry,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            validation_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(300),
            write_mode: WriteMode::Streamed {
                chunk_size: DEFAULT_CHUNK_SIZE,
            },
            transport: RetryPolicy::default(),
            manual_retry: ManualRetry::default(),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub batch_size: Option<usize>,
    pub no_stream: bool,
}

impl DownloadConfig {
    pub fn apply(mut self, overrides: ConfigOverrides) -> Result<Self, GdcError> {
        if let Some(url) = overrides.api_base_url {
            self.api_base_url = url;
        }
        if let Some(size) = overrides.batch_size {
            self.batch_size = non_zero_batch(size)?;
        }
        if overrides.no_stream {
            self.write_mode = WriteMode::Buffered;
        }
        Ok(self)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path`, or `gdc-cohort.json` in the working directory when present.
    /// With neither, the defaults apply.
    pub fn resolve(path: Option<&Path>) -> Result<DownloadConfig, GdcError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(DownloadConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GdcError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GdcError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<DownloadConfig, GdcError> {
        let defaults = DownloadConfig::default();
        if let Some(version) = config.schema_version {
            if version != 1 {
                return Err(GdcError::InvalidConfig(format!(
                    "unsupported schema_version {version}"
                )));
            }
        }

        let batch_size = match config.batch_size {
            Some(size) => non_zero_batch(size)?,
            None => defaults.batch_size,
        };

        let write_mode = if config.stream.unwrap_or(true) {
            let chunk_size = config.chunk_size_bytes.unwrap_or(DEFAULT_CHUNK_SIZE);
            if chunk_size == 0 {
                return Err(GdcError::InvalidConfig(
                    "chunk_size_bytes must be greater than zero".to_string(),
                ));
            }
            WriteMode::Streamed { chunk_size }
        } else {
            WriteMode::Buffered
        };

        let retry = config.retry.unwrap_or_default();
        let mut transport = defaults.transport;
        if let Some(total) = retry.total {
            transport.total = total;
        }
        if let Some(secs) = retry.backoff_factor_secs {
            transport.backoff_factor = seconds("retry.backoff_factor_secs", secs)?;
        }
        if let Some(secs) = retry.backoff_max_secs {
            transport.backoff_max = seconds("retry.backoff_max_secs", secs)?;
        }
        if let Some(statuses) = retry.status_forcelist {
            transport.status_forcelist = statuses;
        }
        if let Some(respect) = retry.respect_retry_after {
            transport.respect_retry_after = respect;
        }

        let mut manual_retry = defaults.manual_retry;
        if let Some(attempts) = retry.manual_attempts {
            manual_retry.attempts = attempts;
        }
        if let Some(secs) = retry.manual_delay_secs {
            manual_retry.delay = seconds("retry.manual_delay_secs", secs)?;
        }

        Ok(DownloadConfig {
            api_base_url: config.api_base_url.unwrap_or(defaults.api_base_url),
            batch_size,
            validation_timeout: config
                .validation_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.validation_timeout),
            request_timeout: config
                .request_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            write_mode,
            transport,
            manual_retry,
        })
    }
}

fn non_zero_batch(size: usize) -> Result<NonZeroUsize, GdcError> {
    NonZeroUsize::new(size)
        .ok_or_else(|| GdcError::InvalidConfig("batch_size must be greater than zero".to_string()))
}

fn seconds(field: &str, value: f64) -> Result<Duration, GdcError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| GdcError::InvalidConfig(format!("{field} must be a non-negative number")))
}
