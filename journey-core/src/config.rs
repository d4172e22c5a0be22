//! Run configuration.
//!
//! All tunables live in one explicit struct handed to the generator and the
//! driver at construction.

use chrono::{DateTime, TimeZone, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File name of the journal when no path is configured.
pub const DEFAULT_OUTPUT_FILENAME: &str = "journey_data.json";

/// Default backend model.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Invalid configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("save_interval must be at least 1")]
    ZeroSaveInterval,

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Configuration for a simulation run.
#[derive(Clone)]
pub struct SimulationConfig {
    /// Generation attempts per step before giving up.
    pub max_attempts: u32,

    /// Pause between failed attempts.
    pub retry_backoff: Duration,

    /// Pause after every generation step.
    pub rate_limit_delay: Duration,

    /// Force an extra save after every this many generation steps.
    pub save_interval: usize,

    /// Journal file.
    pub output_path: PathBuf,

    /// Backend credential. `None` runs in placeholder mode.
    pub api_key: Option<String>,

    /// Backend model name.
    pub model: String,

    /// Where the synthetic clock starts.
    pub start_date: DateTime<Utc>,

    /// Seed for the clock's jitter; random when unset.
    pub seed: Option<u64>,
}

impl std::fmt::Debug for SimulationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationConfig")
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff", &self.retry_backoff)
            .field("rate_limit_delay", &self.rate_limit_delay)
            .field("save_interval", &self.save_interval)
            .field("output_path", &self.output_path)
            .field("api_key", &self.api_key.as_ref().map(|_| "<REDACTED>"))
            .field("model", &self.model)
            .field("start_date", &self.start_date)
            .field("seed", &self.seed)
            .finish()
    }
}

impl SimulationConfig {
    /// Defaults writing to `output_path`.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_secs(10),
            rate_limit_delay: Duration::from_secs(5),
            save_interval: 5,
            output_path: output_path.into(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            start_date: default_start_date(),
            seed: None,
        }
    }

    /// Defaults plus overrides from the environment.
    ///
    /// Reads `GEMINI_API_KEY`, `GEMINI_MODEL`, `JOURNEY_OUTPUT` and
    /// `JOURNEY_SEED`. Without `JOURNEY_OUTPUT` the journal is written next
    /// to the executable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let output_path = std::env::var("JOURNEY_OUTPUT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_output_path());

        let mut config = Self::new(output_path);

        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            config = config.with_api_key(key);
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            if !model.trim().is_empty() {
                config.model = model;
            }
        }
        if let Ok(seed) = std::env::var("JOURNEY_SEED") {
            let parsed = seed.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "JOURNEY_SEED",
                value: seed.clone(),
            })?;
            config.seed = Some(parsed);
        }

        Ok(config)
    }

    /// Set the backend credential. Unusable keys leave placeholder mode on.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = gemini::is_usable_key(&key).then_some(key);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    pub fn with_save_interval(mut self, interval: usize) -> Self {
        self.save_interval = interval;
        self
    }

    pub fn with_start_date(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = start;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// No pauses at all; for tests and dry runs.
    pub fn without_delays(self) -> Self {
        self.with_retry_backoff(Duration::ZERO)
            .with_rate_limit_delay(Duration::ZERO)
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroAttempts);
        }
        if self.save_interval == 0 {
            return Err(ConfigError::ZeroSaveInterval);
        }
        Ok(())
    }
}

fn default_start_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn default_output_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_default()
        .join(DEFAULT_OUTPUT_FILENAME)
}
