use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest trigger tick; bounds timer wakeups when the batch timeout is tiny
const MIN_TICK_MS: u64 = 10;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with still-queued orders when the engine shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Close the remaining queue into final batches and settle them
    #[default]
    Settle,
    /// Mark every remaining order failed
    Fail,
}

/// Batching engine parameters, immutable once the engine is built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Queue depth that closes a batch immediately
    pub batch_size: usize,
    /// Maximum wait (ms) of the oldest queued order before a batch closes
    pub batch_timeout_ms: u64,
    /// Fee fraction charged per order (e.g., 0.002 = 0.2%)
    pub fee_rate: Decimal,
    /// Destination identity for collected fees
    pub fee_recipient: String,
    /// Trigger timer granularity in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,
    /// Settlement event broadcast buffer
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_event_capacity() -> usize {
    256
}

impl EngineConfig {
    pub fn new(
        batch_size: usize,
        batch_timeout: Duration,
        fee_rate: Decimal,
        fee_recipient: impl Into<String>,
    ) -> Self {
        Self {
            batch_size,
            batch_timeout_ms: batch_timeout.as_millis().min(u64::MAX as u128) as u64,
            fee_rate,
            fee_recipient: fee_recipient.into(),
            tick_interval_ms: default_tick_interval(),
            shutdown_policy: ShutdownPolicy::default(),
            event_capacity: default_event_capacity(),
        }
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick_interval_ms = tick.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Timer period of the trigger loop.
    ///
    /// Never longer than the batch timeout so timeout overshoot stays within one tick.
    pub fn effective_tick(&self) -> Duration {
        let ms = self
            .tick_interval_ms
            .min(self.batch_timeout_ms)
            .max(MIN_TICK_MS);
        Duration::from_millis(ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.batch_size == 0 {
            errors.push("batch_size must be positive".to_string());
        }

        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            errors.push(format!("fee_rate must be in [0, 1): {}", self.fee_rate));
        }

        if self.fee_recipient.trim().is_empty() {
            errors.push("fee_recipient cannot be empty".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("event_capacity must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("engine.tick_interval_ms", default_tick_interval())?
            .set_default("engine.event_capacity", default_event_capacity() as u64)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MEVGUARD_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MEVGUARD__ENGINE__BATCH_SIZE, etc.)
            .add_source(
                Environment::with_prefix("MEVGUARD")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}
