//! Configuration with validation and defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashcoreConfig {
    pub round: RoundConfig,
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
}

/// Round timing, curve, and bet-bound configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// How long the betting window stays open before a round starts.
    pub betting_window_ms: u64,
    /// Cadence of multiplier ticks while a round is running.
    pub tick_interval_ms: u64,
    /// Pause between a crash and the next betting window.
    pub inter_round_delay_ms: u64,
    /// Exponent constant k in multiplier(t) = e^(k * t_ms).
    pub growth_constant: f64,
    /// Safety ceiling for the crash point, as a multiplier.
    pub max_crash_point: f64,
    pub min_bet: f64,
    pub max_bet: f64,
    /// Number of pre-committed seeds per chain.
    pub seed_chain_length: usize,
    /// Completed rounds retained for newly-joining observers.
    pub history_limit: usize,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_window_ms: 5_000,
            tick_interval_ms: 100,
            inter_round_delay_ms: 3_000,
            growth_constant: 0.00006,
            max_crash_point: 10_000.0,
            min_bet: 0.10,
            max_bet: 10_000.0,
            seed_chain_length: 10_000,
            history_limit: 50,
        }
    }
}

impl RoundConfig {
    pub fn betting_window(&self) -> Duration {
        Duration::from_millis(self.betting_window_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn inter_round_delay(&self) -> Duration {
        Duration::from_millis(self.inter_round_delay_ms)
    }

    pub fn max_crash_hundredths(&self) -> u64 {
        (self.max_crash_point * 100.0).round() as u64
    }

    pub fn min_bet_cents(&self) -> u64 {
        (self.min_bet * 100.0).round() as u64
    }

    pub fn max_bet_cents(&self) -> u64 {
        (self.max_bet * 100.0).round() as u64
    }
}

/// External ledger endpoint and retry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub base_url: String,
    pub currency: String,
    /// Upper bound for one ledger request attempt.
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090".to_string(),
            currency: "USD".to_string(),
            request_timeout_ms: 2_000,
            retry: RetryConfig::default(),
        }
    }
}

/// Retry budget for ledger calls. Backoff grows linearly with the attempt
/// number; the request id stays fixed across attempts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

/// HTTP server bind configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl CrashcoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate logical consistency across sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.round.betting_window_ms == 0 {
            return Err(ConfigError::Invalid("betting_window_ms must be > 0".into()));
        }
        if self.round.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("tick_interval_ms must be > 0".into()));
        }
        if self.round.growth_constant <= 0.0 {
            return Err(ConfigError::Invalid("growth_constant must be > 0".into()));
        }
        if self.round.max_crash_point < 1.0 {
            return Err(ConfigError::Invalid("max_crash_point must be >= 1.00".into()));
        }
        if self.round.min_bet <= 0.0 || self.round.max_bet < self.round.min_bet {
            return Err(ConfigError::Invalid(
                "bet bounds must satisfy 0 < min_bet <= max_bet".into(),
            ));
        }
        if self.round.seed_chain_length == 0 {
            return Err(ConfigError::Invalid("seed_chain_length must be > 0".into()));
        }
        if self.round.tick_interval_ms >= self.round.betting_window_ms {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be shorter than the betting window".into(),
            ));
        }
        if self.ledger.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if self.ledger.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CrashcoreConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_tick_interval_rejected() {
        let mut config = CrashcoreConfig::default();
        config.round.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_bet_bounds_rejected() {
        let mut config = CrashcoreConfig::default();
        config.round.min_bet = 100.0;
        config.round.max_bet = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_retry_budget_rejected() {
        let mut config = CrashcoreConfig::default();
        config.ledger.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unit_conversions() {
        let config = RoundConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.min_bet_cents(), 10);
        assert_eq!(config.max_crash_hundredths(), 1_000_000);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let parsed: CrashcoreConfig = toml::from_str(
            r#"
            [round]
            betting_window_ms = 750
            "#,
        )
        .unwrap();
        assert_eq!(parsed.round.betting_window_ms, 750);
        assert_eq!(parsed.round.tick_interval_ms, 100);
        assert_eq!(parsed.ledger.currency, "USD");
    }
}
