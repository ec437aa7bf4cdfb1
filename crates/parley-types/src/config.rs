//! Application configuration types for Parley.
//!
//! `AppConfig` represents `parley.toml`. Every section and field has a
//! default, so an empty file (or no file at all) yields a usable config.
//! Secrets are never part of this struct; the API key is read from the
//! environment variable named by `llm.api_key_env`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

impl AppConfig {
    /// Reject values the core cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.burst == 0 {
            return Err(ConfigError::Invalid("rate_limit.burst must be at least 1".into()));
        }
        if !(self.rate_limit.requests_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_second must be positive".into(),
            ));
        }
        if self.context.max_history == 0 {
            return Err(ConfigError::Invalid("context.max_history must be at least 1".into()));
        }
        if self.circuit_breaker.max_failures == 0 {
            return Err(ConfigError::Invalid(
                "circuit_breaker.max_failures must be at least 1".into(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deadline applied to every inbound request.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://parley.db?mode=rwc".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name used for logging and breaker identification.
    pub provider: String,
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub max_output_tokens: u32,
    pub summary_max_tokens: u32,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_output_tokens: 1024,
            summary_max_tokens: 200,
            timeout_secs: 60,
            system_prompt: "You are a helpful assistant. Answer concisely and accurately."
                .to_string(),
        }
    }
}

/// Retry policy values. `max_attempts` counts retries after the first try.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            cooldown_secs: 30,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst: u32,
    /// Buckets unused for this long are evicted by the sweep.
    pub idle_eviction_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: 20,
            idle_eviction_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub session_ttl_minutes: u64,
    pub context_ttl_hours: u64,
    pub title_ttl_hours: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            context_ttl_hours: 24,
            title_ttl_hours: 24,
        }
    }
}

impl CacheConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_minutes * 60)
    }

    pub fn context_ttl(&self) -> Duration {
        Duration::from_secs(self.context_ttl_hours * 3600)
    }

    pub fn title_ttl(&self) -> Duration {
        Duration::from_secs(self.title_ttl_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Maximum number of turns retained per conversation.
    pub max_history: usize,
    /// Estimated-token budget enforced before each reply.
    pub target_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history: 20,
            target_tokens: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 5000);
        assert_eq!(config.circuit_breaker.max_failures, 3);
        assert_eq!(config.circuit_breaker.cooldown(), Duration::from_secs(30));
        assert_eq!(config.rate_limit.burst, 20);
        assert_eq!(config.cache.session_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(config.context.max_history, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_deserialize_partial_section() {
        let toml_str = r#"
[retry]
max_attempts = 5

[rate_limit]
requests_per_second = 2.5
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert!((config.rate_limit.requests_per_second - 2.5).abs() < f64::EPSILON);
        assert_eq!(config.rate_limit.burst, 20);
    }

    #[test]
    fn test_validate_rejects_zero_burst() {
        let mut config = AppConfig::default();
        config.rate_limit.burst = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let mut config = AppConfig::default();
        config.context.max_history = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 10_000;
        assert!(config.validate().is_err());
    }
}
