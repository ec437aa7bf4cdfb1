//! Configuration loader for Parley.
//!
//! Reads `parley.toml` and deserializes it into [`AppConfig`], falling back
//! to defaults when the file is missing or malformed. Environment overrides
//! are applied afterwards; the API key only ever comes from the environment.

use std::path::Path;
use std::str::FromStr;

use parley_types::config::{AppConfig, LlmConfig};
use secrecy::SecretString;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "parley.toml";

/// Load configuration from `path`.
///
/// - If the file does not exist, returns [`AppConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config.
pub async fn load_config(path: &Path) -> AppConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return AppConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return AppConfig::default();
        }
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            AppConfig::default()
        }
    }
}

/// Apply `PARLEY_*` overrides. `lookup` resolves an environment variable
/// name to its value (`|k| std::env::var(k).ok()` in production).
///
/// Values that fail to parse are logged and ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("PARLEY_HOST") {
        config.server.host = v;
    }
    override_parsed(&lookup, "PARLEY_PORT", &mut config.server.port);
    override_parsed(
        &lookup,
        "PARLEY_REQUEST_TIMEOUT_SECS",
        &mut config.server.request_timeout_secs,
    );
    if let Some(v) = lookup("PARLEY_DATABASE_URL") {
        config.database.url = v;
    }
    if let Some(v) = lookup("PARLEY_LLM_BASE_URL") {
        config.llm.base_url = v;
    }
    if let Some(v) = lookup("PARLEY_LLM_MODEL") {
        config.llm.model = v;
    }
    override_parsed(&lookup, "PARLEY_MAX_HISTORY", &mut config.context.max_history);
    override_parsed(&lookup, "PARLEY_TARGET_TOKENS", &mut config.context.target_tokens);
    override_parsed(
        &lookup,
        "PARLEY_RATE_LIMIT_RPS",
        &mut config.rate_limit.requests_per_second,
    );
    override_parsed(&lookup, "PARLEY_RATE_LIMIT_BURST", &mut config.rate_limit.burst);
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

/// Read the API key from the variable named by `llm.api_key_env`.
/// Blank values count as missing.
pub fn load_api_key<F>(config: &LlmConfig, lookup: F) -> Option<SecretString>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(&config.api_key_env)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}
