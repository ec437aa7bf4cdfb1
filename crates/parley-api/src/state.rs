//! Application state wiring all services together.
//!
//! `ChatService` is generic over its cache and repository ports; AppState
//! pins it to the concrete infra implementations.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use parley_core::chat::ChatService;
use parley_core::llm::box_provider::BoxLlmProvider;
use parley_core::llm::provider::LlmProvider;
use parley_core::llm::resilient::ResilientProvider;
use parley_core::resilience::breaker::CircuitBreaker;
use parley_core::resilience::rate_limit::RateLimiter;
use parley_core::resilience::retry::RetryPolicy;
use parley_infra::cache::memory::MemoryCache;
use parley_infra::config::{apply_env_overrides, load_api_key, load_config};
use parley_infra::llm::openai::OpenAiProvider;
use parley_infra::sqlite::conversation::SqliteConversationRepository;
use parley_infra::sqlite::pool::DatabasePool;
use parley_types::config::AppConfig;
use tokio_util::sync::CancellationToken;

pub type ConcreteChatService = ChatService<MemoryCache, SqliteConversationRepository>;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ConcreteChatService>,
    pub breaker: Arc<CircuitBreaker>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<MemoryCache>,
    pub db_pool: DatabasePool,
    pub config: Arc<AppConfig>,
    /// Cancelled when the server begins shutting down. Requests run on
    /// child tokens of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Connect to the database and the completion API described by `config`.
    pub async fn init(config: AppConfig, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let api_key = load_api_key(&config.llm, |key| std::env::var(key).ok()).with_context(|| {
            format!(
                "No API key found: set the {} environment variable",
                config.llm.api_key_env
            )
        })?;
        let provider = OpenAiProvider::new(api_key, &config.llm)
            .context("Failed to create completion client")?;

        let db_pool = DatabasePool::new(&config.database.url)
            .await
            .context("Failed to open database")?;

        Ok(Self::assemble(config, db_pool, provider, shutdown))
    }

    /// Wire services around an already-built pool and provider. The
    /// provider is wrapped with retry and circuit breaking here.
    pub fn assemble<P: LlmProvider + 'static>(
        config: AppConfig,
        db_pool: DatabasePool,
        provider: P,
        shutdown: CancellationToken,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::from_config(
            provider.name().to_string(),
            &config.circuit_breaker,
        ));
        let resilient = ResilientProvider::new(
            provider,
            breaker.clone(),
            RetryPolicy::from(&config.retry),
            shutdown.clone(),
        );

        let cache = Arc::new(MemoryCache::new());
        let repo = Arc::new(SqliteConversationRepository::new(db_pool.clone()));
        let chat_service = ChatService::new(
            cache.clone(),
            repo,
            Arc::new(BoxLlmProvider::new(resilient)),
            &config,
        );

        Self {
            chat_service: Arc::new(chat_service),
            breaker,
            rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
            cache,
            db_pool,
            config: Arc::new(config),
            shutdown,
        }
    }
}

/// Load `path`, apply `PARLEY_*` overrides from `lookup`, and validate.
pub async fn load_effective_config<F>(path: &Path, lookup: F) -> anyhow::Result<AppConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = load_config(path).await;
    apply_env_overrides(&mut config, lookup);
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_effective_config_applies_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("parley.toml");
        tokio::fs::write(&path, "[server]\nport = 9100\n").await.unwrap();

        let config = load_effective_config(&path, |key| {
            (key == "PARLEY_HOST").then(|| "0.0.0.0".to_string())
        })
        .await
        .unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn test_effective_config_rejects_invalid_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("parley.toml");
        let result = load_effective_config(&path, |key| {
            (key == "PARLEY_RATE_LIMIT_BURST").then(|| "0".to_string())
        })
        .await;
        assert!(result.is_err());
    }
}
