//! Cached, bounded turn history per conversation.
//!
//! `ContextWindow` keeps the working history of each conversation in the
//! fast cache under `context:{id}`. It enforces two limits:
//!
//! - **Turn count**: every mutation truncates to the newest `max_history`
//!   turns.
//! - **Token budget**: `ensure_fits` reduces history whose estimated cost
//!   exceeds a target, first by AI summarization and then, if that fails or
//!   is not enough, by dropping the oldest turns.
//!
//! Read-modify-write sequences are serialized per conversation by a fixed
//! array of async mutexes selected by hashing the conversation id.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use parley_types::config::{CacheConfig, ContextConfig};
use parley_types::conversation::Turn;
use parley_types::error::{CacheError, ContextError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{self, Cache};

use super::summarizer::{MIN_TURNS_TO_SUMMARIZE, Summarizer};
use super::tokens::{HeuristicEstimator, TokenEstimator};

/// Number of lock shards.
const LOCK_SHARDS: usize = 32;

/// Bounded, cache-backed conversation history.
pub struct ContextWindow<C: Cache> {
    cache: Arc<C>,
    locks: Box<[Mutex<()>]>,
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Option<Summarizer>,
    max_history: usize,
    ttl: Duration,
}

impl<C: Cache> ContextWindow<C> {
    /// Create a window with the heuristic estimator and no summarizer.
    pub fn new(cache: Arc<C>, max_history: usize, ttl: Duration) -> Self {
        Self {
            cache,
            locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
            estimator: Arc::new(HeuristicEstimator),
            summarizer: None,
            max_history: max_history.max(1),
            ttl,
        }
    }

    pub fn from_config(cache: Arc<C>, context: &ContextConfig, ttls: &CacheConfig) -> Self {
        Self::new(cache, context.max_history, ttls.context_ttl())
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn max_history(&self) -> usize {
        self.max_history
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    // --- Operations ---

    /// Append a turn, dropping the oldest turns beyond `max_history`.
    ///
    /// Cache read errors are propagated rather than treated as an empty
    /// history, so an unreachable cache never causes history to be
    /// overwritten.
    pub async fn append(&self, conversation_id: &Uuid, turn: Turn) -> Result<(), ContextError> {
        let _guard = self.shard(conversation_id).lock().await;

        let mut turns = self.read(conversation_id).await?;
        turns.push(turn);
        self.truncate(&mut turns);
        self.write(conversation_id, &turns).await?;

        debug!(conversation_id = %conversation_id, turns = turns.len(), "turn appended");
        Ok(())
    }

    /// Current history. Empty on a miss; cache errors are logged and also
    /// yield an empty history.
    pub async fn load(&self, conversation_id: &Uuid) -> Vec<Turn> {
        match self.read(conversation_id).await {
            Ok(turns) => turns,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "failed to load context, using empty history");
                Vec::new()
            }
        }
    }

    /// Estimated token cost of the current history.
    pub async fn estimate_tokens(&self, conversation_id: &Uuid) -> usize {
        self.estimator.estimate_turns(&self.load(conversation_id).await)
    }

    /// Reduce the history until its estimated cost is at most `target`
    /// tokens, or a single turn remains.
    ///
    /// Summarization failures are logged and fall back to dropping the
    /// oldest turns. Cache errors are propagated.
    pub async fn ensure_fits(&self, conversation_id: &Uuid, target: usize) -> Result<(), ContextError> {
        let snapshot = {
            let _guard = self.shard(conversation_id).lock().await;
            self.read(conversation_id).await?
        };

        let before = self.estimator.estimate_turns(&snapshot);
        if before <= target {
            return Ok(());
        }

        // The summarization call runs without holding the shard lock.
        let condensed = self.summarize(conversation_id, &snapshot).await;
        let summarized = condensed.is_some();

        let _guard = self.shard(conversation_id).lock().await;
        let current = self.read(conversation_id).await?;

        let mut reduced = match condensed {
            // Keep turns appended while the summary was being produced.
            Some(mut condensed) if current.starts_with(&snapshot) => {
                condensed.extend_from_slice(&current[snapshot.len()..]);
                condensed
            }
            Some(_) => {
                debug!(conversation_id = %conversation_id, "history changed during summarization, discarding summary");
                current
            }
            None => current,
        };
        self.truncate(&mut reduced);
        let reduced = self.drop_oldest_until_fits(reduced, target);
        self.write(conversation_id, &reduced).await?;

        info!(
            conversation_id = %conversation_id,
            before_tokens = before,
            after_tokens = self.estimator.estimate_turns(&reduced),
            target,
            turns = reduced.len(),
            summarized,
            "context reduced"
        );
        Ok(())
    }

    /// Replace the cached history, e.g. to rehydrate an evicted window
    /// from the durable conversation.
    pub async fn restore(&self, conversation_id: &Uuid, mut turns: Vec<Turn>) -> Result<(), ContextError> {
        let _guard = self.shard(conversation_id).lock().await;
        self.truncate(&mut turns);
        self.write(conversation_id, &turns).await?;
        debug!(conversation_id = %conversation_id, turns = turns.len(), "context restored");
        Ok(())
    }

    /// Delete the cached history. Errors are logged.
    pub async fn clear(&self, conversation_id: &Uuid) {
        let _guard = self.shard(conversation_id).lock().await;
        if let Err(e) = self.cache.delete(&cache::context_key(conversation_id)).await {
            warn!(conversation_id = %conversation_id, error = %e, "failed to clear context");
        }
    }

    /// Apply both limits to a history held outside the cache.
    pub fn fit_locally(&self, mut turns: Vec<Turn>, target: usize) -> Vec<Turn> {
        self.truncate(&mut turns);
        self.drop_oldest_until_fits(turns, target)
    }

    // --- Helpers ---

    async fn summarize(&self, conversation_id: &Uuid, turns: &[Turn]) -> Option<Vec<Turn>> {
        let summarizer = self.summarizer.as_ref()?;
        if turns.len() <= MIN_TURNS_TO_SUMMARIZE {
            return None;
        }

        match summarizer.summarize(turns).await {
            Ok(summary) if !summary.trim().is_empty() => {
                Some(Summarizer::condensed_history(&summary, turns))
            }
            Ok(_) => {
                warn!(conversation_id = %conversation_id, "empty summary, falling back to basic reduction");
                None
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "summarization failed, falling back to basic reduction");
                None
            }
        }
    }

    fn drop_oldest_until_fits(&self, turns: Vec<Turn>, target: usize) -> Vec<Turn> {
        let mut total = self.estimator.estimate_turns(&turns);
        let mut start = 0;
        while total > target && turns.len() - start > 1 {
            total -= self.estimator.estimate_turn(&turns[start]);
            start += 1;
        }
        turns.into_iter().skip(start).collect()
    }

    fn truncate(&self, turns: &mut Vec<Turn>) {
        if turns.len() > self.max_history {
            turns.drain(..turns.len() - self.max_history);
        }
    }

    fn shard(&self, conversation_id: &Uuid) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        &self.locks[(hasher.finish() as usize) % self.locks.len()]
    }

    async fn read(&self, conversation_id: &Uuid) -> Result<Vec<Turn>, CacheError> {
        let turns: Option<Vec<Turn>> =
            cache::get_typed(self.cache.as_ref(), &cache::context_key(conversation_id)).await?;
        Ok(turns.unwrap_or_default())
    }

    async fn write(&self, conversation_id: &Uuid, turns: &[Turn]) -> Result<(), CacheError> {
        cache::set_typed(
            self.cache.as_ref(),
            &cache::context_key(conversation_id),
            turns,
            self.ttl,
        )
        .await
    }
}
