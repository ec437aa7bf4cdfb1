//! In-memory port implementations shared by the unit tests of this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parley_types::conversation::Conversation;
use parley_types::error::{CacheError, RepositoryError};
use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};
use uuid::Uuid;

use crate::cache::Cache;
use crate::llm::provider::LlmProvider;
use crate::repository::conversation::ConversationRepository;

// ---------------------------------------------------------------------------
// MockCache
// ---------------------------------------------------------------------------

/// HashMap-backed cache. TTLs are recorded but never expire entries.
#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
    ttls: Mutex<HashMap<String, Duration>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub sets: AtomicU32,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an entry as if it had expired.
    pub fn evict(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.ttls.lock().unwrap().get(key).copied()
    }
}

impl Cache for MockCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("read refused".into()));
        }
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("write refused".into()));
        }
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().unwrap().insert(key.to_string(), value);
        self.ttls.lock().unwrap().insert(key.to_string(), ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("write refused".into()));
        }
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockConversationRepository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockConversationRepository {
    conversations: Mutex<HashMap<Uuid, Conversation>>,
    pub fail_queries: AtomicBool,
    pub fail_writes: AtomicBool,
    pub creates: AtomicU32,
}

impl MockConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id, conversation);
    }

    pub fn stored(&self, id: &Uuid) -> Option<Conversation> {
        self.conversations.lock().unwrap().get(id).cloned()
    }

    pub fn count(&self) -> usize {
        self.conversations.lock().unwrap().len()
    }
}

impl ConversationRepository for MockConversationRepository {
    async fn create(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("insert refused".into()));
        }
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.insert(conversation.clone());
        Ok(())
    }

    async fn update(&self, conversation: &Conversation) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("update refused".into()));
        }
        let mut conversations = self.conversations.lock().unwrap();
        match conversations.get_mut(&conversation.id) {
            Some(existing) => {
                *existing = conversation.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Conversation>, RepositoryError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(self.stored(id))
    }

    async fn find_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut found: Vec<Conversation> = self
            .conversations
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.platform == platform && c.chat_id.as_deref() == Some(chat_id))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(found)
    }

    async fn latest_by_platform_chat(
        &self,
        platform: &str,
        chat_id: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self
            .find_by_platform_chat(platform, chat_id)
            .await?
            .into_iter()
            .next())
    }

    async fn list(&self, limit: i64) -> Result<Vec<Conversation>, RepositoryError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        let mut all: Vec<Conversation> =
            self.conversations.lock().unwrap().values().cloned().collect();
        all.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Provider that replays a script of outcomes, then falls back to a
/// fixed reply once the script runs out.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: String,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Option<Duration>,
    pub calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn replying(reply: &str) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(script: Vec<Result<String, LlmError>>, fallback: &str) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: fallback.to_string(),
            requests: Mutex::new(Vec::new()),
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Take `delay` to answer each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let next = self.script.lock().unwrap().pop_front();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let content = match next {
            Some(outcome) => outcome?,
            None => self.fallback.clone(),
        };
        Ok(CompletionResponse {
            id: "resp-scripted".to_string(),
            content,
            model: request.model.clone(),
            finish_reason: Some("stop".to_string()),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        })
    }
}

/// Lets a test keep a handle on the provider after boxing it.
impl LlmProvider for Arc<ScriptedProvider> {
    fn name(&self) -> &str {
        ScriptedProvider::name(self)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        ScriptedProvider::complete(self, request).await
    }
}

/// Shorthand for a retryable upstream failure.
pub fn upstream_error() -> LlmError {
    LlmError::Http {
        status: 503,
        message: "service unavailable".to_string(),
    }
}
