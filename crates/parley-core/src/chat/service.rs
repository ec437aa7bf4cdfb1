//! Chat service: starts and continues conversations.
//!
//! The durable conversation is the record of truth. The context window is
//! a reduced mirror used to build completion requests; when it is missing
//! or unreachable it is rebuilt from (or replaced by) the durable turns.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parley_types::config::AppConfig;
use parley_types::conversation::{Conversation, DEFAULT_PLATFORM, Turn};
use parley_types::error::ChatError;
use parley_types::llm::{CompletionRequest, Message};
use parley_types::session::SessionIdentity;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::chat::title::TitleGenerator;
use crate::context::summarizer::Summarizer;
use crate::context::window::ContextWindow;
use crate::llm::box_provider::BoxLlmProvider;
use crate::repository::conversation::ConversationRepository;
use crate::resilience::cancellable;
use crate::session::resolver::SessionResolver;

/// Largest page `list_conversations` returns.
pub const MAX_LIST_LIMIT: i64 = 100;

/// Number of per-conversation write lock shards.
const WRITE_SHARDS: usize = 32;

/// Result of starting a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedConversation {
    pub conversation_id: Uuid,
    pub title: String,
    pub reply: String,
}

/// A follow-up message, addressed either by conversation id or by the
/// external identity it arrived with. The id wins when both are given.
#[derive(Debug, Clone, Default)]
pub struct ContinueRequest {
    pub conversation_id: Option<Uuid>,
    pub identity: Option<SessionIdentity>,
    pub message: String,
}

/// Result of continuing a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuedConversation {
    pub conversation_id: Uuid,
    pub reply: String,
}

/// Settings for reply generation, taken from `AppConfig`.
#[derive(Debug, Clone)]
struct ReplySettings {
    model: String,
    max_output_tokens: u32,
    system_prompt: String,
    target_tokens: usize,
}

pub struct ChatService<C: Cache, R: ConversationRepository> {
    repo: Arc<R>,
    resolver: SessionResolver<C, R>,
    window: ContextWindow<C>,
    titles: TitleGenerator<C>,
    provider: Arc<BoxLlmProvider>,
    settings: ReplySettings,
    /// Serializes load, reply and durable update for one conversation.
    writes: Box<[Mutex<()>]>,
}

impl<C: Cache, R: ConversationRepository> ChatService<C, R> {
    /// Wire the service. `provider` is used for replies, titles and
    /// summaries alike, so it should already carry retry and breaker
    /// protection.
    pub fn new(cache: Arc<C>, repo: Arc<R>, provider: Arc<BoxLlmProvider>, config: &AppConfig) -> Self {
        let summarizer = Summarizer::new(
            provider.clone(),
            config.llm.model.clone(),
            config.llm.summary_max_tokens,
        );
        let window = ContextWindow::from_config(cache.clone(), &config.context, &config.cache)
            .with_summarizer(summarizer);
        let titles = TitleGenerator::new(
            cache.clone(),
            provider.clone(),
            config.llm.model.clone(),
            config.cache.title_ttl(),
        );
        let resolver = SessionResolver::new(cache, repo.clone(), config.cache.session_ttl());

        Self {
            repo,
            resolver,
            window,
            titles,
            provider,
            settings: ReplySettings {
                model: config.llm.model.clone(),
                max_output_tokens: config.llm.max_output_tokens,
                system_prompt: config.llm.system_prompt.clone(),
                target_tokens: config.context.target_tokens,
            },
            writes: (0..WRITE_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn resolver(&self) -> &SessionResolver<C, R> {
        &self.resolver
    }

    pub fn window(&self) -> &ContextWindow<C> {
        &self.window
    }

    /// Start a conversation through the direct API: title, first reply,
    /// then persist.
    #[tracing::instrument(name = "start_conversation", skip_all)]
    pub async fn start_conversation(
        &self,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<StartedConversation, ChatError> {
        let message = validate_message(message)?;
        let mut conversation = Conversation::new(DEFAULT_PLATFORM, None, None, message);

        let title = cancellable(cancel, self.titles.generate(message))
            .await
            .ok_or(ChatError::Cancelled)?;
        let reply = raced(cancel, self.reply(&conversation, None)).await?;

        conversation.title = title.clone();
        conversation.push_turn(Turn::assistant(reply.clone()));
        self.persist(&conversation, cancel, true).await?;
        self.record_reply(&conversation.id, &reply).await;

        info!(conversation_id = %conversation.id, title = %title, "conversation started");
        Ok(StartedConversation {
            conversation_id: conversation.id,
            title,
            reply,
        })
    }

    /// Add a user message to an existing (or session-resolved) conversation
    /// and reply to it.
    #[tracing::instrument(name = "continue_conversation", skip_all)]
    pub async fn continue_conversation(
        &self,
        request: ContinueRequest,
        cancel: &CancellationToken,
    ) -> Result<ContinuedConversation, ChatError> {
        let message = validate_message(&request.message)?;

        let (conversation_id, created) = match (request.conversation_id, &request.identity) {
            (Some(id), _) => (id, false),
            (None, Some(identity)) => {
                let resolution = self.resolver.resolve(identity, message, cancel).await?;
                (resolution.conversation_id, resolution.created)
            }
            (None, None) => {
                return Err(ChatError::Validation(
                    "either conversation_id or session metadata is required".to_string(),
                ));
            }
        };

        let _guard = self.write_shard(&conversation_id).lock().await;
        let mut conversation = raced(cancel, self.repo.get(&conversation_id))
            .await?
            .ok_or(ChatError::NotFound)?;

        // A conversation the resolver just created already holds the message.
        let new_turn = if created {
            None
        } else {
            let turn = Turn::user(message);
            conversation.push_turn(turn.clone());
            Some(turn)
        };

        let reply = raced(cancel, self.reply(&conversation, new_turn.as_ref())).await?;

        conversation.push_turn(Turn::assistant(reply.clone()));
        self.persist(&conversation, cancel, false).await?;
        self.record_reply(&conversation.id, &reply).await;

        info!(
            conversation_id = %conversation.id,
            turns = conversation.turns.len(),
            created,
            "conversation continued"
        );
        Ok(ContinuedConversation {
            conversation_id: conversation.id,
            reply,
        })
    }

    /// Most recently active conversations, without turns.
    pub async fn list_conversations(&self, limit: i64) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.repo.list(limit.clamp(1, MAX_LIST_LIMIT)).await?)
    }

    /// A conversation with all of its durable turns.
    pub async fn describe_conversation(&self, id: &Uuid) -> Result<Conversation, ChatError> {
        self.repo.get(id).await?.ok_or(ChatError::NotFound)
    }

    /// Generate the assistant reply for `conversation`, whose turns already
    /// end with the user message being answered.
    async fn reply(&self, conversation: &Conversation, new_turn: Option<&Turn>) -> Result<String, ChatError> {
        let history = self.prepare_history(conversation, new_turn).await;

        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.settings.system_prompt.clone()));
        messages.extend(history.into_iter().map(|turn| Message {
            role: turn.role.into(),
            content: turn.content,
        }));

        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages,
            max_tokens: self.settings.max_output_tokens,
            temperature: Some(0.7),
        };
        let response = self.provider.complete(&request).await?;
        Ok(response.content.trim().to_string())
    }

    /// Write the conversation durably. On failure the context window is
    /// dropped so it is rebuilt from the durable turns next time instead of
    /// carrying turns the store never saw.
    async fn persist(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
        create: bool,
    ) -> Result<(), ChatError> {
        let written = if create {
            raced(cancel, self.repo.create(conversation)).await
        } else {
            raced(cancel, self.repo.update(conversation)).await
        };
        if written.is_err() {
            self.window.clear(&conversation.id).await;
        }
        written
    }

    async fn record_reply(&self, conversation_id: &Uuid, reply: &str) {
        if let Err(e) = self
            .window
            .append(conversation_id, Turn::assistant(reply))
            .await
        {
            warn!(conversation_id = %conversation_id, error = %e, "failed to record reply in context");
        }
    }

    fn write_shard(&self, conversation_id: &Uuid) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        &self.writes[(hasher.finish() as usize) % self.writes.len()]
    }

    /// Sync the context window with the durable conversation and bring it
    /// within budget. Falls back to a locally reduced copy of the durable
    /// turns when the window cannot be used.
    async fn prepare_history(&self, conversation: &Conversation, new_turn: Option<&Turn>) -> Vec<Turn> {
        let id = &conversation.id;
        let target = self.settings.target_tokens;
        let durable = || self.window.fit_locally(conversation.turns.clone(), target);

        let synced = if self.window.load(id).await.is_empty() {
            self.window.restore(id, conversation.turns.clone()).await
        } else if let Some(turn) = new_turn {
            self.window.append(id, turn.clone()).await
        } else {
            Ok(())
        };
        if let Err(e) = synced {
            warn!(conversation_id = %id, error = %e, "context window unavailable, using durable history");
            return durable();
        }

        if let Err(e) = self.window.ensure_fits(id, target).await {
            warn!(conversation_id = %id, error = %e, "failed to reduce context, using durable history");
            return durable();
        }

        let history = self.window.load(id).await;
        if history.is_empty() { durable() } else { history }
    }
}

fn validate_message(message: &str) -> Result<&str, ChatError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(ChatError::Validation("message is required".to_string()));
    }
    Ok(trimmed)
}

/// Race a fallible step against `cancel`, mapping its error into `ChatError`.
async fn raced<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, ChatError>
where
    F: Future<Output = Result<T, E>>,
    ChatError: From<E>,
{
    match cancellable(cancel, fut).await {
        Some(result) => Ok(result?),
        None => Err(ChatError::Cancelled),
    }
}
