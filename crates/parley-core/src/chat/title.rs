//! Conversation title generation.
//!
//! Titles are generated from the first user message, formatted to a short
//! title-cased string and cached by a digest of the message. When the
//! completion service fails, a title is derived from the message itself.

use std::sync::Arc;
use std::time::Duration;

use parley_types::llm::{CompletionRequest, LlmError, Message};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::{self, Cache};
use crate::llm::box_provider::BoxLlmProvider;

/// System prompt for the title generation call.
const TITLE_SYSTEM_PROMPT: &str = r#"Generate a very concise and descriptive title for this conversation.
The title should:
- Be 3-7 words maximum
- Focus on the main topic or question
- Describe the topic without answering the question
- Use no emojis and no punctuation at the end
- Be at most 60 characters

Examples:
- "What's the weather in Barcelona?" -> "Weather in Barcelona"
- "Tell me about machine learning" -> "Machine Learning Overview"
- "How to cook pasta carbonara" -> "Pasta Carbonara Recipe""#;

/// Upper bound on title length, in characters.
pub const TITLE_MAX_CHARS: usize = 60;

/// Words kept lowercase unless they start the title.
const SHORT_WORDS: &[&str] = &[
    "a", "an", "the", "and", "but", "or", "for", "nor", "on", "at", "to", "by", "in", "of", "with",
];

/// Words of the message used by the fallback title.
const FALLBACK_WORDS: usize = 5;

/// Generates and caches conversation titles.
pub struct TitleGenerator<C: Cache> {
    cache: Arc<C>,
    provider: Arc<BoxLlmProvider>,
    model: String,
    ttl: Duration,
}

impl<C: Cache> TitleGenerator<C> {
    pub fn new(
        cache: Arc<C>,
        provider: Arc<BoxLlmProvider>,
        model: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            cache,
            provider,
            model: model.into(),
            ttl,
        }
    }

    /// Title for a conversation starting with `first_message`. Never fails.
    #[tracing::instrument(name = "generate_title", skip_all, fields(model = %self.model))]
    pub async fn generate(&self, first_message: &str) -> String {
        let key = cache::title_key(&message_digest(first_message));

        match cache::get_typed::<C, String>(self.cache.as_ref(), &key).await {
            Ok(Some(title)) => {
                debug!("title cache hit");
                return title;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "title cache read failed"),
        }

        match self.request_title(first_message).await {
            Ok(title) if !title.is_empty() => {
                if let Err(e) =
                    cache::set_typed(self.cache.as_ref(), &key, &title, self.ttl).await
                {
                    warn!(error = %e, "failed to cache title");
                }
                title
            }
            Ok(_) => {
                warn!("empty title from completion service, using fallback");
                fallback_title(first_message)
            }
            Err(e) => {
                warn!(error = %e, "title generation failed, using fallback");
                fallback_title(first_message)
            }
        }
    }

    async fn request_title(&self, first_message: &str) -> Result<String, LlmError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(TITLE_SYSTEM_PROMPT),
                Message::user(first_message),
            ],
            max_tokens: 30,
            temperature: Some(0.3),
        };

        let response = self.provider.complete(&request).await?;
        Ok(format_title(&response.content))
    }
}

/// Hex SHA-256 of the message, used as the title cache key.
pub fn message_digest(message: &str) -> String {
    format!("{:x}", Sha256::digest(message.as_bytes()))
}

/// Flatten, strip quotes and dashes, cap at `TITLE_MAX_CHARS` and title-case.
pub fn format_title(raw: &str) -> String {
    let flattened = raw.trim().replace(['\n', '\r'], " ");
    let stripped = flattened.trim_matches(|c| matches!(c, ' ' | '"' | '\'' | '`' | '-'));
    let capped: String = stripped.chars().take(TITLE_MAX_CHARS).collect();
    title_case(&capped)
}

/// First few words of the message, formatted as a title.
pub fn fallback_title(message: &str) -> String {
    let words: Vec<&str> = message.split_whitespace().take(FALLBACK_WORDS).collect();
    format_title(&format!("{}...", words.join(" ")))
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .enumerate()
        .map(|(i, word)| {
            let lower = word.to_lowercase();
            if i > 0 && SHORT_WORDS.contains(&lower.as_str()) {
                lower
            } else {
                capitalize(&lower)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
