//! Conversation summarizer for context reduction.
//!
//! `Summarizer` condenses a conversation into a short summary when its
//! history exceeds the token budget. The context window keeps the summary
//! plus the most recent turns in place of the full history.

use std::sync::Arc;

use parley_types::conversation::Turn;
use parley_types::llm::{CompletionRequest, LlmError, Message};

use crate::llm::box_provider::BoxLlmProvider;

/// System prompt for the summarization call.
const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates concise summaries of conversations.";

/// Prefix of the synthetic turn that replaces summarized history.
pub const SUMMARY_PREFIX: &str = "Previous conversation summary: ";

/// Number of original turns kept after the summary.
pub const KEEP_RECENT: usize = 3;

/// Summarization needs strictly more turns than this.
pub const MIN_TURNS_TO_SUMMARIZE: usize = 2;

/// Produces conversation summaries through the completion service.
#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<BoxLlmProvider>,
    model: String,
    max_tokens: u32,
}

impl Summarizer {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
        }
    }

    /// Summarize `turns`, returning the trimmed summary text.
    #[tracing::instrument(
        name = "summarize_context",
        skip(self, turns),
        fields(model = %self.model, turn_count = turns.len())
    )]
    pub async fn summarize(&self, turns: &[Turn]) -> Result<String, LlmError> {
        if turns.is_empty() {
            return Ok(String::new());
        }

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message::system(SUMMARY_SYSTEM_PROMPT),
                Message::user(Self::build_prompt(turns)),
            ],
            max_tokens: self.max_tokens,
            temperature: Some(0.0),
        };

        let response = self.provider.complete(&request).await?;
        Ok(response.content.trim().to_string())
    }

    fn build_prompt(turns: &[Turn]) -> String {
        let transcript: String = turns
            .iter()
            .map(|t| format!("{}: {}\n", t.role, t.content))
            .collect();

        format!(
            "Please summarize the following conversation, focusing on key points, decisions, \
             and important information. Keep the summary concise but informative.\n\n\
             Conversation:\n{transcript}\nSummary:"
        )
    }

    /// Replacement history: one synthetic assistant turn carrying the
    /// summary, followed by the most recent `min(KEEP_RECENT, n)` turns.
    pub fn condensed_history(summary: &str, turns: &[Turn]) -> Vec<Turn> {
        let keep = KEEP_RECENT.min(turns.len());
        let mut condensed = Vec::with_capacity(keep + 1);
        condensed.push(Turn::assistant(format!("{SUMMARY_PREFIX}{summary}")));
        condensed.extend_from_slice(&turns[turns.len() - keep..]);
        condensed
    }
}
