//! OpenAiProvider -- concrete [`LlmProvider`] for Chat Completions endpoints.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building the `Authorization` header. It never appears in `Debug`
//! output or logs.

use std::time::Duration;

use parley_core::llm::provider::LlmProvider;
use parley_observe::genai_attrs;
use parley_types::config::LlmConfig;
use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};
use reqwest::header::RETRY_AFTER;
use secrecy::{ExposeSecret, SecretString};
use tracing::{Instrument, field};

use super::types::{ApiErrorBody, ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// Chat Completions provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    name: String,
}

impl OpenAiProvider {
    /// Create a provider for `config.base_url`, with the per-request
    /// timeout from `config.timeout_secs`.
    pub fn new(api_key: SecretString, config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            name: config.provider.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn to_wire_request(request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.to_string(),
                    content: Some(m.content.clone()),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }

    async fn send(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let response = self
            .client
            .post(self.url("/chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&Self::to_wire_request(request))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), retry_after_ms, &body));
        }

        let wire: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;
        into_completion(wire)
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let span = tracing::info_span!(
            "chat",
            gen_ai.operation.name = genai_attrs::OP_CHAT,
            gen_ai.provider.name = %self.name,
            gen_ai.request.model = %request.model,
            gen_ai.request.max_tokens = request.max_tokens,
            gen_ai.response.id = field::Empty,
            gen_ai.response.model = field::Empty,
            gen_ai.response.finish_reasons = field::Empty,
            gen_ai.usage.input_tokens = field::Empty,
            gen_ai.usage.output_tokens = field::Empty,
        );

        let result = self.send(request).instrument(span.clone()).await;
        match &result {
            Ok(response) => {
                span.record(genai_attrs::GEN_AI_RESPONSE_ID, response.id.as_str());
                span.record(genai_attrs::GEN_AI_RESPONSE_MODEL, response.model.as_str());
                if let Some(reason) = &response.finish_reason {
                    span.record(genai_attrs::GEN_AI_RESPONSE_FINISH_REASONS, reason.as_str());
                }
                span.record(genai_attrs::GEN_AI_USAGE_INPUT_TOKENS, response.usage.input_tokens);
                span.record(genai_attrs::GEN_AI_USAGE_OUTPUT_TOKENS, response.usage.output_tokens);
            }
            Err(e) => {
                tracing::debug!(parent: &span, error = %e, "completion request failed");
            }
        }
        result
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() {
        LlmError::Network(e.to_string())
    } else {
        LlmError::Provider {
            message: format!("HTTP request failed: {e}"),
        }
    }
}

/// Classify a non-2xx response.
fn status_error(status: u16, retry_after_ms: Option<u64>, body: &str) -> LlmError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.error.message.clone())
        .unwrap_or_else(|| body.to_string());
    let code = parsed
        .as_ref()
        .and_then(|b| b.error.code.clone().or_else(|| b.error.kind.clone()))
        .unwrap_or_default();

    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        429 if code == "insufficient_quota" => LlmError::Provider { message },
        429 => LlmError::RateLimited { retry_after_ms },
        400 if code == "context_length_exceeded" => LlmError::ContextLengthExceeded(message),
        400 | 404 | 422 => LlmError::InvalidRequest(message),
        503 | 529 if message.to_lowercase().contains("overloaded") => LlmError::Overloaded(message),
        _ => LlmError::Http { status, message },
    }
}

fn into_completion(wire: ChatCompletionResponse) -> Result<CompletionResponse, LlmError> {
    let choice = wire.choices.into_iter().next().ok_or_else(|| LlmError::Provider {
        message: "response contained no choices".to_string(),
    })?;
    let usage = wire.usage.unwrap_or_default();

    Ok(CompletionResponse {
        id: wire.id,
        content: choice.message.content.unwrap_or_default(),
        model: wire.model,
        finish_reason: choice.finish_reason,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::llm::Message;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![Message::system("be brief"), Message::user("hello")],
            max_tokens: 64,
            temperature: Some(0.2),
        }
    }

    /// Serve one canned HTTP response and hand back the raw request text.
    async fn serve_once(
        status_line: &'static str,
        extra_headers: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\n{extra_headers}content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (format!("http://{addr}/v1"), handle)
    }

    fn provider(base_url: &str) -> OpenAiProvider {
        let config = LlmConfig {
            base_url: base_url.to_string(),
            timeout_secs: 5,
            ..LlmConfig::default()
        };
        OpenAiProvider::new(SecretString::from("sk-test-not-real"), &config).unwrap()
    }

    #[test]
    fn test_wire_request_shape() {
        let wire = OpenAiProvider::to_wire_request(&request());
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["max_tokens"], 64);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(status_error(401, None, ""), LlmError::AuthenticationFailed));
        assert!(matches!(
            status_error(429, Some(2000), "{}"),
            LlmError::RateLimited { retry_after_ms: Some(2000) }
        ));
        assert!(matches!(
            status_error(
                429,
                None,
                r#"{"error":{"message":"quota","type":"insufficient_quota"}}"#
            ),
            LlmError::Provider { .. }
        ));
        assert!(matches!(
            status_error(
                400,
                None,
                r#"{"error":{"message":"too long","code":"context_length_exceeded"}}"#
            ),
            LlmError::ContextLengthExceeded(m) if m == "too long"
        ));
        assert!(matches!(status_error(400, None, "bad"), LlmError::InvalidRequest(_)));
        assert!(matches!(
            status_error(503, None, r#"{"error":{"message":"Engine overloaded"}}"#),
            LlmError::Overloaded(_)
        ));
        assert!(matches!(
            status_error(502, None, "bad gateway"),
            LlmError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn test_empty_choices_is_error() {
        let wire: ChatCompletionResponse =
            serde_json::from_str(r#"{"id":"x","model":"m","choices":[]}"#).unwrap();
        assert!(matches!(into_completion(wire), Err(LlmError::Provider { .. })));
    }

    #[test]
    fn test_provider_name_from_config() {
        assert_eq!(provider("http://localhost/v1").name(), "openai");
    }

    #[tokio::test]
    async fn test_complete_success() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 200 OK",
            "",
            r#"{"id":"chatcmpl-1","model":"gpt-4o-mini-2024","choices":[{"index":0,"message":{"role":"assistant","content":"Hi!"},"finish_reason":"stop"}],"usage":{"prompt_tokens":12,"completion_tokens":3,"total_tokens":15}}"#,
        )
        .await;

        let response = provider(&base_url).complete(&request()).await.unwrap();
        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.content, "Hi!");
        assert_eq!(response.model, "gpt-4o-mini-2024");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 3);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /v1/chat/completions"));
        assert!(raw.to_ascii_lowercase().contains("authorization: bearer sk-test-not-real"));
    }

    #[tokio::test]
    async fn test_complete_rate_limited_reads_retry_after() {
        let (base_url, server) = serve_once(
            "HTTP/1.1 429 Too Many Requests",
            "retry-after: 3\r\n",
            r#"{"error":{"message":"slow down","type":"requests"}}"#,
        )
        .await;

        let err = provider(&base_url).complete(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::RateLimited { retry_after_ms: Some(3000) }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = provider(&format!("http://{addr}/v1"))
            .complete(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Network(_)));
    }
}
