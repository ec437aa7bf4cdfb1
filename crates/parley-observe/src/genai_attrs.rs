//! OpenTelemetry GenAI semantic-convention attribute names.
//!
//! Used as field names on completion spans so that exported traces carry
//! the standard request and usage attributes.

/// The name of the operation being performed (e.g., "chat").
pub const GEN_AI_OPERATION_NAME: &str = "gen_ai.operation.name";

/// The provider the request is sent to (e.g., "openai").
pub const GEN_AI_PROVIDER_NAME: &str = "gen_ai.provider.name";

pub const GEN_AI_REQUEST_MODEL: &str = "gen_ai.request.model";

pub const GEN_AI_REQUEST_MAX_TOKENS: &str = "gen_ai.request.max_tokens";

/// Model that actually served the request, as reported by the provider.
pub const GEN_AI_RESPONSE_MODEL: &str = "gen_ai.response.model";

pub const GEN_AI_RESPONSE_ID: &str = "gen_ai.response.id";

/// Finish reason of the first choice (e.g., "stop", "length").
pub const GEN_AI_RESPONSE_FINISH_REASONS: &str = "gen_ai.response.finish_reasons";

pub const GEN_AI_USAGE_INPUT_TOKENS: &str = "gen_ai.usage.input_tokens";

pub const GEN_AI_USAGE_OUTPUT_TOKENS: &str = "gen_ai.usage.output_tokens";

// --- Operation name values ---

/// Chat completion.
pub const OP_CHAT: &str = "chat";

// --- Provider name values ---

pub const PROVIDER_OPENAI: &str = "openai";
