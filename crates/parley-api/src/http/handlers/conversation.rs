//! Conversation HTTP handlers.
//!
//! Endpoints:
//! - POST /api/v1/conversations          - Start a conversation
//! - POST /api/v1/conversations/continue - Continue by id or session metadata
//! - GET  /api/v1/conversations          - List recent conversations
//! - GET  /api/v1/conversations/{id}     - Get a conversation with its turns

use axum::Json;
use axum::extract::{Path, Query, State};
use parley_core::chat::{ContinueRequest, ContinuedConversation, StartedConversation};
use parley_types::conversation::Conversation;
use parley_types::session::SessionIdentity;
use serde::Deserialize;
use uuid::Uuid;

use crate::http::error::AppError;
use crate::http::handlers::with_deadline;
use crate::http::response::{ApiResponse, RequestClock};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StartConversationBody {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ContinueConversationBody {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Identity of the external chat the message came from.
    #[serde(default)]
    pub session_metadata: Option<SessionIdentity>,
    pub message: String,
}

impl From<ContinueConversationBody> for ContinueRequest {
    fn from(body: ContinueConversationBody) -> Self {
        ContinueRequest {
            conversation_id: body.conversation_id,
            identity: body.session_metadata,
            message: body.message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConversationListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

/// POST /api/v1/conversations - Start a conversation.
pub async fn start_conversation(
    State(state): State<AppState>,
    Json(body): Json<StartConversationBody>,
) -> Result<Json<ApiResponse<StartedConversation>>, AppError> {
    let clock = RequestClock::start();

    let service = &state.chat_service;
    let started = with_deadline(&state, |cancel| async move {
        service.start_conversation(&body.message, &cancel).await
    })
    .await?;

    let link = format!("/api/v1/conversations/{}", started.conversation_id);
    Ok(Json(clock.success(started).with_link("self", &link)))
}

/// POST /api/v1/conversations/continue - Add a message to a conversation.
pub async fn continue_conversation(
    State(state): State<AppState>,
    Json(body): Json<ContinueConversationBody>,
) -> Result<Json<ApiResponse<ContinuedConversation>>, AppError> {
    let clock = RequestClock::start();
    let request = ContinueRequest::from(body);

    let service = &state.chat_service;
    let continued = with_deadline(&state, |cancel| async move {
        service.continue_conversation(request, &cancel).await
    })
    .await?;

    let link = format!("/api/v1/conversations/{}", continued.conversation_id);
    Ok(Json(clock.success(continued).with_link("self", &link)))
}

/// GET /api/v1/conversations - List conversations, most recently active first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ConversationListQuery>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, AppError> {
    let clock = RequestClock::start();

    let service = &state.chat_service;
    let conversations = with_deadline(&state, |_| async move {
        service.list_conversations(query.limit).await
    })
    .await?;

    Ok(Json(
        clock
            .success(conversations)
            .with_link("self", "/api/v1/conversations"),
    ))
}

/// GET /api/v1/conversations/{id} - Get a conversation with its turns.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Conversation>>, AppError> {
    let clock = RequestClock::start();
    let id = parse_uuid(&id)?;

    let service = &state.chat_service;
    let conversation = with_deadline(&state, |_| async move {
        service.describe_conversation(&id).await
    })
    .await?;

    let link = format!("/api/v1/conversations/{id}");
    Ok(Json(clock.success(conversation).with_link("self", &link)))
}
