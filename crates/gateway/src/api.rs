//! The authenticated `/api` surface: documents, chats, selection, and the
//! streaming send endpoint.
//!
//! Uploads arrive as JSON with base64 file bytes; responses are DTOs that
//! never expose raw domain types. Destructive deletes require an explicit
//! `confirm=true` query parameter.

use crate::{GatewayState, LOCAL_USER, SharedState};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{delete, get, post},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use docuchat_context::selection::{ToggleOutcome, Usage};
use docuchat_core::document::{Document, DocumentId};
use docuchat_core::error::{Error, ProviderError, SessionError, StoreError};
use docuchat_core::message::{ChatId, Message, Role};
use docuchat_ingest::{Ingestor, Upload};
use docuchat_session::{ChatSession, Phase};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Build the `/api` router. Nest under "/api" with the auth middleware
/// applied.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/documents", post(upload_document_handler))
        .route("/documents", get(list_documents_handler))
        .route("/documents/{id}", delete(delete_document_handler))
        .route("/chats", post(create_chat_handler))
        .route("/chats", get(list_chats_handler))
        .route("/chats/{id}", get(get_chat_handler))
        .route("/chats/{id}", delete(delete_chat_handler))
        .route("/chats/{id}/selection", post(toggle_selection_handler))
        .route("/chats/{id}/usage", get(usage_handler))
        .route("/chats/{id}/messages", post(send_message_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map domain errors to HTTP status codes.
fn map_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Session(SessionError::Busy) => StatusCode::CONFLICT,
        Error::Session(SessionError::EmptyMessage) => StatusCode::BAD_REQUEST,
        Error::Session(_) => StatusCode::BAD_REQUEST,
        Error::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
        Error::Ingest(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Provider(ProviderError::NotConfigured(_)) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Provider(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e.to_string())
}

#[derive(Deserialize)]
struct UploadRequest {
    name: String,
    media_type: String,
    /// Base64-encoded file bytes.
    data: String,
}

#[derive(Serialize, Deserialize)]
struct DocumentDto {
    id: String,
    name: String,
    media_type: String,
    size_bytes: u64,
    summary: String,
    created_at: String,
}

impl From<&Document> for DocumentDto {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.to_string(),
            name: doc.name.clone(),
            media_type: doc.media_type.clone(),
            size_bytes: doc.size_bytes,
            summary: doc.summary.clone(),
            created_at: doc.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DocumentListResponse {
    documents: Vec<DocumentDto>,
}

#[derive(Serialize, Deserialize)]
struct ChatCreatedResponse {
    id: String,
}

#[derive(Serialize, Deserialize)]
struct ChatSummaryDto {
    id: String,
    title: String,
    updated_at: String,
}

#[derive(Serialize, Deserialize)]
struct ChatListResponse {
    chats: Vec<ChatSummaryDto>,
}

#[derive(Serialize, Deserialize)]
struct MessageDto {
    role: String,
    content: String,
    created_at: String,
}

impl From<&Message> for MessageDto {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.as_str().into(),
            content: msg.content.clone(),
            created_at: msg.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ChatDetailResponse {
    id: String,
    messages: Vec<MessageDto>,
    document_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ToggleRequest {
    document_id: String,
}

#[derive(Serialize, Deserialize)]
struct UsageDto {
    used: usize,
    budget: usize,
    level: String,
}

impl From<Usage> for UsageDto {
    fn from(u: Usage) -> Self {
        Self {
            used: u.used,
            budget: u.budget,
            level: match u.level {
                docuchat_context::UsageLevel::Normal => "normal".into(),
                docuchat_context::UsageLevel::Warning => "warning".into(),
                docuchat_context::UsageLevel::Critical => "critical".into(),
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ToggleResponse {
    selected: Vec<String>,
    rejected: bool,
    /// Present only on rejection: the total that selecting would have
    /// produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    would_total: Option<usize>,
    usage: UsageDto,
}

#[derive(Deserialize)]
struct ConfirmQuery {
    #[serde(default)]
    confirm: bool,
}

#[derive(Deserialize)]
struct SendRequest {
    message: String,
}

/// One SSE frame of a streaming send.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamFrame {
    /// A fragment of the growing assistant turn.
    Delta { text: String },
    /// The turn finished; `message` is the complete assistant text.
    Done { message: String },
    /// The turn failed; the transcript carries a matching error turn.
    Error { message: String },
}

impl StreamFrame {
    fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Delta { .. } => "delta",
            StreamFrame::Done { .. } => "done",
            StreamFrame::Error { .. } => "error",
        }
    }
}

// ── Documents ─────────────────────────────────────────────────────────────

async fn upload_document_handler(
    State(state): State<SharedState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<DocumentDto>), ApiError> {
    let bytes = BASE64
        .decode(&req.data)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid base64 data: {e}")))?;

    info!(file = %req.name, size = bytes.len(), "Upload received");

    let ingestor = Ingestor::new(state.provider.clone(), &state.config.summary_model);
    let doc = ingestor
        .ingest(
            LOCAL_USER,
            Upload {
                name: req.name,
                media_type: req.media_type,
                bytes,
            },
        )
        .await
        .map_err(map_error)?;

    state
        .store
        .insert_document(&doc)
        .await
        .map_err(|e| map_error(e.into()))?;

    Ok((StatusCode::CREATED, Json(DocumentDto::from(&doc))))
}

async fn list_documents_handler(
    State(state): State<SharedState>,
) -> Result<Json<DocumentListResponse>, ApiError> {
    let docs = state
        .store
        .list_documents(LOCAL_USER)
        .await
        .map_err(|e| map_error(e.into()))?;

    Ok(Json(DocumentListResponse {
        documents: docs.iter().map(DocumentDto::from).collect(),
    }))
}

async fn delete_document_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Result<StatusCode, ApiError> {
    if !query.confirm {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Deletion requires confirm=true",
        ));
    }

    let deleted = state
        .store
        .delete_document(&DocumentId::from(&id))
        .await
        .map_err(|e| map_error(e.into()))?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("No document {id}")))
    }
}

// ── Chats ─────────────────────────────────────────────────────────────────

async fn create_chat_handler(
    State(state): State<SharedState>,
) -> (StatusCode, Json<ChatCreatedResponse>) {
    let session = Arc::new(ChatSession::new(
        state.store.clone(),
        state.provider.clone(),
        &state.config.chat_model,
        state.config.context_budget,
        LOCAL_USER,
    ));
    let id = session.chat_id().clone();

    state.sessions.write().await.insert(id.clone(), session);
    debug!(chat = %id, "Chat session created");

    (
        StatusCode::CREATED,
        Json(ChatCreatedResponse { id: id.to_string() }),
    )
}

async fn list_chats_handler(
    State(state): State<SharedState>,
) -> Result<Json<ChatListResponse>, ApiError> {
    let chats = state
        .store
        .list_chats(LOCAL_USER)
        .await
        .map_err(|e| map_error(e.into()))?;

    Ok(Json(ChatListResponse {
        chats: chats
            .iter()
            .map(|c| ChatSummaryDto {
                id: c.id.to_string(),
                title: c.title.clone(),
                updated_at: c.updated_at.to_rfc3339(),
            })
            .collect(),
    }))
}

async fn get_chat_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ChatDetailResponse>, ApiError> {
    let session = get_or_resume_session(&state, &ChatId::from(&id)).await?;

    Ok(Json(ChatDetailResponse {
        id,
        messages: session.messages().iter().map(MessageDto::from).collect(),
        document_ids: session.selection().iter().map(|d| d.to_string()).collect(),
    }))
}

async fn delete_chat_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<ConfirmQuery>,
) -> Result<StatusCode, ApiError> {
    if !query.confirm {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Deletion requires confirm=true",
        ));
    }

    let chat_id = ChatId::from(&id);
    let in_memory = state.sessions.write().await.remove(&chat_id).is_some();
    let in_store = state
        .store
        .delete_chat(&chat_id)
        .await
        .map_err(|e| map_error(e.into()))?;

    if in_memory || in_store {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(StatusCode::NOT_FOUND, format!("No chat {id}")))
    }
}

// ── Selection & usage ─────────────────────────────────────────────────────

async fn toggle_selection_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let session = get_or_resume_session(&state, &ChatId::from(&id)).await?;
    let documents = state
        .store
        .list_documents(LOCAL_USER)
        .await
        .map_err(|e| map_error(e.into()))?;

    let outcome = session.toggle_document(&DocumentId::from(&req.document_id), &documents);
    let usage = session.usage(&documents);

    let (rejected, would_total) = match &outcome {
        ToggleOutcome::Rejected { would_total, .. } => (true, Some(*would_total)),
        _ => (false, None),
    };

    Ok(Json(ToggleResponse {
        selected: outcome.selection().iter().map(|d| d.to_string()).collect(),
        rejected,
        would_total,
        usage: usage.into(),
    }))
}

async fn usage_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<UsageDto>, ApiError> {
    let session = get_or_resume_session(&state, &ChatId::from(&id)).await?;
    let documents = state
        .store
        .list_documents(LOCAL_USER)
        .await
        .map_err(|e| map_error(e.into()))?;

    Ok(Json(session.usage(&documents).into()))
}

// ── Streaming send ────────────────────────────────────────────────────────

/// `POST /api/chats/{id}/messages` — send a user message, receive the
/// assistant response as an SSE stream of `delta` frames followed by one
/// `done` (or `error`) frame.
async fn send_message_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<SendRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Empty message"));
    }

    let session = get_or_resume_session(&state, &ChatId::from(&id)).await?;
    if session.subscribe().borrow().phase != Phase::Idle {
        return Err(api_error(
            StatusCode::CONFLICT,
            "A send is already in flight for this chat",
        ));
    }

    let documents = state
        .store
        .list_documents(LOCAL_USER)
        .await
        .map_err(|e| map_error(e.into()))?;

    let (tx, rx) = tokio::sync::mpsc::channel::<StreamFrame>(64);

    tokio::spawn(async move {
        let mut watch_rx = session.subscribe();
        let send_fut = session.send(&req.message, &documents);
        tokio::pin!(send_fut);

        let mut last_seen = String::new();
        loop {
            tokio::select! {
                result = &mut send_fut => {
                    let frame = match result {
                        Ok(message) => StreamFrame::Done { message },
                        Err(e) => StreamFrame::Error {
                            message: e.to_string(),
                        },
                    };
                    let _ = tx.send(frame).await;
                    break;
                }
                changed = watch_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let assistant_text = {
                        let snap = watch_rx.borrow_and_update();
                        snap.messages
                            .last()
                            .filter(|m| m.role == Role::Assistant)
                            .map(|m| m.content.clone())
                    };
                    if let Some(text) = assistant_text {
                        // Assistant turns only grow; a non-prefix change is
                        // the error turn replacing partial text
                        if let Some(delta) = text.strip_prefix(&last_seen) {
                            if !delta.is_empty() {
                                let _ = tx
                                    .send(StreamFrame::Delta {
                                        text: delta.to_string(),
                                    })
                                    .await;
                            }
                        }
                        last_seen = text;
                    }
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(|frame| {
        let name = frame.event_name();
        let data = serde_json::to_string(&frame).unwrap_or_default();
        Ok(SseEvent::default().event(name).data(data))
    });

    Ok(Sse::new(stream))
}

// ── Session lookup ────────────────────────────────────────────────────────

/// Find a live session, or resume a persisted chat into one.
async fn get_or_resume_session(
    state: &GatewayState,
    chat_id: &ChatId,
) -> Result<Arc<ChatSession>, ApiError> {
    if let Some(session) = state.sessions.read().await.get(chat_id) {
        return Ok(session.clone());
    }

    let exists = state
        .store
        .chat_exists(chat_id)
        .await
        .map_err(|e| map_error(e.into()))?;
    if !exists {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("No chat {chat_id}"),
        ));
    }

    let session = Arc::new(
        ChatSession::resume(
            state.store.clone(),
            state.provider.clone(),
            &state.config.chat_model,
            state.config.context_budget,
            LOCAL_USER,
            chat_id.clone(),
        )
        .await
        .map_err(map_error)?,
    );

    let mut sessions = state.sessions.write().await;
    // A concurrent request may have resumed it first; keep theirs
    let entry = sessions
        .entry(chat_id.clone())
        .or_insert_with(|| session.clone());
    Ok(entry.clone())
}

// ── Tests ─────────────────────────────────────────────────────────────────
