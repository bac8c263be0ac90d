//! HTTP surface for DocChat.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /documents?file_name=<name>` – Store a raw PDF body and return its key and URL.
//! - `POST /documents/ingest` – Extract, split, embed, and index a stored PDF.
//! - `DELETE /documents` – Remove a document's blob and vectors.
//! - `POST /context` – Return the page text most relevant to a query.
//! - `POST /chat` – Stream a grounded answer as server-sent events.
//! - `POST /notes/assist` – Answer a question about text selected in a note.
//! - `GET /metrics` – Observe ingestion and retrieval counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.
//!
//! Every request gets its own cancellation token, cancelled when the handler (or, for `/chat`,
//! the response stream) is dropped because the client went away.

use crate::chat::ChatMessage;
use crate::ingest::IngestionReport;
use crate::service::{DeletionReport, DocChatApi, ServiceError, UploadReceipt};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Build the HTTP router exposing the document chat API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DocChatApi + 'static,
{
    Router::new()
        .route(
            "/documents",
            post(upload_document::<S>)
                .delete(delete_document::<S>)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/ingest", post(ingest_document::<S>))
        .route("/context", post(get_context::<S>))
        .route("/chat", post(chat::<S>))
        .route("/notes/assist", post(assist_note::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Token cancelled when the returned guard is dropped.
fn request_token() -> (CancellationToken, DropGuard) {
    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    (cancel, guard)
}

/// Query string for `POST /documents`.
#[derive(Deserialize)]
struct UploadParams {
    /// Original file name, used to derive the storage key.
    file_name: String,
}

/// Store the raw request body as a PDF blob.
async fn upload_document<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<UploadReceipt>, AppError>
where
    S: DocChatApi,
{
    let receipt = service
        .upload_document(body.to_vec(), &params.file_name)
        .await?;
    Ok(Json(receipt))
}

/// Request body naming a stored document.
#[derive(Deserialize)]
struct DocumentRequest {
    file_key: String,
}

/// Ingest a stored document into its namespace.
async fn ingest_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<DocumentRequest>,
) -> Result<Json<IngestionReport>, AppError>
where
    S: DocChatApi,
{
    let (cancel, _guard) = request_token();
    let report = service.ingest_document(&request.file_key, &cancel).await?;
    Ok(Json(report))
}

/// Remove a document's blob and namespace. Always answers 200; failures are in the report.
async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<DocumentRequest>,
) -> Json<DeletionReport>
where
    S: DocChatApi,
{
    let report = service.delete_document(&request.file_key).await;
    tracing::info!(
        file_key = %request.file_key,
        blob_deleted = report.blob.deleted,
        namespace_deleted = report.namespace_deleted,
        "Delete request completed"
    );
    Json(report)
}

/// Request body for `POST /context`.
#[derive(Deserialize)]
struct ContextRequest {
    query: String,
    file_key: String,
}

/// Response body for `POST /context`.
#[derive(Serialize)]
struct ContextResponse {
    context: String,
}

/// Return the assembled context for a query.
async fn get_context<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError>
where
    S: DocChatApi,
{
    let (cancel, _guard) = request_token();
    let context = service
        .context_for(&request.query, &request.file_key, &cancel)
        .await?;
    Ok(Json(ContextResponse { context }))
}

/// Request body for `POST /chat`.
#[derive(Deserialize)]
struct ChatRequest {
    file_key: String,
    messages: Vec<ChatMessage>,
}

/// Stream a grounded answer. Each text fragment is one `data:` event; a failure mid-stream ends
/// the stream with an `error` event.
async fn chat<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, AppError>
where
    S: DocChatApi,
{
    let (cancel, guard) = request_token();
    let answer = service
        .chat_stream(&request.file_key, request.messages, cancel)
        .await?;
    let file_key = request.file_key;

    let events = answer.map(move |piece| {
        // cancels the completion once the client drops the body
        let _guard = &guard;
        let event = match piece {
            // SSE cannot carry carriage returns
            Ok(text) => Event::default().data(text.replace('\r', "")),
            Err(error) => {
                tracing::error!(file_key = %file_key, error = %error, "Chat stream failed");
                Event::default().event("error").data(GENERIC_FAILURE)
            }
        };
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// Request body for `POST /notes/assist`.
#[derive(Deserialize)]
struct NoteAssistRequest {
    selected_text: String,
    file_key: String,
}

/// Response body for `POST /notes/assist`.
#[derive(Serialize)]
struct NoteAssistResponse {
    answer: String,
}

/// Answer a question about selected note text.
async fn assist_note<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<NoteAssistRequest>,
) -> Result<Json<NoteAssistResponse>, AppError>
where
    S: DocChatApi,
{
    let (cancel, _guard) = request_token();
    let answer = service
        .assist_note(&request.selected_text, &request.file_key, &cancel)
        .await?;
    Ok(Json(NoteAssistResponse { answer }))
}

/// Return the current counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Response
where
    S: DocChatApi,
{
    Json(service.metrics_snapshot()).into_response()
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/documents?file_name=<name>",
                description: "Store a raw PDF request body. Response returns { \"file_key\", \"file_name\", \"url\" }.",
                request_example: None,
            },
            CommandDescriptor {
                name: "ingest",
                method: "POST",
                path: "/documents/ingest",
                description: "Extract, chunk, embed, and index a stored PDF into its own namespace.",
                request_example: Some(json!({ "file_key": "uploads/1718000000000manual.pdf" })),
            },
            CommandDescriptor {
                name: "delete",
                method: "DELETE",
                path: "/documents",
                description: "Remove a document blob and its namespace; both are attempted independently.",
                request_example: Some(json!({ "file_key": "uploads/1718000000000manual.pdf" })),
            },
            CommandDescriptor {
                name: "context",
                method: "POST",
                path: "/context",
                description: "Return page text relevant to a query, best match first.",
                request_example: Some(json!({
                    "query": "How long is the warranty?",
                    "file_key": "uploads/1718000000000manual.pdf"
                })),
            },
            CommandDescriptor {
                name: "chat",
                method: "POST",
                path: "/chat",
                description: "Stream an answer grounded in the document as text/event-stream.",
                request_example: Some(json!({
                    "file_key": "uploads/1718000000000manual.pdf",
                    "messages": [{ "role": "user", "content": "How long is the warranty?" }]
                })),
            },
            CommandDescriptor {
                name: "note_assist",
                method: "POST",
                path: "/notes/assist",
                description: "Answer a question about selected note text using the document.",
                request_example: Some(json!({
                    "selected_text": "Summarize the battery section",
                    "file_key": "uploads/1718000000000manual.pdf"
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion and retrieval counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

const GENERIC_FAILURE: &str = "something went wrong, please try again";
const INGEST_FAILURE: &str = "could not process file, try again";

struct AppError(ServiceError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ServiceError::InvalidRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            ServiceError::Ingest(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, INGEST_FAILURE.to_string())
            }
            ServiceError::Upload(_) | ServiceError::Context(_) | ServiceError::Chat(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE.to_string())
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        } else {
            tracing::warn!(error = %self.0, "Request rejected");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(inner: ServiceError) -> Self {
        Self(inner)
    }
}
