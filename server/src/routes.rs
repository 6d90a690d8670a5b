//! HTTP routes.
//!
//! `POST /api/chat` runs one request through the orchestrator. Orchestration
//! always happens in a spawned task: a client that disconnects mid-request
//! never abandons a tool call halfway. With `stream: true` the response is a
//! server-sent event stream fed from that task.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

use relais_audit::InMemoryJournal;
use relais_contracts::{
    error::RelaisError,
    execution::ResponseEnvelope,
    request::{ChatRequest, RequestId},
};
use relais_core::{
    assembler::{assemble, ChatEvent},
    traits::AuditWriter,
    Orchestrator,
};

/// Request bodies above this size are refused as `InvalidRequest`.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Events buffered between the orchestration task and the SSE writer.
const EVENT_BUFFER: usize = 16;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/tools", get(tools))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ── Envelope response ────────────────────────────────────────────────────────

/// A finished envelope, sent with the status its response shape maps to.
pub struct EnvelopeResponse(pub ResponseEnvelope);

impl IntoResponse for EnvelopeResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.response.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

/// Envelope for a request that failed before orchestration started.
fn rejected(request_id: &RequestId, error: RelaisError) -> EnvelopeResponse {
    let journal = InMemoryJournal::new(request_id.to_string());
    let summary = journal.finalize(&request_id.to_string()).unwrap_or_default();
    EnvelopeResponse(assemble(request_id, Default::default(), None, summary, Err(error), Vec::new()))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn chat(State(state): State<AppState>, body: Result<Json<ChatRequest>, JsonRejection>) -> Response {
    let request_id = RequestId::new();

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(request_id = %request_id, status = %rejection.status(), "chat body rejected");
            let error = RelaisError::InvalidRequest { reason: rejection.body_text(), field: None };
            return rejected(&request_id, error).into_response();
        }
    };

    if request.stream {
        stream(state, request_id, request).into_response()
    } else {
        buffered(state, request_id, request).await.into_response()
    }
}

async fn buffered(state: AppState, request_id: RequestId, request: ChatRequest) -> EnvelopeResponse {
    let task_id = request_id.clone();
    let task = tokio::spawn(async move {
        let journal = InMemoryJournal::new(task_id.to_string());
        state.orchestrator.handle(&task_id, request, &journal, None).await
    });

    match task.await {
        Ok(envelope) => EnvelopeResponse(envelope),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "orchestration task failed");
            rejected(
                &request_id,
                RelaisError::Internal { reason: format!("orchestration task failed: {e}") },
            )
        }
    }
}

fn stream(
    state: AppState,
    request_id: RequestId,
    request: ChatRequest,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let journal = InMemoryJournal::new(request_id.to_string());
        state.orchestrator.handle(&request_id, request, &journal, Some(&tx)).await;
    });

    let events = ReceiverStream::new(rx).map(|event| Ok(to_sse(event)));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse(event: ChatEvent) -> Event {
    let name = event.name();
    let encoded = match &event {
        ChatEvent::ToolResult(executed) => Event::default().event(name).json_data(executed),
        ChatEvent::Done(envelope) => Event::default().event(name).json_data(envelope),
    };
    encoded.unwrap_or_else(|e| {
        error!(event = name, error = %e, "event serialization failed");
        Event::default().event("error").data("internal error")
    })
}

#[derive(Debug, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub mutates: bool,
    pub destructive: bool,
}

async fn tools(State(state): State<AppState>) -> Json<Vec<ToolSummary>> {
    let summaries = state
        .orchestrator
        .validator()
        .definitions()
        .into_iter()
        .map(|definition| ToolSummary {
            name: definition.name.clone(),
            description: definition.description.clone(),
            mutates: definition.mutates,
            destructive: definition.destructive,
        })
        .collect();
    Json(summaries)
}

async fn health() -> &'static str {
    "OK"
}
