//! Response assembly and streaming events.
//!
//! A request ends in exactly one [`ResponseEnvelope`]. In streaming mode the
//! same envelope is the terminal event, preceded by one event per executed
//! tool call.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, warn};

use relais_contracts::{
    context::ContextId,
    error::RelaisResult,
    execution::{ChatResponse, ExecutedCall, JournalSummary, ResponseEnvelope},
    mode::Mode,
    request::RequestId,
};

/// One server-sent event.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A tool call finished executing.
    ToolResult(ExecutedCall),
    /// The final response; nothing follows it.
    Done(ResponseEnvelope),
}

impl ChatEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::ToolResult(_) => "tool_result",
            ChatEvent::Done(envelope) => envelope.response.kind(),
        }
    }
}

pub type EventSink = mpsc::Sender<ChatEvent>;

/// Send an event if anyone is listening, waiting at most `wait` for room.
///
/// A closed receiver means the client went away; a full one past `wait`
/// means it stopped reading. Either way the event is dropped and the
/// request still runs to completion, so in-flight mutations are not
/// abandoned halfway.
pub async fn emit(events: Option<&EventSink>, event: ChatEvent, wait: Duration) {
    if let Some(sink) = events {
        let name = event.name();
        match sink.send_timeout(event, wait).await {
            Ok(()) => {}
            Err(SendTimeoutError::Closed(_)) => {
                debug!(event = name, "event receiver closed, dropping event");
            }
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(event = name, wait_ms = wait.as_millis() as u64, "event stream stalled, dropping event");
            }
        }
    }
}

/// Build the envelope for a finished request.
///
/// `executed` lists calls that already ran when `outcome` is an error; the
/// error shape carries them so no committed change goes unreported.
pub fn assemble(
    request_id: &RequestId,
    mode: Mode,
    context: Option<ContextId>,
    journal: JournalSummary,
    outcome: RelaisResult<ChatResponse>,
    executed: Vec<ExecutedCall>,
) -> ResponseEnvelope {
    let response = match outcome {
        Ok(response) => response,
        Err(err) => ChatResponse::from_error_after(&err, executed),
    };

    ResponseEnvelope {
        request_id: request_id.to_string(),
        mode,
        context_id: context,
        journal,
        response,
    }
}

/// Empty model text carries no information; drop it from the response.
pub(crate) fn non_empty(content: String) -> Option<String> {
    if content.trim().is_empty() {
        None
    } else {
        Some(content)
    }
}
