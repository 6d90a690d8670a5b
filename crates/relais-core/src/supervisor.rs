//! Timeout and retry supervision for collaborator calls.
//!
//! Model calls get a timeout and exactly one retry on a transient failure.
//! A timed-out model call is not retried: the user has already waited the
//! full timeout once. Tool calls get a timeout and are never retried, since
//! repeating a mutation is not safe.
//!
//! Every call is also capped by the request [`Deadline`]. When the deadline
//! is what cut a call short, the error is `DeadlineExceeded` rather than the
//! call's own timeout code.

use std::time::Duration;

use serde_json::Value;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use relais_contracts::error::{RelaisError, RelaisResult};

use crate::{
    model::{ModelError, ModelReply, ModelRequest, ToolFailure},
    traits::{LanguageModel, ToolHandler},
};

// ── Deadline ─────────────────────────────────────────────────────────────────

/// Wall-clock budget for one request, shared by every call it makes.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self { expires_at: Instant::now() + budget, budget }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    pub fn exceeded(&self) -> RelaisError {
        RelaisError::DeadlineExceeded { deadline_ms: millis(self.budget) }
    }

    /// The effective timeout for a call limited to `limit`, and whether the
    /// deadline (rather than `limit`) is the binding constraint.
    fn cap(&self, limit: Duration) -> RelaisResult<(Duration, bool)> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(self.exceeded());
        }
        if remaining < limit {
            Ok((remaining, true))
        } else {
            Ok((limit, false))
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ── Supervisor ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    /// Pause before the single transient-failure retry.
    pub retry_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(15),
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Call the model under timeout, retrying once on a transient failure.
    ///
    /// Errors: `UpstreamTimeout`, `UpstreamUnavailable`, `DeadlineExceeded`.
    pub async fn call_model(
        &self,
        model: &dyn LanguageModel,
        request: &ModelRequest,
        deadline: &Deadline,
    ) -> RelaisResult<ModelReply> {
        let limit = self.settings.model_timeout;
        let mut attempt: u32 = 1;

        loop {
            let (budget, deadline_bound) = deadline.cap(limit)?;
            let started = Instant::now();

            let outcome = timeout(budget, model.complete(request)).await;
            let elapsed_ms = millis(started.elapsed());

            match outcome {
                Ok(Ok(reply)) => {
                    debug!(
                        attempt,
                        elapsed_ms,
                        tool_calls = reply.tool_calls.len(),
                        "model call completed"
                    );
                    return Ok(reply);
                }

                Err(_) if deadline_bound => {
                    warn!(attempt, elapsed_ms, "request deadline hit during model call");
                    return Err(deadline.exceeded());
                }

                Err(_) => {
                    warn!(attempt, elapsed_ms, timeout_ms = millis(limit), "model call timed out");
                    return Err(RelaisError::UpstreamTimeout { timeout_ms: millis(limit) });
                }

                Ok(Err(ModelError::Transient(reason))) if attempt == 1 => {
                    warn!(attempt, elapsed_ms, reason = %reason, "transient model failure, retrying once");
                    let pause = self.settings.retry_delay.min(deadline.remaining());
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }

                Ok(Err(ModelError::Transient(reason))) => {
                    warn!(attempt, elapsed_ms, reason = %reason, "model failed again after retry");
                    return Err(RelaisError::UpstreamUnavailable {
                        reason: "model failed after one retry".to_string(),
                    });
                }

                Ok(Err(ModelError::Rejected { status, message })) => {
                    warn!(attempt, status, message = %message, "model rejected the request");
                    return Err(RelaisError::UpstreamUnavailable {
                        reason: format!("model rejected the request with status {status}"),
                    });
                }
            }
        }
    }

    /// Call a tool handler under timeout. Never retried.
    ///
    /// The inner `Result` is the handler's own outcome; a `ToolFailure` is a
    /// business failure, not an orchestration error.
    ///
    /// Errors: `ToolTimeout`, `DeadlineExceeded`.
    pub async fn call_tool(
        &self,
        tool: &str,
        handler: &dyn ToolHandler,
        arguments: &Value,
        deadline: &Deadline,
    ) -> RelaisResult<Result<Value, ToolFailure>> {
        let limit = self.settings.tool_timeout;
        let (budget, deadline_bound) = deadline.cap(limit)?;
        let started = Instant::now();

        let outcome = timeout(budget, handler.call(arguments)).await;
        let elapsed_ms = millis(started.elapsed());

        match outcome {
            Ok(result) => {
                debug!(tool, elapsed_ms, ok = result.is_ok(), "tool call completed");
                Ok(result)
            }
            Err(_) if deadline_bound => {
                warn!(tool, elapsed_ms, "request deadline hit during tool call");
                Err(deadline.exceeded())
            }
            Err(_) => {
                warn!(tool, elapsed_ms, timeout_ms = millis(limit), "tool call timed out");
                Err(RelaisError::ToolTimeout {
                    tool: tool.to_string(),
                    timeout_ms: millis(limit),
                })
            }
        }
    }
}
