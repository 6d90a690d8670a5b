//! The relais orchestrator: the validation-gated tool-calling loop.
//!
//! Every proposed tool call goes through the same pipeline:
//!
//!   Model → Validate → Guard → Gate → [Dispatch] → Harvest → Journal
//!
//! The security invariant is absolute: a `ToolHandler` is NEVER invoked
//! unless the call passed validation, the safety guard (for mutations) and
//! the gate returned `Execute`. The dispatch call site is only reachable
//! after all three.
//!
//! A model reply is admitted as a whole. Every call in it is validated,
//! guarded and gated before the first one is dispatched: one refused call
//! refuses the reply, and one held call holds it. Identifiers a read
//! surfaces therefore vouch for writes in later replies, not in its own.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use relais_contracts::{
    context::ContextId,
    error::{ReasonCode, RelaisError, RelaisResult},
    execution::{ChatResponse, Decision, DecisionRecord, ExecutedCall, PlannedCall, ResponseEnvelope},
    known::{KnownEntity, KnownEntityIdSet},
    mode::{GateVerdict, Mode},
    request::{ChatRequest, RequestId, RequestLimits},
    tool::{ToolCall, ToolDefinition, ValidatedCall},
};

use crate::{
    assembler::{assemble, emit, non_empty, ChatEvent, EventSink},
    dispatcher::ToolDispatcher,
    model::{ModelReply, ModelRequest, ModelTurn, ToolSpec},
    supervisor::{Deadline, Supervisor},
    traits::{AuditWriter, CallValidator, ConfirmationGate, LanguageModel, SafetyGuard},
};

/// How long the terminal event may wait for a slow stream reader once the
/// request deadline is spent.
const TERMINAL_EVENT_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub limits: RequestLimits,
    /// Model round-trips allowed per request.
    pub max_iterations: usize,
    pub request_deadline: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            limits: RequestLimits::default(),
            max_iterations: 6,
            request_deadline: Duration::from_secs(60),
        }
    }
}

/// Drives one chat request from the user's message to a single response.
///
/// The orchestrator is shared across requests. Per-request state (the known
/// id set, the transcript, the journal) lives on the stack of `handle()`.
pub struct Orchestrator {
    model: Arc<dyn LanguageModel>,
    validator: Arc<dyn CallValidator>,
    guard: Arc<dyn SafetyGuard>,
    gate: Arc<dyn ConfirmationGate>,
    dispatcher: ToolDispatcher,
    supervisor: Supervisor,
    settings: OrchestratorSettings,
}

/// A call that cleared validation and, for mutations, the safety guard.
struct Admitted<'a> {
    call: ValidatedCall,
    definition: &'a ToolDefinition,
    attested: Vec<KnownEntity>,
}

/// Per-request pieces every stage needs.
struct Scope<'r> {
    request_id: &'r RequestId,
    mode: Mode,
    context: Option<&'r ContextId>,
    journal: &'r dyn AuditWriter,
    events: Option<&'r EventSink>,
    deadline: Deadline,
}

impl Orchestrator {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        validator: Arc<dyn CallValidator>,
        guard: Arc<dyn SafetyGuard>,
        gate: Arc<dyn ConfirmationGate>,
        dispatcher: ToolDispatcher,
        supervisor: Supervisor,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { model, validator, guard, gate, dispatcher, supervisor, settings }
    }

    pub fn validator(&self) -> &dyn CallValidator {
        self.validator.as_ref()
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Process one request and return its envelope.
    ///
    /// Never fails: every error becomes the `error` response shape. When
    /// `events` is set, each executed call is emitted as it completes and the
    /// envelope is emitted last.
    pub async fn handle(
        &self,
        request_id: &RequestId,
        request: ChatRequest,
        journal: &dyn AuditWriter,
        events: Option<&EventSink>,
    ) -> ResponseEnvelope {
        let mode = request.mode();
        let deadline = Deadline::after(self.settings.request_deadline);

        info!(
            request_id = %request_id,
            mode = %mode,
            confirmed = request.confirmed_action,
            history = request.history.len(),
            "chat request received"
        );

        // Calls that ran before a later failure; reported with the error.
        let mut executed = Vec::new();

        let (context, outcome) = match self.resolve(&request) {
            Ok(context) => {
                let scope = Scope {
                    request_id,
                    mode,
                    context: context.as_ref(),
                    journal,
                    events,
                    deadline,
                };
                let outcome = self.run(&scope, &request, &mut executed).await;
                (context, outcome)
            }
            Err(err) => (None, Err(err)),
        };

        match &outcome {
            Ok(response) => {
                info!(request_id = %request_id, response = response.kind(), "chat request completed");
            }
            Err(err) if err.code().is_caller_correctable() => {
                info!(request_id = %request_id, code = %err.code(), error = %err, "chat request rejected");
            }
            Err(err) => {
                warn!(
                    request_id = %request_id,
                    code = %err.code(),
                    error = %err,
                    executed = executed.len(),
                    "chat request failed"
                );
            }
        }

        let summary = journal.finalize(&request_id.to_string()).unwrap_or_else(|err| {
            warn!(request_id = %request_id, error = %err, "journal finalize failed");
            Default::default()
        });

        let envelope = assemble(request_id, mode, context, summary, outcome, executed);
        let wait = deadline.remaining().max(TERMINAL_EVENT_GRACE);
        emit(events, ChatEvent::Done(envelope.clone()), wait).await;
        envelope
    }

    // ── Context resolution ───────────────────────────────────────────────────

    fn resolve(&self, request: &ChatRequest) -> RelaisResult<Option<ContextId>> {
        request.check_shape(&self.settings.limits)?;
        ContextId::resolve(request.context_id.as_ref())
    }

    async fn run(
        &self,
        scope: &Scope<'_>,
        request: &ChatRequest,
        executed: &mut Vec<ExecutedCall>,
    ) -> RelaisResult<ChatResponse> {
        if request.confirmed_action {
            return self.run_confirmation(scope, request).await;
        }

        let mut known = KnownEntityIdSet::from_context(scope.context);
        let mut transcript = ModelRequest {
            context: scope.context.cloned(),
            mode: scope.mode,
            turns: request
                .history
                .iter()
                .map(ModelTurn::from)
                .chain(std::iter::once(ModelTurn::User { content: request.message.clone() }))
                .collect(),
            tools: self.validator.definitions().into_iter().map(ToolSpec::from).collect(),
        };
        let mut iteration = 0;

        loop {
            iteration += 1;

            // ── Step 1: Ask the model ────────────────────────────────────────
            let reply = self
                .supervisor
                .call_model(self.model.as_ref(), &transcript, &scope.deadline)
                .await?;

            debug!(
                request_id = %scope.request_id,
                iteration,
                tool_calls = reply.tool_calls.len(),
                "model replied"
            );

            if reply.tool_calls.is_empty() {
                return Ok(finish(std::mem::take(executed), reply.content));
            }

            // ── Plan mode: describe, never execute ───────────────────────────
            if scope.mode == Mode::Plan {
                return self.describe(scope, reply);
            }

            let ModelReply { content, tool_calls } = reply;
            transcript.turns.push(ModelTurn::Assistant {
                content: content.clone(),
                tool_calls: tool_calls.clone(),
            });

            // ── Steps 2 & 3: Validation and safety guard, whole reply ────────
            let mut admitted = Vec::with_capacity(tool_calls.len());
            for (index, call) in tool_calls.iter().enumerate() {
                match self.admit(scope, call, &known) {
                    Ok(entry) => admitted.push(entry),
                    Err(err) => {
                        settle(scope.journal, &tool_calls, index, Decision::Rejected, Some(err.code()))?;
                        return Err(err);
                    }
                }
            }

            // ── Step 4: Gate, whole reply ────────────────────────────────────
            for (index, entry) in admitted.iter().enumerate() {
                match self.gate.decide(scope.mode, entry.definition) {
                    GateVerdict::Execute => {}

                    GateVerdict::Hold { reason } => {
                        info!(
                            request_id = %scope.request_id,
                            tool = %entry.call.name,
                            tool_call_id = %entry.call.id,
                            reason = %reason,
                            skipped = tool_calls.len() - 1,
                            "call held for confirmation"
                        );
                        let pending = self.gate.issue(&entry.call, entry.attested.clone())?;
                        settle(scope.journal, &tool_calls, index, Decision::Held, None)?;
                        return Ok(ChatResponse::PendingConfirmation {
                            pending,
                            content: non_empty(content),
                            results: std::mem::take(executed),
                        });
                    }

                    GateVerdict::Describe => {
                        let err = RelaisError::Internal {
                            reason: format!("gate described a call in {} mode", scope.mode),
                        };
                        settle(scope.journal, &tool_calls, index, Decision::Rejected, Some(err.code()))?;
                        return Err(err);
                    }
                }
            }

            for (index, entry) in admitted.into_iter().enumerate() {
                // ── Step 5: Dispatch ─────────────────────────────────────────
                //
                // Only reachable once every call of the reply passed
                // validation, guard and gate.
                let done = match self.execute(scope, entry).await {
                    Ok(done) => done,
                    Err(err) => {
                        for later in &tool_calls[index + 1..] {
                            record(scope.journal, &later.id, &later.name, Decision::Skipped, None, None)?;
                        }
                        return Err(err);
                    }
                };

                // ── Step 6: Harvest ids from read results ────────────────────
                if let Some(definition) = self.validator.definition(&done.name) {
                    if definition.reads_entity_ids && done.result.success {
                        let before = known.len();
                        known.extend(self.guard.harvest(definition, &done.result));
                        debug!(
                            request_id = %scope.request_id,
                            tool = %done.name,
                            harvested = known.len() - before,
                            "entity ids observed"
                        );
                    }
                }

                transcript.turns.push(ModelTurn::Tool {
                    tool_call_id: done.tool_call_id.clone(),
                    name: done.name.clone(),
                    result: done.result.clone(),
                });
                executed.push(done);
            }

            if iteration >= self.settings.max_iterations {
                warn!(
                    request_id = %scope.request_id,
                    max_iterations = self.settings.max_iterations,
                    "iteration limit reached, returning partial results"
                );
                return Ok(finish(std::mem::take(executed), content));
            }
        }
    }

    // ── Confirmation path ────────────────────────────────────────────────────

    /// Execute a previously held call after the user approved it.
    ///
    /// The call is validated and guarded again from scratch; the token only
    /// proves the user saw exactly this call. No model round-trip happens.
    async fn run_confirmation(
        &self,
        scope: &Scope<'_>,
        request: &ChatRequest,
    ) -> RelaisResult<ChatResponse> {
        if scope.mode == Mode::Plan {
            return Err(RelaisError::ConfirmationMismatch {
                reason: "plan mode never executes calls".to_string(),
            });
        }

        let call = self
            .gate
            .redeem(request.confirmed_tool_call_id.as_deref(), request.pending_action.as_ref())?;

        let mut known = KnownEntityIdSet::from_context(scope.context);
        if let Some(pending) = &request.pending_action {
            known.extend(pending.attested_refs.iter().cloned());
        }

        let admitted = match self.admit(scope, &call, &known) {
            Ok(admitted) => admitted,
            Err(err) => {
                record(scope.journal, &call.id, &call.name, Decision::Rejected, Some(err.code()), None)?;
                return Err(err);
            }
        };

        // Spent at the moment execution is attempted, not before.
        if let Err(err) = self.gate.consume(&admitted.call.id) {
            record(scope.journal, &call.id, &call.name, Decision::Rejected, Some(err.code()), None)?;
            return Err(err);
        }

        info!(
            request_id = %scope.request_id,
            tool = %admitted.call.name,
            tool_call_id = %admitted.call.id,
            "executing confirmed call"
        );

        let done = self.execute(scope, admitted).await?;
        let content = done.result.message.clone();
        Ok(ChatResponse::ToolResults { results: vec![done], content: non_empty(content) })
    }

    // ── Stages ───────────────────────────────────────────────────────────────

    /// Validate a proposed call and, if it mutates, run the safety guard.
    ///
    /// Journaling the rejection is left to the caller.
    fn admit<'a>(
        &'a self,
        scope: &Scope<'_>,
        call: &ToolCall,
        known: &KnownEntityIdSet,
    ) -> RelaisResult<Admitted<'a>> {
        let admitted = self.validator.validate(call).and_then(|validated| {
            let definition =
                self.validator.definition(&validated.name).ok_or_else(|| RelaisError::Internal {
                    reason: format!("validated tool '{}' missing from catalogue", validated.name),
                })?;

            let attested = if definition.mutates {
                self.guard.check(definition, &validated, known, scope.context)?
            } else {
                Vec::new()
            };

            Ok(Admitted { call: validated, definition, attested })
        });

        match admitted {
            Ok(admitted) => Ok(admitted),
            Err(err) => {
                warn!(
                    request_id = %scope.request_id,
                    tool = %call.name,
                    tool_call_id = %call.id,
                    code = %err.code(),
                    error = %err,
                    "tool call rejected"
                );
                Err(err)
            }
        }
    }

    /// Dispatch an admitted call, journal the outcome and stream it.
    async fn execute(&self, scope: &Scope<'_>, admitted: Admitted<'_>) -> RelaisResult<ExecutedCall> {
        let call = admitted.call;

        let result = match self.dispatcher.dispatch(&call, &self.supervisor, &scope.deadline).await {
            Ok(result) => result,
            Err(err) => {
                record(scope.journal, &call.id, &call.name, Decision::Rejected, Some(err.code()), None)?;
                return Err(err);
            }
        };

        record(scope.journal, &call.id, &call.name, Decision::Executed, None, Some(result.success))?;

        let done = ExecutedCall {
            tool_call_id: call.id,
            name: call.name,
            arguments: call.arguments,
            result,
        };
        emit(scope.events, ChatEvent::ToolResult(done.clone()), scope.deadline.remaining()).await;
        Ok(done)
    }

    /// Plan mode: validate every proposed call and describe it.
    ///
    /// Only shape validation applies. Nothing is dispatched, so the guard
    /// and the gate have nothing to protect.
    fn describe(&self, scope: &Scope<'_>, reply: ModelReply) -> RelaisResult<ChatResponse> {
        let mut validated = Vec::with_capacity(reply.tool_calls.len());
        for (index, call) in reply.tool_calls.iter().enumerate() {
            match self.validator.validate(call) {
                Ok(call) => validated.push(call),
                Err(err) => {
                    settle(scope.journal, &reply.tool_calls, index, Decision::Rejected, Some(err.code()))?;
                    return Err(err);
                }
            }
        }

        let mut planned = Vec::with_capacity(validated.len());
        for call in validated {
            let mutates = self
                .validator
                .definition(&call.name)
                .map(|definition| definition.mutates)
                .unwrap_or(false);

            record(scope.journal, &call.id, &call.name, Decision::Planned, None, None)?;
            planned.push(PlannedCall {
                tool_call_id: call.id,
                name: call.name,
                arguments: call.arguments,
                mutates,
            });
        }

        Ok(ChatResponse::Plan { planned, content: non_empty(reply.content) })
    }
}

fn finish(executed: Vec<ExecutedCall>, content: String) -> ChatResponse {
    if executed.is_empty() {
        ChatResponse::Message { content }
    } else {
        ChatResponse::ToolResults { results: executed, content: non_empty(content) }
    }
}

/// Journal a reply that stops at `calls[index]`: that call gets `decision`,
/// every other call of the reply is `Skipped`.
fn settle(
    journal: &dyn AuditWriter,
    calls: &[ToolCall],
    index: usize,
    decision: Decision,
    code: Option<ReasonCode>,
) -> RelaisResult<()> {
    for (position, call) in calls.iter().enumerate() {
        if position == index {
            record(journal, &call.id, &call.name, decision, code, None)?;
        } else {
            record(journal, &call.id, &call.name, Decision::Skipped, None, None)?;
        }
    }
    Ok(())
}

fn record(
    journal: &dyn AuditWriter,
    tool_call_id: &str,
    tool: &str,
    decision: Decision,
    code: Option<ReasonCode>,
    success: Option<bool>,
) -> RelaisResult<()> {
    journal.write(&DecisionRecord {
        tool_call_id: tool_call_id.to_string(),
        tool: tool.to_string(),
        decision,
        code,
        success,
        timestamp: Utc::now(),
    })
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    use relais_contracts::{
        context::EntityKind,
        execution::JournalSummary,
        mode::PendingConfirmation,
        tool::{EntityRef, ToolResult},
    };

    use super::*;
    use crate::model::{ModelError, ToolFailure};
    use crate::supervisor::SupervisorSettings;
    use crate::traits::ToolHandler;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    fn definition(name: &str, mutates: bool, destructive: bool) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            description: String::new(),
            mutates,
            destructive,
            reads_entity_ids: !mutates,
            result_kind: (!mutates).then_some(EntityKind::Client),
            entity_refs: if mutates {
                vec![EntityRef { field: "id".to_string(), kind: EntityKind::Client }]
            } else {
                vec![]
            },
            arguments: json!({ "type": "object" }),
        }
    }

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall { id: id.to_string(), name: name.to_string(), arguments }
    }

    /// Plays back scripted replies and counts how many were requested.
    struct ScriptModel {
        replies: Mutex<VecDeque<Result<ModelReply, ModelError>>>,
        calls: Arc<Mutex<u32>>,
    }

    impl ScriptModel {
        fn new(replies: Vec<ModelReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().map(Ok).collect()),
                calls: Arc::new(Mutex::new(0)),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelError> {
            *self.calls.lock().unwrap() += 1;
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ModelReply::text("done")))
        }
    }

    /// Catalogue of three tools; arguments must be an object.
    struct MockValidator {
        tools: Vec<ToolDefinition>,
    }

    impl MockValidator {
        fn new() -> Self {
            Self {
                tools: vec![
                    definition("list_clients", false, false),
                    definition("update_client", true, false),
                    definition("delete_client", true, true),
                ],
            }
        }
    }

    impl CallValidator for MockValidator {
        fn definition(&self, name: &str) -> Option<&ToolDefinition> {
            self.tools.iter().find(|tool| tool.name == name)
        }

        fn definitions(&self) -> Vec<&ToolDefinition> {
            self.tools.iter().collect()
        }

        fn validate(&self, call: &ToolCall) -> RelaisResult<ValidatedCall> {
            if self.definition(&call.name).is_none() {
                return Err(RelaisError::UnknownTool { tool: call.name.clone() });
            }
            if !call.arguments.is_object() {
                return Err(RelaisError::MalformedArguments {
                    tool: call.name.clone(),
                    reason: "not an object".to_string(),
                });
            }
            Ok(ValidatedCall {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
        }
    }

    /// Checks the `id` argument against the known set; harvests `data[].id`.
    struct MockGuard;

    impl SafetyGuard for MockGuard {
        fn check(
            &self,
            definition: &ToolDefinition,
            call: &ValidatedCall,
            known: &KnownEntityIdSet,
            _context: Option<&ContextId>,
        ) -> RelaisResult<Vec<KnownEntity>> {
            let id = call.arguments["id"].as_str().unwrap_or_default();
            if known.contains(EntityKind::Client, id) {
                Ok(vec![KnownEntity::new(EntityKind::Client, id)])
            } else {
                Err(RelaisError::UnverifiedReference {
                    tool: definition.name.clone(),
                    field: "id".to_string(),
                    kind: "client".to_string(),
                    id: id.to_string(),
                })
            }
        }

        fn harvest(&self, _definition: &ToolDefinition, result: &ToolResult) -> Vec<KnownEntity> {
            result
                .data
                .as_ref()
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|row| row["id"].as_str())
                .map(|id| KnownEntity::new(EntityKind::Client, id))
                .collect()
        }
    }

    /// Mode table plus a trivial `tc_<call id>` token scheme.
    #[derive(Default)]
    struct MockGate {
        consumed: Mutex<HashSet<String>>,
    }

    impl ConfirmationGate for MockGate {
        fn decide(&self, mode: Mode, definition: &ToolDefinition) -> GateVerdict {
            match mode {
                Mode::Plan => GateVerdict::Describe,
                _ if !definition.mutates => GateVerdict::Execute,
                Mode::Auto if !definition.destructive => GateVerdict::Execute,
                _ => GateVerdict::Hold { reason: "needs confirmation".to_string() },
            }
        }

        fn issue(
            &self,
            call: &ValidatedCall,
            attested_refs: Vec<KnownEntity>,
        ) -> RelaisResult<PendingConfirmation> {
            Ok(PendingConfirmation {
                tool_call_id: format!("tc_{}", call.id),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                attested_refs,
            })
        }

        fn redeem(
            &self,
            confirmed_tool_call_id: Option<&str>,
            pending: Option<&PendingConfirmation>,
        ) -> RelaisResult<ToolCall> {
            match (confirmed_tool_call_id, pending) {
                (Some(id), Some(pending)) if id == pending.tool_call_id && id.starts_with("tc_") => {
                    Ok(call(id, &pending.name, pending.arguments.clone()))
                }
                _ => Err(RelaisError::ConfirmationMismatch { reason: "mismatch".to_string() }),
            }
        }

        fn consume(&self, token: &str) -> RelaisResult<()> {
            if self.consumed.lock().unwrap().insert(token.to_string()) {
                Ok(())
            } else {
                Err(RelaisError::ConfirmationMismatch { reason: "already used".to_string() })
            }
        }
    }

    /// Records every decision.
    #[derive(Default)]
    struct MockJournal {
        records: Mutex<Vec<DecisionRecord>>,
    }

    impl MockJournal {
        fn decisions(&self) -> Vec<Decision> {
            self.records.lock().unwrap().iter().map(|r| r.decision).collect()
        }
    }

    impl AuditWriter for MockJournal {
        fn write(&self, record: &DecisionRecord) -> RelaisResult<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        fn finalize(&self, _request_id: &str) -> RelaisResult<JournalSummary> {
            Ok(JournalSummary {
                entries: self.records.lock().unwrap().len() as u64,
                terminal_hash: "0".repeat(64),
            })
        }
    }

    /// A tool handler that counts invocations.
    struct CountingTool {
        result: Value,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ToolHandler for CountingTool {
        async fn call(&self, _arguments: &Value) -> Result<Value, ToolFailure> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.result.clone())
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        model_calls: Arc<Mutex<u32>>,
        tool_calls: Arc<Mutex<u32>>,
    }

    fn harness(replies: Vec<ModelReply>) -> Harness {
        let model = ScriptModel::new(replies);
        let model_calls = Arc::clone(&model.calls);
        let tool_calls = Arc::new(Mutex::new(0));

        let listing = json!({
            "success": true,
            "message": "2 clients",
            "data": [{ "id": "abc", "nom": "Acme" }, { "id": "def", "nom": "Durand" }]
        });
        let updated = json!({ "success": true, "message": "Client mis à jour" });

        let mut dispatcher = ToolDispatcher::new();
        for (name, result) in [
            ("list_clients", listing),
            ("update_client", updated.clone()),
            ("delete_client", updated),
        ] {
            dispatcher.register(
                name,
                Arc::new(CountingTool { result, calls: Arc::clone(&tool_calls) }),
            );
        }

        let orchestrator = Orchestrator::new(
            Arc::new(model),
            Arc::new(MockValidator::new()),
            Arc::new(MockGuard),
            Arc::new(MockGate::default()),
            dispatcher,
            Supervisor::default(),
            OrchestratorSettings::default(),
        );

        Harness { orchestrator, model_calls, tool_calls }
    }

    fn with_mode(message: &str, mode: Mode) -> ChatRequest {
        let mut request = ChatRequest::new(message);
        request.mode = Some(mode);
        request
    }

    // ── Plain message ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn text_reply_is_a_message() {
        let h = harness(vec![ModelReply::text("Bonjour !")]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), ChatRequest::new("salut"), &journal, None)
            .await;

        assert_eq!(envelope.response, ChatResponse::Message { content: "Bonjour !".to_string() });
        assert_eq!(envelope.mode, Mode::Demander);
        assert_eq!(envelope.journal.entries, 0);
    }

    // ── Validation failures never reach a handler ────────────────────────────

    #[tokio::test]
    async fn unknown_tool_is_rejected_without_dispatch() {
        let h = harness(vec![ModelReply::calls(vec![call("c1", "unknown_tool", json!({}))])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("x", Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::Error { code, details, .. } => {
                assert_eq!(code, ReasonCode::UnknownTool);
                assert_eq!(details["tool"], "unknown_tool");
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
        assert_eq!(journal.decisions(), vec![Decision::Rejected]);
    }

    #[tokio::test]
    async fn invalid_context_fails_before_the_model() {
        let h = harness(vec![]);
        let journal = MockJournal::default();
        let mut request = ChatRequest::new("x");
        request.context_id = Some(json!("client"));

        let envelope = h.orchestrator.handle(&RequestId::new(), request, &journal, None).await;

        assert_eq!(envelope.response.http_status(), 400);
        assert_eq!(*h.model_calls.lock().unwrap(), 0);
    }

    // ── Read-before-write ────────────────────────────────────────────────────

    #[tokio::test]
    async fn update_without_prior_read_is_unverified() {
        let h = harness(vec![ModelReply::calls(vec![call(
            "c1",
            "update_client",
            json!({ "id": "abc", "nom": "X" }),
        )])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("renomme", Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::Error { code, details, .. } => {
                assert_eq!(code, ReasonCode::UnverifiedReference);
                assert_eq!(details["id"], "abc");
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn read_then_update_in_auto_mode_executes_both() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "list_clients", json!({}))]),
            ModelReply::calls(vec![call("c2", "update_client", json!({ "id": "abc", "nom": "X" }))]),
            ModelReply::text("C'est fait."),
        ]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("renomme Acme", Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::ToolResults { results, content } => {
                assert_eq!(results.len(), 2);
                assert_eq!(results[1].name, "update_client");
                assert_eq!(content.as_deref(), Some("C'est fait."));
            }
            other => panic!("expected tool_results, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 2);
        assert_eq!(*h.model_calls.lock().unwrap(), 3);
        assert_eq!(journal.decisions(), vec![Decision::Executed, Decision::Executed]);
    }

    #[tokio::test]
    async fn context_id_counts_as_observed() {
        let h = harness(vec![ModelReply::calls(vec![call(
            "c1",
            "update_client",
            json!({ "id": "abc" }),
        )])]);
        let journal = MockJournal::default();
        let mut request = with_mode("renomme", Mode::Auto);
        request.context_id = Some(json!("client:abc"));

        let envelope = h.orchestrator.handle(&RequestId::new(), request, &journal, None).await;

        assert!(matches!(envelope.response, ChatResponse::ToolResults { .. }));
        assert_eq!(envelope.context_id.unwrap().to_string(), "client:abc");
    }

    // ── Modes ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn demander_holds_the_reply_at_its_first_mutation() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "list_clients", json!({}))]),
            ModelReply::calls(vec![
                call("c2", "update_client", json!({ "id": "abc", "nom": "X" })),
                call("c3", "update_client", json!({ "id": "def", "nom": "Y" })),
            ]),
        ]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), ChatRequest::new("renomme"), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::PendingConfirmation { pending, .. } => {
                assert_eq!(pending.tool_call_id, "tc_c2");
                assert_eq!(pending.attested_refs, vec![KnownEntity::new(EntityKind::Client, "abc")]);
            }
            other => panic!("expected pending_confirmation, got {:?}", other),
        }
        // Only the read ran.
        assert_eq!(*h.tool_calls.lock().unwrap(), 1);
        assert_eq!(
            journal.decisions(),
            vec![Decision::Executed, Decision::Held, Decision::Skipped]
        );
    }

    #[tokio::test]
    async fn auto_mode_still_holds_destructive_calls() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "list_clients", json!({}))]),
            ModelReply::calls(vec![call("c2", "delete_client", json!({ "id": "abc" }))]),
        ]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("supprime", Mode::Auto), &journal, None)
            .await;

        assert!(matches!(envelope.response, ChatResponse::PendingConfirmation { .. }));
        assert_eq!(*h.tool_calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn plan_mode_describes_without_executing() {
        let h = harness(vec![ModelReply::calls(vec![
            call("c1", "list_clients", json!({})),
            call("c2", "update_client", json!({ "id": "zzz" })),
        ])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("prévois", Mode::Plan), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::Plan { planned, .. } => {
                assert_eq!(planned.len(), 2);
                assert!(!planned[0].mutates);
                assert!(planned[1].mutates);
            }
            other => panic!("expected plan, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
        assert_eq!(*h.model_calls.lock().unwrap(), 1);
        assert_eq!(journal.decisions(), vec![Decision::Planned, Decision::Planned]);
    }

    // ── Confirmation ─────────────────────────────────────────────────────────

    fn confirmation(token: &str, attested: Vec<KnownEntity>) -> ChatRequest {
        let mut request = ChatRequest::new("oui");
        request.confirmed_action = true;
        request.confirmed_tool_call_id = Some(token.to_string());
        request.pending_action = Some(PendingConfirmation {
            tool_call_id: token.to_string(),
            name: "update_client".to_string(),
            arguments: json!({ "id": "abc", "nom": "X" }),
            attested_refs: attested,
        });
        request
    }

    #[tokio::test]
    async fn confirmed_call_executes_once_without_the_model() {
        let h = harness(vec![]);
        let attested = vec![KnownEntity::new(EntityKind::Client, "abc")];

        let first = h
            .orchestrator
            .handle(&RequestId::new(), confirmation("tc_c2", attested.clone()), &MockJournal::default(), None)
            .await;
        match first.response {
            ChatResponse::ToolResults { results, content } => {
                assert_eq!(results.len(), 1);
                assert_eq!(content.as_deref(), Some("Client mis à jour"));
            }
            other => panic!("expected tool_results, got {:?}", other),
        }

        let replay = h
            .orchestrator
            .handle(&RequestId::new(), confirmation("tc_c2", attested), &MockJournal::default(), None)
            .await;
        assert!(matches!(
            replay.response,
            ChatResponse::Error { code: ReasonCode::ConfirmationMismatch, .. }
        ));

        assert_eq!(*h.tool_calls.lock().unwrap(), 1);
        assert_eq!(*h.model_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn confirmation_with_wrong_id_is_a_mismatch() {
        let h = harness(vec![]);
        let mut request = confirmation("tc_c2", vec![]);
        request.confirmed_tool_call_id = Some("tc_other".to_string());

        let envelope = h.orchestrator.handle(&RequestId::new(), request, &MockJournal::default(), None).await;

        assert_eq!(envelope.response.http_status(), 400);
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn confirmation_is_revalidated_by_the_guard() {
        let h = harness(vec![]);

        // Nothing attested: the guard has no record of "abc".
        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), confirmation("tc_c2", vec![]), &MockJournal::default(), None)
            .await;

        assert!(matches!(
            envelope.response,
            ChatResponse::Error { code: ReasonCode::UnverifiedReference, .. }
        ));
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
    }

    // ── Whole-reply admission ────────────────────────────────────────────────

    fn in_client_abc(mode: Mode) -> ChatRequest {
        let mut request = with_mode("renomme", mode);
        request.context_id = Some(json!("client:abc"));
        request
    }

    #[tokio::test]
    async fn unverified_call_refuses_the_whole_reply() {
        let h = harness(vec![ModelReply::calls(vec![
            call("c1", "update_client", json!({ "id": "abc", "nom": "X" })),
            call("c2", "update_client", json!({ "id": "zzz", "nom": "Y" })),
        ])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), in_client_abc(Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::Error { code, details, results, .. } => {
                assert_eq!(code, ReasonCode::UnverifiedReference);
                assert_eq!(details["id"], "zzz");
                assert!(results.is_empty());
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
        assert_eq!(journal.decisions(), vec![Decision::Skipped, Decision::Rejected]);
    }

    #[tokio::test]
    async fn unknown_tool_refuses_a_read_in_the_same_reply() {
        let h = harness(vec![ModelReply::calls(vec![
            call("c1", "list_clients", json!({})),
            call("c2", "unknown_tool", json!({})),
        ])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("liste", Mode::Auto), &journal, None)
            .await;

        assert!(matches!(
            envelope.response,
            ChatResponse::Error { code: ReasonCode::UnknownTool, .. }
        ));
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
        assert_eq!(journal.decisions(), vec![Decision::Skipped, Decision::Rejected]);
        assert_eq!(envelope.journal.entries, 2);
    }

    #[tokio::test]
    async fn held_call_holds_a_write_in_the_same_reply() {
        let h = harness(vec![ModelReply::calls(vec![
            call("c1", "update_client", json!({ "id": "abc", "nom": "X" })),
            call("c2", "delete_client", json!({ "id": "abc" })),
        ])]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), in_client_abc(Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::PendingConfirmation { pending, results, .. } => {
                assert_eq!(pending.name, "delete_client");
                assert!(results.is_empty());
            }
            other => panic!("expected pending_confirmation, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 0);
        assert_eq!(journal.decisions(), vec![Decision::Skipped, Decision::Held]);
    }

    #[tokio::test]
    async fn failure_in_a_later_turn_reports_what_already_ran() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "update_client", json!({ "id": "abc", "nom": "X" }))]),
            ModelReply::calls(vec![call("c2", "unknown_tool", json!({}))]),
        ]);
        let journal = MockJournal::default();

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), in_client_abc(Mode::Auto), &journal, None)
            .await;

        match envelope.response {
            ChatResponse::Error { code, results, .. } => {
                assert_eq!(code, ReasonCode::UnknownTool);
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].tool_call_id, "c1");
                assert!(results[0].result.success);
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(*h.tool_calls.lock().unwrap(), 1);
        assert_eq!(journal.decisions(), vec![Decision::Executed, Decision::Rejected]);
    }

    #[tokio::test]
    async fn hold_in_a_later_turn_reports_what_already_ran() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "list_clients", json!({}))]),
            ModelReply::calls(vec![call("c2", "update_client", json!({ "id": "def", "nom": "Y" }))]),
        ]);

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), ChatRequest::new("renomme"), &MockJournal::default(), None)
            .await;

        match envelope.response {
            ChatResponse::PendingConfirmation { pending, results, .. } => {
                assert_eq!(pending.tool_call_id, "tc_c2");
                assert_eq!(results.len(), 1);
                assert_eq!(results[0].name, "list_clients");
            }
            other => panic!("expected pending_confirmation, got {:?}", other),
        }
    }

    // ── Request deadline ─────────────────────────────────────────────────────

    /// Succeeds after `delay`.
    struct SlowTool {
        delay: Duration,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl ToolHandler for SlowTool {
        async fn call(&self, _arguments: &Value) -> Result<Value, ToolFailure> {
            *self.calls.lock().unwrap() += 1;
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "success": true, "message": "ok", "data": [] }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_spans_sequential_tool_calls() {
        let model = ScriptModel::new(vec![
            ModelReply::calls(vec![
                call("c1", "list_clients", json!({})),
                call("c2", "list_clients", json!({ "page": 2 })),
            ]),
            ModelReply::text("never reached"),
        ]);
        let model_calls = Arc::clone(&model.calls);
        let tool_calls = Arc::new(Mutex::new(0));

        let dispatcher = ToolDispatcher::new().with(
            "list_clients",
            Arc::new(SlowTool { delay: Duration::from_secs(40), calls: Arc::clone(&tool_calls) }),
        );
        // Each call fits its own timeout; only the shared deadline stops the second.
        let supervisor = Supervisor::new(SupervisorSettings {
            tool_timeout: Duration::from_secs(45),
            ..SupervisorSettings::default()
        });
        let settings = OrchestratorSettings {
            request_deadline: Duration::from_secs(60),
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(
            Arc::new(model),
            Arc::new(MockValidator::new()),
            Arc::new(MockGuard),
            Arc::new(MockGate::default()),
            dispatcher,
            supervisor,
            settings,
        );
        let journal = MockJournal::default();

        let started = tokio::time::Instant::now();
        let envelope = orchestrator
            .handle(&RequestId::new(), with_mode("liste", Mode::Auto), &journal, None)
            .await;

        match &envelope.response {
            ChatResponse::Error { code, results, .. } => {
                assert_eq!(*code, ReasonCode::DeadlineExceeded);
                assert_eq!(results.len(), 1);
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(envelope.response.http_status(), 408);
        assert_eq!(*model_calls.lock().unwrap(), 1);
        assert_eq!(*tool_calls.lock().unwrap(), 2);
        assert_eq!(journal.decisions(), vec![Decision::Executed, Decision::Rejected]);

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(60));
        assert!(elapsed < Duration::from_secs(61));
    }

    // ── Loop bounds and streaming ────────────────────────────────────────────

    #[tokio::test]
    async fn iteration_limit_returns_partial_results() {
        let replies = (0..10)
            .map(|n| ModelReply::calls(vec![call(&format!("c{n}"), "list_clients", json!({}))]))
            .collect();
        let h = harness(replies);

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), with_mode("boucle", Mode::Auto), &MockJournal::default(), None)
            .await;

        match envelope.response {
            ChatResponse::ToolResults { results, .. } => assert_eq!(results.len(), 6),
            other => panic!("expected tool_results, got {:?}", other),
        }
        assert_eq!(*h.model_calls.lock().unwrap(), 6);
    }

    #[tokio::test]
    async fn streaming_emits_each_result_then_the_envelope() {
        let h = harness(vec![
            ModelReply::calls(vec![call("c1", "list_clients", json!({}))]),
            ModelReply::text("Voici vos clients."),
        ]);
        let (tx, mut rx) = mpsc::channel(8);

        let envelope = h
            .orchestrator
            .handle(&RequestId::new(), ChatRequest::new("liste"), &MockJournal::default(), Some(&tx))
            .await;
        drop(tx);

        let mut names = Vec::new();
        while let Some(event) = rx.recv().await {
            names.push(event.name());
        }
        assert_eq!(names, vec!["tool_result", "tool_results"]);
        assert_eq!(envelope.response.kind(), "tool_results");
    }

    #[tokio::test]
    async fn journal_timestamps_are_recent() {
        let h = harness(vec![ModelReply::calls(vec![call("c1", "list_clients", json!({}))])]);
        let journal = MockJournal::default();
        let before = Utc::now();

        h.orchestrator
            .handle(&RequestId::new(), ChatRequest::new("liste"), &journal, None)
            .await;

        let records = journal.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].timestamp >= before);
        assert_eq!(records[0].success, Some(true));
    }
}
