use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use parley_core::context::SessionRequest;
use parley_core::errors::GatewayError;
use parley_core::ids::{ChatId, ClientId, MessageId, ToolCallId};
use parley_core::messages::{ChatMessage, Media, Part, ToolCall, ToolResponse, UserTurn};
use parley_core::provider::{BackendSession, LlmBackend, StreamOptions};
use parley_core::stream::Chunk;
use parley_core::tokens::{TokenUsage, ToolUsageRecord};
use parley_core::tools::{ExecutionContext, Tool, ToolError, ToolOutput};
use parley_core::turn::{
    InvocationStatus, ProgressPart, ReplyOutcome, Step, StepKind, ToolInvocation, TurnProgress,
};
use parley_llm::converter;

use crate::accumulate::{join_blocks, DedupList, RoundAccumulator};
use crate::correlate::CallLedger;
use crate::progress::ProgressGate;
use crate::registry::{ToolFilter, ToolRegistry};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for the turn orchestrator.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub model: String,
    pub system_instruction: Option<String>,
    pub stream_options: StreamOptions,
    /// Working directory handed to tools.
    pub working_directory: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_instruction: None,
            stream_options: StreamOptions::default(),
            working_directory: std::env::temp_dir(),
        }
    }
}

/// Input for one Turn.
#[derive(Clone, Debug)]
pub struct ReplyRequest {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub client_id: Option<ClientId>,
    pub history: Vec<ChatMessage>,
    pub user: UserTurn,
    pub tools: ToolFilter,
}

impl ReplyRequest {
    pub fn new(chat_id: ChatId, history: Vec<ChatMessage>, user: UserTurn) -> Self {
        Self {
            chat_id,
            message_id: user.message_id.clone(),
            client_id: None,
            history,
            user,
            tools: ToolFilter::All,
        }
    }

    pub fn with_tools(mut self, tools: ToolFilter) -> Self {
        self.tools = tools;
        self
    }
}

/// Drives one user turn to a finished reply, across as many backend rounds
/// as the model's tool use requires.
///
/// Stateless between calls; callers serialize Turns of the same chat.
pub struct TurnOrchestrator {
    backend: Arc<dyn LlmBackend>,
    registry: Arc<ToolRegistry>,
    config: OrchestratorConfig,
}

impl TurnOrchestrator {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        registry: Arc<ToolRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Generate the reply for `request`.
    ///
    /// `on_update` receives de-duplicated progress and always one final call.
    /// `cancel` is polled before each round, at every chunk and once a
    /// round's tool calls are known; tool calls already dispatched finish.
    #[instrument(skip_all, fields(chat_id = %request.chat_id, message_id = %request.message_id))]
    pub async fn generate_reply<F>(
        &self,
        request: ReplyRequest,
        mut on_update: F,
        cancel: &CancellationToken,
    ) -> ReplyOutcome
    where
        F: FnMut(&TurnProgress) + Send,
    {
        let ReplyRequest {
            chat_id,
            message_id,
            client_id,
            history,
            user,
            tools,
        } = request;
        let site = CallSite {
            chat_id,
            message_id,
            client_id,
        };

        let session_request = SessionRequest {
            model: self.config.model.clone(),
            history: converter::normalize_history(&history),
            system_instruction: self.config.system_instruction.clone(),
            tools: self.registry.definitions_for(&tools),
            options: self.config.stream_options.clone(),
        };
        info!(
            history = history.len(),
            tools = session_request.tools.len(),
            "turn started"
        );

        let mut state = TurnState::default();
        let mut session = match self.backend.open_session(session_request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "failed to open backend session");
                state.fail(e);
                return state.finish(&mut on_update);
            }
        };

        let mut input = user.to_parts();
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                state.stopped = true;
                break;
            }
            rounds += 1;
            state.begin_round();
            debug!(round = rounds, "opening round");

            if let Err(e) = self
                .stream_round(&mut state, session.as_mut(), std::mem::take(&mut input), cancel, &mut on_update)
                .await
            {
                warn!(round = rounds, error = %e, kind = e.error_kind(), "backend round failed");
                state.fail(e);
                state.abandon_round();
                break;
            }
            if state.stopped {
                state.abandon_round();
                break;
            }
            if !state.round.has_calls() {
                state.close_round(StepKind::Thinking);
                break;
            }
            if cancel.is_cancelled() {
                state.stopped = true;
                state.abandon_round();
                break;
            }

            input = self
                .dispatch(&mut state, &site, &tools, &mut on_update)
                .await;
            state.close_round(StepKind::Worked);
            state.emit(&mut on_update);
        }

        let outcome = state.finish(&mut on_update);
        info!(
            rounds,
            steps = outcome.steps.len(),
            stopped = outcome.stopped,
            error = outcome.error.is_some(),
            total_tokens = outcome.token_usage.total(),
            "turn complete"
        );
        outcome
    }

    /// Consume one round's stream into `state`. Returns early on cancellation.
    async fn stream_round<F>(
        &self,
        state: &mut TurnState,
        session: &mut dyn BackendSession,
        input: Vec<Part>,
        cancel: &CancellationToken,
        on_update: &mut F,
    ) -> Result<(), GatewayError>
    where
        F: FnMut(&TurnProgress) + Send,
    {
        let mut stream = session.stream_round(input).await?;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state.stopped = true;
                    return Ok(());
                }
                item = stream.next() => item,
            };
            let Some(item) = item else {
                return Ok(());
            };
            let chunk = item?;
            state.absorb(&chunk);
            if !cancel.is_cancelled() {
                state.emit(on_update);
            }
        }
    }

    /// Run every call of the round and return the responses, in call order.
    async fn dispatch<F>(
        &self,
        state: &mut TurnState,
        site: &CallSite,
        tools: &ToolFilter,
        on_update: &mut F,
    ) -> Vec<Part>
    where
        F: FnMut(&TurnProgress) + Send,
    {
        let calls: Vec<ToolCall> = state.round.calls().to_vec();
        let call_ids: Vec<ToolCallId> = calls
            .iter()
            .map(|c| c.id.clone().unwrap_or_default())
            .collect();
        // Internal ledger keyed by the ids tools actually ran under.
        let mut ledger = CallLedger::from_calls(calls.iter().zip(&call_ids).map(|(c, id)| ToolCall {
            id: Some(id.clone()),
            ..c.clone()
        }));

        let mut pending = FuturesUnordered::new();
        for (idx, call) in calls.iter().enumerate() {
            state.mark(idx, InvocationStatus::Executing);
            state.emit(on_update);

            let tool = self.resolve_tool(&call.name, tools);
            let ctx = ExecutionContext {
                chat_id: site.chat_id.clone(),
                message_id: site.message_id.clone(),
                client_id: site.client_id.clone(),
                tool_call_id: call_ids[idx].clone(),
                tool_name: call.name.clone(),
                working_directory: self.config.working_directory.clone(),
            };
            let args = call.arguments.clone();
            pending.push(async move {
                let output = run_tool(tool, args, &ctx).await;
                (ctx.tool_call_id, ctx.tool_name, output)
            });
        }

        let mut responses: Vec<Option<Part>> = vec![None; calls.len()];
        while let Some((call_id, name, output)) = pending.next().await {
            let lookup = ToolResponse {
                id: Some(call_id.clone()),
                name,
                response: Value::Null,
            };
            let Some(idx) = ledger.match_response(&lookup) else {
                warn!(tool = %lookup.name, call_id = %call_id, "tool result matched no call");
                continue;
            };
            let public = output.public_response();
            state.resolve(idx, &call_id, public.clone(), output);
            state.emit(on_update);

            let call = &calls[idx];
            responses[idx] = Some(Part::ToolResponse(ToolResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: public,
            }));
        }

        responses.into_iter().flatten().collect()
    }

    fn resolve_tool(&self, name: &str, filter: &ToolFilter) -> Result<Arc<dyn Tool>, ToolError> {
        if !filter.allows(name) {
            return Err(ToolError::NotAllowed(name.to_string()));
        }
        self.registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }
}

struct CallSite {
    chat_id: ChatId,
    message_id: MessageId,
    client_id: Option<ClientId>,
}

/// Execute a tool, coercing every failure into an error-bearing output.
async fn run_tool(
    tool: Result<Arc<dyn Tool>, ToolError>,
    args: Value,
    ctx: &ExecutionContext,
) -> ToolOutput {
    let tool = match tool {
        Ok(tool) => tool,
        Err(e) => {
            warn!(tool = %ctx.tool_name, error = %e, "tool call rejected");
            return ToolOutput::error(e.to_string());
        }
    };

    match AssertUnwindSafe(tool.execute(args, ctx)).catch_unwind().await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(tool = %ctx.tool_name, error = %e, "tool failed");
            ToolOutput::error(e.to_string())
        }
        Err(panic) => {
            error!(
                tool = %ctx.tool_name,
                panic = %panic_message(&panic),
                "tool panicked during execution"
            );
            ToolOutput::error("Internal error: tool crashed")
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}

/// Per-call accumulation of a Turn. Never shared between Turns.
#[derive(Default)]
struct TurnState {
    committed_text: String,
    committed_thought: String,
    round: RoundAccumulator,
    round_calls: Vec<ToolInvocation>,
    /// Position of each round call inside `parts`.
    round_call_parts: Vec<usize>,
    signatures: DedupList<String>,
    media: DedupList<Media>,
    parts: Vec<ProgressPart>,
    steps: Vec<Step>,
    usage: TokenUsage,
    tool_usage: Vec<ToolUsageRecord>,
    stopped: bool,
    error: Option<String>,
    gate: ProgressGate,
}

impl TurnState {
    fn begin_round(&mut self) {
        self.round = RoundAccumulator::new();
        self.round_calls.clear();
        self.round_call_parts.clear();
        self.gate.force_next();
    }

    fn absorb(&mut self, chunk: &Chunk) {
        let effect = self
            .round
            .apply(chunk, &mut self.signatures, &mut self.media);
        for media in effect.new_media {
            self.parts.push(ProgressPart::Media(media));
        }
        for call in effect.new_calls {
            let invocation = ToolInvocation::pending(call);
            self.round_call_parts.push(self.parts.len());
            self.parts.push(ProgressPart::Call(invocation.clone()));
            self.round_calls.push(invocation);
        }
    }

    fn text(&self) -> String {
        join_blocks(&self.committed_text, self.round.text())
    }

    fn thought(&self) -> String {
        join_blocks(&self.committed_thought, self.round.thought())
    }

    fn progress(&self) -> TurnProgress {
        TurnProgress {
            text: self.text(),
            thought: self.thought(),
            parts: self.parts.clone(),
            steps: self.steps.clone(),
        }
    }

    fn emit<F: FnMut(&TurnProgress)>(&mut self, on_update: &mut F) {
        let progress = self.progress();
        if self.gate.admit(&progress) {
            on_update(&progress);
        }
    }

    fn set_invocation(&mut self, idx: usize, invocation: ToolInvocation) {
        if let Some(&part_idx) = self.round_call_parts.get(idx) {
            self.parts[part_idx] = ProgressPart::Call(invocation.clone());
        }
        self.round_calls[idx] = invocation;
    }

    fn mark(&mut self, idx: usize, status: InvocationStatus) {
        let mut invocation = self.round_calls[idx].clone();
        invocation.status = status;
        self.set_invocation(idx, invocation);
    }

    fn resolve(&mut self, idx: usize, call_id: &ToolCallId, public: Value, output: ToolOutput) {
        let mut invocation = self.round_calls[idx].clone();
        invocation.status = InvocationStatus::Resolved;
        invocation.result = Some(public);

        if let Some(mut usage) = output.usage {
            if usage.tool_call_id.is_none() {
                usage.tool_call_id = Some(call_id.clone());
            }
            invocation.usage = Some(usage.clone());
            self.tool_usage.push(usage);
        }
        for media in output.media {
            if self.media.insert(media.dedup_key(), media.clone()) {
                self.parts.push(ProgressPart::Media(media.clone()));
            }
            invocation.media.push(media);
        }

        self.set_invocation(idx, invocation);
    }

    /// Push the round's Step and fold its text into the Turn.
    fn close_round(&mut self, kind: StepKind) {
        if let Some(usage) = self.round.usage() {
            self.usage += &usage;
        }

        let text = step_delta(&self.committed_text, self.round.text());
        let thought = step_delta(&self.committed_thought, self.round.thought());
        let invocations = match kind {
            StepKind::Worked => std::mem::take(&mut self.round_calls),
            StepKind::Thinking => Vec::new(),
        };

        if kind == StepKind::Worked || !text.is_empty() || !thought.is_empty() {
            self.steps.push(Step {
                index: self.steps.len() as u32 + 1,
                kind,
                text,
                thought,
                invocations,
                text_before_tools: kind == StepKind::Worked && self.round.text_before_tools(),
            });
        }

        self.committed_text = self.text();
        self.committed_thought = self.thought();
        self.round = RoundAccumulator::new();
        self.round_calls.clear();
        self.round_call_parts.clear();
    }

    /// Close a round that was cut short: its tool calls never ran.
    fn abandon_round(&mut self) {
        let dropped: Vec<usize> = std::mem::take(&mut self.round_call_parts);
        if !dropped.is_empty() {
            let mut idx = 0;
            self.parts.retain(|_| {
                let keep = !dropped.contains(&idx);
                idx += 1;
                keep
            });
        }
        self.round_calls.clear();
        self.close_round(StepKind::Thinking);
    }

    fn fail(&mut self, error: GatewayError) {
        self.error = Some(error.to_string());
    }

    fn finish<F: FnMut(&TurnProgress)>(self, on_update: &mut F) -> ReplyOutcome {
        let text = match &self.error {
            Some(msg) => join_blocks(&self.committed_text, &format!("Error: {msg}")),
            None => self.committed_text.clone(),
        };

        on_update(&TurnProgress {
            text: text.clone(),
            thought: self.committed_thought.clone(),
            parts: self.parts.clone(),
            steps: self.steps.clone(),
        });

        ReplyOutcome {
            text,
            thought: self.committed_thought,
            steps: self.steps,
            stopped: self.stopped,
            error: self.error,
            token_usage: self.usage,
            tool_usage: self.tool_usage,
            signatures: self.signatures.into_items(),
            media: self.media.into_items(),
        }
    }
}

/// Text a round adds to the Turn, including the separator.
fn step_delta(committed: &str, round: &str) -> String {
    if round.is_empty() {
        String::new()
    } else if committed.is_empty() {
        round.to_string()
    } else {
        format!("\n\n{round}")
    }
}
