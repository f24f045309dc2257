// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use kodelet_model::{
    CompletionRequest, ContentPart, Message, Provider, ProviderError, RetryPolicy, Usage,
};
use kodelet_store::ConversationRecord;
use kodelet_tools::{Executor, ToolCall, ToolRegistry, ToolState};

use crate::{
    compact::Compactor,
    events::{AgentEvent, Dispatcher, EventStream},
    prompts::{system_prompt, TURN_LIMIT_PROMPT},
    runtime::Runtime,
};

/// Grace period for the final persistence flush.
const FLUSH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Depth of the fire-and-forget persistence queue.  The record is
/// cumulative, so dropping an intermediate save loses nothing once a later
/// one lands.
const PERSIST_QUEUE_DEPTH: usize = 8;

/// Running usage totals shared between a thread and its sub-agents, so
/// inner-thread consumption is attributed to the outer thread.
pub type UsageSink = Arc<StdMutex<Usage>>;

/// Thread-level failures.  Tool errors never appear here — they are data
/// fed back to the model.
#[derive(Debug, thiserror::Error)]
pub enum ThreadError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("cancelled")]
    Cancelled,
    #[error("context overflow: compaction failed to fit the conversation")]
    ContextOverflow,
    #[error(transparent)]
    Provider(ProviderError),
}

/// Per-thread policy knobs.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Provider calls per send_message; 0 means no limit.
    pub max_turns: u32,
    pub compact_ratio: f32,
    pub disable_auto_compact: bool,
    /// Number of recent messages kept verbatim through compaction.
    pub compaction_keep_recent: usize,
    /// Persist the conversation after each turn.
    pub persist: bool,
    pub prompt_cache: bool,
    /// System prompt override.
    pub system_prompt: Option<String>,
}

impl ThreadConfig {
    pub fn from_config(cfg: &kodelet_config::Config) -> Self {
        Self {
            max_turns: cfg.agent.max_turns,
            compact_ratio: cfg.agent.compact_ratio,
            disable_auto_compact: cfg.agent.disable_auto_compact,
            compaction_keep_recent: cfg.agent.compaction_keep_recent,
            persist: true,
            prompt_cache: cfg.model.prompt_cache,
            system_prompt: cfg.agent.system_prompt.clone(),
        }
    }
}

/// Per-message options.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Images attached to the user turn (data URLs or HTTPS URLs).
    pub images: Vec<String>,
    /// Use the configured weak model for this call.
    pub use_weak_model: bool,
}

enum PersistMsg {
    Save(ConversationRecord),
    Flush(oneshot::Sender<()>),
}

/// One instance of the agent loop driving a single conversation.
pub struct Thread {
    runtime: Arc<Runtime>,
    provider: Arc<dyn Provider>,
    executor: Executor,
    dispatcher: Dispatcher,
    compactor: Compactor,
    retry: RetryPolicy,
    config: ThreadConfig,
    system: String,
    history: Vec<Message>,
    record: ConversationRecord,
    usage: UsageSink,
    persist_tx: Option<mpsc::Sender<PersistMsg>>,
    /// Signals stream followers that this writer is finished.
    writer_done: CancellationToken,
}

impl Thread {
    pub fn new(
        runtime: Arc<Runtime>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: ThreadConfig,
        usage: UsageSink,
    ) -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| ".".into());
        let state = Arc::new(ToolState::new(&working_dir));
        let system = system_prompt(&working_dir, config.system_prompt.as_deref());
        let record = ConversationRecord::new(provider.name(), provider.model_name());
        let compactor = Compactor::new(
            config.compact_ratio,
            config.compaction_keep_recent,
            !config.disable_auto_compact,
        );
        let persist_tx = config
            .persist
            .then(|| spawn_persist_writer(Arc::clone(&runtime)));
        Self {
            runtime,
            provider,
            executor: Executor::new(registry, state),
            dispatcher: Dispatcher::new(),
            compactor,
            retry: RetryPolicy::default(),
            config,
            system,
            history: Vec::new(),
            record,
            usage,
            persist_tx,
            writer_done: CancellationToken::new(),
        }
    }

    /// Continue a stored conversation: history, usage totals, and id are
    /// restored from the record.
    pub async fn resume(
        runtime: Arc<Runtime>,
        provider: Arc<dyn Provider>,
        registry: Arc<ToolRegistry>,
        config: ThreadConfig,
        usage: UsageSink,
        conversation_id: &str,
    ) -> Result<Self, kodelet_store::StoreError> {
        let record = runtime.store.load(conversation_id).await?;
        let mut thread = Self::new(runtime, provider, registry, config, usage);
        thread.history = record.messages.clone();
        thread.record = record;
        Ok(thread)
    }

    pub fn conversation_id(&self) -> &str {
        &self.record.id
    }

    /// Force a specific conversation id (before the first send).
    pub fn set_conversation_id(&mut self, id: impl Into<String>) {
        self.record.id = id.into();
    }

    /// Subscribe to this thread's events with a bounded buffer.
    pub fn subscribe(&self, capacity: usize) -> EventStream {
        self.dispatcher.subscribe(capacity)
    }

    /// Fires when the thread has flushed its final save.
    pub fn writer_done_token(&self) -> CancellationToken {
        self.writer_done.clone()
    }

    /// Snapshot of the running usage totals (including sub-agent calls).
    pub fn usage(&self) -> Usage {
        *self.usage.lock().expect("usage sink poisoned")
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Drive one user message to a completed assistant response.
    ///
    /// Emits events along the way, grows the history, accumulates usage,
    /// and persists the conversation.  Returns the concatenated text of
    /// the final assistant turn.
    pub async fn send_message(
        &mut self,
        cancel: &CancellationToken,
        query: &str,
        opts: SendOptions,
    ) -> Result<String, ThreadError> {
        // PREPARE: the user turn, with image parts when provided.
        if query.is_empty() && opts.images.is_empty() {
            return Err(ThreadError::InvalidInput(
                "empty query with no images".into(),
            ));
        }
        let user_msg = if opts.images.is_empty() {
            Message::user(query)
        } else {
            let mut parts = Vec::with_capacity(opts.images.len() + 1);
            if !query.is_empty() {
                parts.push(ContentPart::text(query));
            }
            parts.extend(opts.images.iter().map(ContentPart::image));
            Message::user_with_parts(parts)
        };
        self.history.push(user_msg);
        self.dispatcher.emit(AgentEvent::User {
            text: query.to_string(),
        });

        let model_override = opts
            .use_weak_model
            .then(|| self.runtime.config.model.weak_name.clone())
            .flatten();

        let mut turns: u32 = 0;
        let final_text = loop {
            if cancel.is_cancelled() {
                return Err(self.finish_cancelled().await);
            }

            // Budget gate before every provider call: catches both a
            // history near the threshold and an oversized tool-result
            // batch appended by the previous round.
            if let Err(e) = self.maybe_compact(cancel).await {
                if !matches!(e, ThreadError::Cancelled) {
                    self.flush_persist().await;
                }
                return Err(e);
            }

            // CALL_PROVIDER with the bounded-retry / refresh / compact
            // recovery ladder.
            turns += 1;
            let turn = match self
                .call_provider(cancel, model_override.clone(), true)
                .await
            {
                Ok(t) => t,
                Err(ThreadError::Cancelled) => return Err(self.finish_cancelled().await),
                Err(e) => {
                    self.flush_persist().await;
                    return Err(e);
                }
            };
            self.account_usage(&turn.usage);

            // EMIT_ASSISTANT: text blocks, then tool-use intents, appended
            // to history in emission order.
            for block in &turn.text_blocks {
                self.dispatcher.emit(AgentEvent::Text {
                    text: block.clone(),
                });
                self.history.push(Message::assistant(block));
            }
            for tu in &turn.tool_uses {
                self.dispatcher.emit(AgentEvent::ToolUse {
                    call_id: tu.id.clone(),
                    name: tu.name.clone(),
                    args: tu.args.clone(),
                });
                self.history
                    .push(Message::tool_use(&tu.id, &tu.name, tu.args.clone()));
            }

            if turn.tool_uses.is_empty() {
                break turn.text();
            }

            // Turn accounting: at the cap, requested tools are refused with
            // synthetic error results (the pairing invariant holds), the
            // model is told to stop, and one final tool-free turn runs.
            if self.config.max_turns > 0 && turns >= self.config.max_turns {
                for tu in &turn.tool_uses {
                    self.append_tool_result(
                        &tu.id,
                        &tu.name,
                        "turn limit reached; tool was not executed".to_string(),
                        serde_json::Value::Null,
                        true,
                    );
                }
                self.history.push(Message::user(TURN_LIMIT_PROMPT));
                let wrap_up = match self
                    .call_provider(cancel, model_override.clone(), false)
                    .await
                {
                    Ok(t) => t,
                    Err(ThreadError::Cancelled) => return Err(self.finish_cancelled().await),
                    Err(e) => {
                        self.flush_persist().await;
                        return Err(e);
                    }
                };
                self.account_usage(&wrap_up.usage);
                let text = wrap_up.text();
                if !text.is_empty() {
                    self.dispatcher.emit(AgentEvent::Text { text: text.clone() });
                    self.history.push(Message::assistant(&text));
                }
                break text;
            }

            // EXECUTE_TOOLS: batch through the executor; results come back
            // in request order regardless of completion order.
            let calls: Vec<ToolCall> = turn
                .tool_uses
                .iter()
                .map(|tu| ToolCall {
                    id: tu.id.clone(),
                    name: tu.name.clone(),
                    args: tu.args.clone(),
                })
                .collect();
            let outputs = self.executor.execute_batch(&calls, cancel).await;

            // EMIT_RESULTS, in the original order.
            for (call, output) in calls.iter().zip(outputs) {
                self.append_tool_result(
                    &call.id,
                    &call.name,
                    output.assistant,
                    output.payload,
                    output.is_error,
                );
            }

            if cancel.is_cancelled() {
                // The executor already produced synthetic error results
                // for interrupted tools, so no tool-use dangles.
                return Err(self.finish_cancelled().await);
            }

            self.queue_persist();
        };

        self.flush_persist().await;
        self.writer_done.cancel();
        self.dispatcher.emit(AgentEvent::Done {
            text: final_text.clone(),
            overflowed: false,
        });
        Ok(final_text)
    }

    // ── Provider call with recovery ─────────────────────────────────────────

    async fn call_provider(
        &mut self,
        cancel: &CancellationToken,
        model_override: Option<String>,
        with_tools: bool,
    ) -> Result<kodelet_model::ProviderTurn, ThreadError> {
        let mut attempts: u32 = 0;
        let mut auth_retried = false;
        let mut compacted = false;

        loop {
            let req = self.build_request(model_override.clone(), with_tools);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ThreadError::Cancelled),
                r = self.provider.send(req) => r,
            };

            match result {
                Ok(turn) => return Ok(turn),
                Err(ProviderError::Retryable {
                    message,
                    retry_after,
                }) => {
                    attempts += 1;
                    if !self.retry.should_retry(attempts) {
                        return Err(ThreadError::Provider(ProviderError::Retryable {
                            message,
                            retry_after,
                        }));
                    }
                    let delay = self.retry.delay(attempts, retry_after);
                    debug!(attempt = attempts, ?delay, "retryable provider error: {message}");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ThreadError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(ProviderError::AuthExpired(msg)) if !auth_retried => {
                    // One retry: the providers resolve their bearer through
                    // the credential store on every send, which refreshes a
                    // credential inside its expiry window.
                    auth_retried = true;
                    warn!("authorization expired, retrying once: {msg}");
                }
                Err(ProviderError::ContextOverflow(msg)) if !compacted => {
                    compacted = true;
                    warn!("context overflow, compacting and retrying once: {msg}");
                    self.run_compaction().await?;
                }
                Err(e) => return Err(ThreadError::Provider(e)),
            }
        }
    }

    fn build_request(
        &self,
        model_override: Option<String>,
        with_tools: bool,
    ) -> CompletionRequest {
        let tools = if with_tools {
            self.executor
                .registry()
                .schemas()
                .into_iter()
                .map(|s| kodelet_model::ToolSchema {
                    name: s.name,
                    description: s.description,
                    parameters: s.parameters,
                })
                .collect()
        } else {
            Vec::new()
        };
        CompletionRequest {
            system: self.system.clone(),
            messages: self.history.clone(),
            tools,
            model_override,
            prompt_cache: self.config.prompt_cache,
        }
    }

    // ── Compaction ──────────────────────────────────────────────────────────

    async fn maybe_compact(&mut self, cancel: &CancellationToken) -> Result<(), ThreadError> {
        let used = self.provider.count_tokens(&self.history) + self.system.len() / 4;
        if !self
            .compactor
            .should_compact(used, self.provider.context_window())
        {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(self.finish_cancelled().await);
        }
        self.run_compaction().await
    }

    async fn run_compaction(&mut self) -> Result<(), ThreadError> {
        match self.compactor.compact(&self.provider, &self.history).await {
            Ok((rebuilt, usage)) => {
                self.history = rebuilt;
                self.account_usage(&usage);
                Ok(())
            }
            Err(ProviderError::ContextOverflow(_)) => Err(ThreadError::ContextOverflow),
            Err(e) => Err(ThreadError::Provider(e)),
        }
    }

    // ── Bookkeeping ─────────────────────────────────────────────────────────

    fn account_usage(&mut self, usage: &Usage) {
        if usage.total_tokens() == 0 {
            return;
        }
        let total = {
            let mut sink = self.usage.lock().expect("usage sink poisoned");
            sink.add(usage);
            *sink
        };
        let cost = self.provider.price().cost(usage);
        self.record.usage.add(usage, cost);
        self.dispatcher.emit(AgentEvent::Usage {
            call: *usage,
            total,
        });
    }

    fn append_tool_result(
        &mut self,
        call_id: &str,
        name: &str,
        assistant: String,
        payload: serde_json::Value,
        is_error: bool,
    ) {
        self.dispatcher.emit(AgentEvent::ToolResult {
            call_id: call_id.to_string(),
            name: name.to_string(),
            output: assistant.clone(),
            is_error,
        });
        self.history
            .push(Message::tool_result(call_id, assistant, is_error));
        if !payload.is_null() {
            self.record.tool_results.insert(call_id.to_string(), payload);
        }
    }

    async fn finish_cancelled(&mut self) -> ThreadError {
        self.dispatcher.emit(AgentEvent::Cancelled);
        self.flush_persist().await;
        self.writer_done.cancel();
        ThreadError::Cancelled
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    fn snapshot_record(&mut self) -> ConversationRecord {
        self.record.messages = self.history.clone();
        self.record.touch();
        self.record.clone()
    }

    /// Fire-and-forget save through the bounded writer queue.  A full
    /// queue drops this save; the next one carries the full state anyway.
    fn queue_persist(&mut self) {
        let record = self.snapshot_record();
        if let Some(tx) = &self.persist_tx {
            if tx.try_send(PersistMsg::Save(record)).is_err() {
                debug!("persist queue full; skipping intermediate save");
            }
        }
    }

    /// Final save: enqueue the current state and wait (bounded) for the
    /// writer to confirm everything before it has landed.
    async fn flush_persist(&mut self) {
        let record = self.snapshot_record();
        let Some(tx) = &self.persist_tx else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(PersistMsg::Save(record)).await.is_err() {
            return;
        }
        if tx.send(PersistMsg::Flush(ack_tx)).await.is_err() {
            return;
        }
        if tokio::time::timeout(FLUSH_TIMEOUT, ack_rx).await.is_err() {
            warn!("persistence flush timed out");
        }
    }
}

/// Writer task: applies saves in order (writes for one id are totally
/// ordered through this single consumer) and answers flush markers.
/// Errors are logged and never fail the sender.
fn spawn_persist_writer(runtime: Arc<Runtime>) -> mpsc::Sender<PersistMsg> {
    let (tx, mut rx) = mpsc::channel::<PersistMsg>(PERSIST_QUEUE_DEPTH);
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg {
                PersistMsg::Save(record) => {
                    if let Err(e) = runtime.store.save(&record).await {
                        warn!(id = %record.id, error = %e, "failed to persist conversation");
                    }
                }
                PersistMsg::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    });
    tx
}
