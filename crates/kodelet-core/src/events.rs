// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Structured events emitted by a thread, fanned out to consumers.
//!
//! Single producer (the thread) → multiple consumers (console renderer,
//! conversation-stream writer).  Delivery is in-order per consumer; a slow
//! consumer is bounded by its buffer, and on overflow the oldest
//! non-terminal event is dropped and the loss surfaced on `Done`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::Notify;

use kodelet_model::Usage;

/// Events emitted during a single `send_message`.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The user turn that started this exchange.
    User { text: String },
    /// One assistant text block.
    Text { text: String },
    /// The model requested a tool call.
    ToolUse {
        call_id: String,
        name: String,
        args: serde_json::Value,
    },
    /// A tool call finished.
    ToolResult {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// Usage from one provider call plus the running thread totals.
    Usage { call: Usage, total: Usage },
    /// The context was cancelled; always the final event when it fires.
    Cancelled,
    /// The exchange completed.  `overflowed` reports whether this consumer
    /// lost events to buffer overflow.
    Done { text: String, overflowed: bool },
}

impl AgentEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Cancelled | AgentEvent::Done { .. })
    }

    /// Event kind tag used in headless NDJSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::User { .. } => "user",
            AgentEvent::Text { .. } => "text",
            AgentEvent::ToolUse { .. } => "tool-use",
            AgentEvent::ToolResult { .. } => "tool-result",
            AgentEvent::Usage { .. } => "usage",
            AgentEvent::Cancelled => "cancelled",
            AgentEvent::Done { .. } => "done",
        }
    }

    /// Newline-delimited JSON rendering for `--headless` mode.
    pub fn to_ndjson(&self) -> String {
        let v = match self {
            AgentEvent::User { text } => json!({ "kind": "user", "message": text }),
            AgentEvent::Text { text } => json!({ "kind": "text", "message": text }),
            AgentEvent::ToolUse { call_id, name, args } => json!({
                "kind": "tool-use", "call_id": call_id, "tool": name, "args": args,
            }),
            AgentEvent::ToolResult { call_id, name, output, is_error } => json!({
                "kind": "tool-result", "call_id": call_id, "tool": name,
                "message": output, "error": is_error,
            }),
            AgentEvent::Usage { call, total } => json!({
                "kind": "usage",
                "input_tokens": call.input_tokens,
                "output_tokens": call.output_tokens,
                "total_input_tokens": total.input_tokens,
                "total_output_tokens": total.output_tokens,
            }),
            AgentEvent::Cancelled => json!({ "kind": "cancelled" }),
            AgentEvent::Done { text, overflowed } => json!({
                "kind": "done", "message": text, "overflowed": overflowed,
            }),
        };
        v.to_string()
    }
}

struct ConsumerShared {
    buf: Mutex<VecDeque<AgentEvent>>,
    notify: Notify,
    capacity: usize,
    overflowed: AtomicBool,
    closed: AtomicBool,
}

/// Reading side of one subscription.
pub struct EventStream {
    shared: Arc<ConsumerShared>,
}

impl EventStream {
    /// Next event in producer order.  Returns `None` once the dispatcher
    /// is dropped and the buffer is drained.
    pub async fn next(&mut self) -> Option<AgentEvent> {
        loop {
            {
                let mut buf = self.shared.buf.lock().expect("event buffer poisoned");
                if let Some(ev) = buf.pop_front() {
                    return Some(ev);
                }
                if self.shared.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Drain whatever is currently buffered without waiting.
    pub fn drain_now(&mut self) -> Vec<AgentEvent> {
        let mut buf = self.shared.buf.lock().expect("event buffer poisoned");
        buf.drain(..).collect()
    }
}

/// Fan-out point owned by the thread.
pub struct Dispatcher {
    consumers: Mutex<Vec<Arc<ConsumerShared>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe with a bounded buffer.
    pub fn subscribe(&self, capacity: usize) -> EventStream {
        let shared = Arc::new(ConsumerShared {
            buf: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            overflowed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        self.consumers
            .lock()
            .expect("consumer list poisoned")
            .push(Arc::clone(&shared));
        EventStream { shared }
    }

    /// Deliver an event to every consumer, dropping each one's oldest
    /// non-terminal event on overflow.  `Done` carries the per-consumer
    /// overflow flag.
    pub fn emit(&self, event: AgentEvent) {
        let consumers = self.consumers.lock().expect("consumer list poisoned");
        for consumer in consumers.iter() {
            let mut ev = event.clone();
            if let AgentEvent::Done { overflowed, .. } = &mut ev {
                *overflowed = consumer.overflowed.load(Ordering::Acquire);
            }
            {
                let mut buf = consumer.buf.lock().expect("event buffer poisoned");
                if buf.len() >= consumer.capacity {
                    // Keep terminal events; lose the oldest droppable one.
                    if let Some(pos) = buf.iter().position(|e| !e.is_terminal()) {
                        buf.remove(pos);
                        consumer.overflowed.store(true, Ordering::Release);
                    }
                }
                buf.push_back(ev);
            }
            consumer.notify.notify_one();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let consumers = self.consumers.lock().expect("consumer list poisoned");
        for consumer in consumers.iter() {
            consumer.closed.store(true, Ordering::Release);
            consumer.notify.notify_one();
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
