// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Capability, ToolCall, ToolOutput, ToolRegistry, ToolState};

/// Bound on tool executions in flight for a single batch.
pub const MAX_CONCURRENT_TOOLS: usize = 4;

/// Runs a turn's tool-use batch.
///
/// Scheduling rules:
/// - at most [`MAX_CONCURRENT_TOOLS`] executions run concurrently;
/// - a tool whose capability is `Mutating` holds the write side of the
///   mutation lock for its whole execution, so it never overlaps any other
///   tool of the batch (which hold the read side);
/// - results come back in the model's original request order regardless of
///   completion order;
/// - a timeout or cancellation yields an error tool-result, never a
///   loop-level failure.
pub struct Executor {
    registry: Arc<ToolRegistry>,
    state: Arc<ToolState>,
    slots: Arc<Semaphore>,
    mutation: Arc<RwLock<()>>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, state: Arc<ToolState>) -> Self {
        Self {
            registry,
            state,
            slots: Arc::new(Semaphore::new(MAX_CONCURRENT_TOOLS)),
            mutation: Arc::new(RwLock::new(())),
        }
    }

    pub fn state(&self) -> &Arc<ToolState> {
        &self.state
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute a batch of tool calls and return one output per call, in
    /// request order.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        cancel: &CancellationToken,
    ) -> Vec<ToolOutput> {
        let mut tasks = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let registry = Arc::clone(&self.registry);
            let state = Arc::clone(&self.state);
            let slots = Arc::clone(&self.slots);
            let mutation = Arc::clone(&self.mutation);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                run_one(registry, state, slots, mutation, cancel, call).await
            }));
        }

        // Await in order, preserving result indices for correct history
        // serialization.  One panic does not cancel the siblings.
        let mut outputs = Vec::with_capacity(calls.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let output = match task.await {
                Ok(output) => output,
                Err(e) => ToolOutput::err(&calls[i].id, format!("tool execution panicked: {e}")),
            };
            outputs.push(output);
        }
        outputs
    }
}

async fn run_one(
    registry: Arc<ToolRegistry>,
    state: Arc<ToolState>,
    slots: Arc<Semaphore>,
    mutation: Arc<RwLock<()>>,
    cancel: CancellationToken,
    call: ToolCall,
) -> ToolOutput {
    if cancel.is_cancelled() {
        return ToolOutput::err(&call.id, "cancelled before execution");
    }

    let _permit = match slots.acquire_owned().await {
        Ok(p) => p,
        Err(_) => return ToolOutput::err(&call.id, "executor shut down"),
    };

    let (mutating, timeout) = match registry.get(&call.name) {
        Some(tool) => (tool.capability() == Capability::Mutating, tool.timeout()),
        // Unknown tools fall through to the registry's error result below;
        // they need no lease and get the default timeout.
        None => (false, Capability::ReadOnly.default_timeout()),
    };

    // Mutating tools take the write side so nothing else runs beside them.
    let _read_lease;
    let _write_lease;
    if mutating {
        _write_lease = Some(mutation.write_owned().await);
        _read_lease = None;
    } else {
        _read_lease = Some(mutation.read_owned().await);
        _write_lease = None;
    }

    debug!(tool = %call.name, call_id = %call.id, mutating, "executing tool");

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            // Dropping the execute future aborts subprocesses via
            // kill_on_drop and in-flight requests via client drop.
            ToolOutput::err(&call.id, "cancelled")
        }
        result = tokio::time::timeout(timeout, registry.execute(&state, &call)) => {
            match result {
                Ok(output) => output,
                Err(_) => ToolOutput::err(
                    &call.id,
                    format!("timeout after {}s", timeout.as_secs()),
                ),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::Tool;

    /// Sleeps for the given millis, tracking the peak number of concurrent
    /// executions through a shared gauge.
    struct SleepTool {
        name: &'static str,
        millis: u64,
        capability: Capability,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        fn capability(&self) -> Capability {
            self.capability
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(200)
        }
        fn validate(&self, _args: &Value) -> Result<(), String> {
            Ok(())
        }
        async fn execute(&self, _state: &ToolState, call: &ToolCall) -> ToolOutput {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            ToolOutput::ok(&call.id, format!("slept:{}", self.name))
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            args: json!({}),
        }
    }

    fn executor_with(tools: Vec<SleepTool>) -> Executor {
        let mut reg = ToolRegistry::new();
        for t in tools {
            reg.register(t);
        }
        Executor::new(Arc::new(reg), Arc::new(ToolState::new("/tmp")))
    }

    fn gauges() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test]
    async fn results_come_back_in_request_order() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![
            SleepTool { name: "slow", millis: 80, capability: Capability::ReadOnly, running: running.clone(), peak: peak.clone() },
            SleepTool { name: "fast", millis: 5, capability: Capability::ReadOnly, running, peak },
        ]);
        let calls = vec![call("1", "slow"), call("2", "fast")];
        let outputs = exec.execute_batch(&calls, &CancellationToken::new()).await;
        assert_eq!(outputs[0].call_id, "1");
        assert_eq!(outputs[0].assistant, "slept:slow");
        assert_eq!(outputs[1].call_id, "2");
    }

    #[tokio::test]
    async fn readonly_tools_overlap() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![SleepTool {
            name: "read",
            millis: 40,
            capability: Capability::ReadOnly,
            running,
            peak: peak.clone(),
        }]);
        let calls = vec![call("1", "read"), call("2", "read"), call("3", "read")];
        exec.execute_batch(&calls, &CancellationToken::new()).await;
        assert!(
            peak.load(Ordering::SeqCst) >= 2,
            "read-only tools should run concurrently"
        );
    }

    #[tokio::test]
    async fn mutating_tool_never_overlaps_others() {
        let (running, peak) = gauges();
        let mut reg = ToolRegistry::new();
        reg.register(SleepTool {
            name: "read",
            millis: 30,
            capability: Capability::ReadOnly,
            running: running.clone(),
            peak: peak.clone(),
        });
        reg.register(SleepTool {
            name: "write",
            millis: 30,
            capability: Capability::Mutating,
            running,
            peak: peak.clone(),
        });
        let exec = Executor::new(Arc::new(reg), Arc::new(ToolState::new("/tmp")));
        let calls = vec![call("1", "write"), call("2", "read"), call("3", "write")];
        let outputs = exec.execute_batch(&calls, &CancellationToken::new()).await;
        assert_eq!(outputs.len(), 3);
        assert_eq!(
            peak.load(Ordering::SeqCst),
            1,
            "a mutating tool must serialize with every other tool"
        );
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![SleepTool {
            name: "read",
            millis: 30,
            capability: Capability::ReadOnly,
            running,
            peak: peak.clone(),
        }]);
        let calls: Vec<ToolCall> = (0..10).map(|i| call(&i.to_string(), "read")).collect();
        exec.execute_batch(&calls, &CancellationToken::new()).await;
        assert!(peak.load(Ordering::SeqCst) <= MAX_CONCURRENT_TOOLS);
    }

    #[tokio::test]
    async fn timeout_yields_error_result_not_panic() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![SleepTool {
            name: "slow",
            millis: 10_000,
            capability: Capability::ReadOnly,
            running,
            peak,
        }]);
        let outputs = exec
            .execute_batch(&[call("1", "slow")], &CancellationToken::new())
            .await;
        assert!(outputs[0].is_error);
        assert!(outputs[0].assistant.contains("timeout"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_running_tools() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![SleepTool {
            name: "slow",
            millis: 10_000,
            capability: Capability::ReadOnly,
            running,
            peak,
        }]);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel2.cancel();
        });
        let started = std::time::Instant::now();
        let outputs = exec.execute_batch(&[call("1", "slow")], &cancel).await;
        assert!(outputs[0].is_error);
        assert!(outputs[0].assistant.contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unknown_tool_in_batch_is_isolated_error() {
        let (running, peak) = gauges();
        let exec = executor_with(vec![SleepTool {
            name: "read",
            millis: 1,
            capability: Capability::ReadOnly,
            running,
            peak,
        }]);
        let calls = vec![call("1", "read"), call("2", "ghost")];
        let outputs = exec.execute_batch(&calls, &CancellationToken::new()).await;
        assert!(!outputs[0].is_error);
        assert!(outputs[1].is_error);
        assert!(outputs[1].assistant.contains("unknown tool"));
    }
}
