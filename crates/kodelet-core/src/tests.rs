// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! End-to-end agent-loop tests driven by the scripted mock provider.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use kodelet_auth::CredentialStore;
use kodelet_config::Config;
use kodelet_model::{
    MessageContent, Provider, ProviderError, Role, ScriptedMockProvider, ScriptedTurn, Usage,
};
use kodelet_store::{ConversationStore, FileConversationStore};
use kodelet_tools::{standard_registry, ToolRegistry};

use crate::{
    AgentEvent, Runtime, SendOptions, Thread, ThreadConfig, ThreadError, UsageSink,
};

struct Harness {
    _dir: tempfile::TempDir,
    runtime: Arc<Runtime>,
    provider: Arc<ScriptedMockProvider>,
    usage: UsageSink,
}

impl Harness {
    fn new(scripts: Vec<ScriptedTurn>) -> Self {
        Self::with_provider(ScriptedMockProvider::new(scripts))
    }

    fn with_provider(provider: ScriptedMockProvider) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.model.provider = "mock".into();
        let runtime = Runtime::new(
            config,
            Arc::new(CredentialStore::new(
                dir.path().join("creds.json"),
                Arc::new(kodelet_auth::HttpRefresher::default()),
            )),
            Arc::new(FileConversationStore::new(dir.path().join("conversations"))),
        );
        Self {
            _dir: dir,
            runtime,
            provider: Arc::new(provider),
            usage: Arc::new(std::sync::Mutex::new(Usage::default())),
        }
    }

    fn registry(&self) -> Arc<ToolRegistry> {
        Arc::new(standard_registry(&self.runtime.config.tools))
    }

    fn thread(&self) -> Thread {
        self.thread_with_config(ThreadConfig::from_config(&self.runtime.config))
    }

    fn thread_with_config(&self, config: ThreadConfig) -> Thread {
        let provider: Arc<dyn Provider> = self.provider.clone();
        Thread::new(
            Arc::clone(&self.runtime),
            provider,
            self.registry(),
            config,
            Arc::clone(&self.usage),
        )
    }
}

fn kinds(events: &[AgentEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

async fn drain(stream: &mut crate::EventStream) -> Vec<AgentEvent> {
    let mut events = Vec::new();
    while let Some(ev) = stream.next().await {
        let terminal = ev.is_terminal();
        events.push(ev);
        if terminal {
            break;
        }
    }
    events
}

/// Every tool-use in `messages` has exactly one matching tool-result, at
/// a later index.
fn assert_pairing(messages: &[kodelet_model::Message]) {
    for (i, m) in messages.iter().enumerate() {
        if let MessageContent::ToolCall { tool_call_id, .. } = &m.content {
            let results: Vec<_> = messages
                .iter()
                .enumerate()
                .filter(|(j, r)| {
                    *j > i
                        && matches!(
                            &r.content,
                            MessageContent::ToolResult { tool_call_id: rid, .. } if rid == tool_call_id
                        )
                })
                .collect();
            assert_eq!(
                results.len(),
                1,
                "tool-use {tool_call_id} must have exactly one result"
            );
        }
    }
}

// ── Scenario 1: one-shot echo ────────────────────────────────────────────────

#[tokio::test]
async fn one_shot_echo() {
    let h = Harness::new(vec![ScriptedMockProvider::text_turn("hello", 12, 3)]);
    let mut thread = h.thread();
    let mut stream = thread.subscribe(64);

    let text = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "hello");

    let events = drain(&mut stream).await;
    assert_eq!(kinds(&events), vec!["user", "usage", "text", "done"]);
    assert_eq!(thread.usage().input_tokens, 12);

    // Persisted conversation has the user turn and the assistant turn.
    let record = h.runtime.store.load(thread.conversation_id()).await.unwrap();
    assert_eq!(record.messages.len(), 2);
    assert_eq!(record.messages[0].role, Role::User);
    assert_eq!(record.messages[1].as_text(), Some("hello"));
}

// ── Scenario 2: single tool use ──────────────────────────────────────────────

#[tokio::test]
async fn single_tool_use_round_trip() {
    let setup = tempfile::tempdir().unwrap();
    let path = setup.path().join("a.txt");
    std::fs::write(&path, "contents").unwrap();

    let h = Harness::new(vec![
        ScriptedMockProvider::tool_turn(vec![(
            "T1",
            "read_file",
            serde_json::json!({"path": path.to_string_lossy()}),
        )]),
        ScriptedMockProvider::text_turn("ok", 4, 2),
    ]);
    let mut thread = h.thread();

    let text = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "ok");

    let history = thread.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].as_text(), Some("hi"));
    assert!(matches!(
        &history[1].content,
        MessageContent::ToolCall { tool_call_id, .. } if tool_call_id == "T1"
    ));
    match &history[2].content {
        MessageContent::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            assert_eq!(tool_call_id, "T1");
            assert!(content.contains("contents"));
            assert!(!is_error);
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    assert_eq!(history[3].as_text(), Some("ok"));
    assert_pairing(history);
}

// ── Scenario 3: parallel tools with one error ────────────────────────────────

#[tokio::test]
async fn parallel_tools_with_one_error_keep_order() {
    let setup = tempfile::tempdir().unwrap();
    let a = setup.path().join("a.txt");
    let b = setup.path().join("b.txt");
    std::fs::write(&a, "alpha").unwrap();
    std::fs::write(&b, "beta").unwrap();
    let missing = setup.path().join("missing.txt");

    let h = Harness::new(vec![
        ScriptedMockProvider::tool_turn(vec![
            ("T1", "read_file", serde_json::json!({"path": a.to_string_lossy()})),
            ("T2", "read_file", serde_json::json!({"path": b.to_string_lossy()})),
            ("T3", "read_file", serde_json::json!({"path": missing.to_string_lossy()})),
        ]),
        ScriptedMockProvider::text_turn("summary of three reads", 9, 4),
    ]);
    let mut thread = h.thread();
    let mut stream = thread.subscribe(128);

    let text = thread
        .send_message(&CancellationToken::new(), "read them", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "summary of three reads");

    // Results arrive in request order; only T3 errors, nothing cancelled.
    let events = drain(&mut stream).await;
    let results: Vec<(String, bool)> = events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolResult {
                call_id, is_error, output, ..
            } => {
                assert!(!output.contains("cancelled"));
                Some((call_id.clone(), *is_error))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        results,
        vec![
            ("T1".to_string(), false),
            ("T2".to_string(), false),
            ("T3".to_string(), true)
        ]
    );
    assert_pairing(thread.history());

    // The follow-up turn saw all three results.
    let requests = h.provider.requests.lock().unwrap();
    let second = &requests[1];
    let result_count = second
        .messages
        .iter()
        .filter(|m| matches!(m.content, MessageContent::ToolResult { .. }))
        .count();
    assert_eq!(result_count, 3);
}

// ── Scenario 4: cancellation mid-bash ────────────────────────────────────────

#[tokio::test]
async fn cancellation_mid_bash_returns_promptly_without_dangling_tool_use() {
    let h = Harness::new(vec![ScriptedMockProvider::tool_turn(vec![(
        "T1",
        "bash",
        serde_json::json!({"command": "sleep 10"}),
    )])]);
    let mut thread = h.thread();
    let mut stream = thread.subscribe(64);

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let started = std::time::Instant::now();
    let err = thread
        .send_message(&cancel, "run it", SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadError::Cancelled));
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "must return within the grace period"
    );

    let events = drain(&mut stream).await;
    assert!(matches!(events.last(), Some(AgentEvent::Cancelled)));

    // Persisted history pairs the interrupted tool-use with a synthetic
    // error result.
    let record = h.runtime.store.load(thread.conversation_id()).await.unwrap();
    assert_pairing(&record.messages);
    let has_error_result = record.messages.iter().any(|m| {
        matches!(&m.content, MessageContent::ToolResult { is_error, .. } if *is_error)
    });
    assert!(has_error_result);
}

// ── Scenario 5: auto-compaction ──────────────────────────────────────────────

#[tokio::test]
async fn auto_compact_fires_and_shrinks_next_request() {
    let setup = tempfile::tempdir().unwrap();
    let big = setup.path().join("big.txt");
    // ~3000 tokens of file content at chars/4 — far over a 1000-token window.
    std::fs::write(&big, "x".repeat(12_000)).unwrap();

    let provider = ScriptedMockProvider::new(vec![
        ScriptedMockProvider::tool_turn(vec![(
            "T1",
            "read_file",
            serde_json::json!({"path": big.to_string_lossy()}),
        )]),
        // The compaction summary call.
        ScriptedMockProvider::text_turn("compact summary of the read", 100, 40),
        // The post-compaction assistant turn.
        ScriptedMockProvider::text_turn("done", 5, 2),
    ])
    .with_context_window(1000);
    let h = Harness::with_provider(provider);

    let mut thread = h.thread_with_config(ThreadConfig {
        compact_ratio: 0.5,
        compaction_keep_recent: 1,
        ..ThreadConfig::from_config(&h.runtime.config)
    });
    let text = thread
        .send_message(&CancellationToken::new(), "read the big file", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "done");

    let requests = h.provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 3, "tool turn, compaction call, final turn");
    // The request after compaction fits half the window.
    let final_tokens: usize = requests[2].messages.iter().map(|m| m.approx_tokens()).sum();
    assert!(
        final_tokens <= 500,
        "post-compaction request must fit 0.5× window, got {final_tokens}"
    );
    // Compaction-call usage is included in the thread totals.
    assert!(thread.usage().input_tokens >= 100);
}

// ── Turn cap boundaries ──────────────────────────────────────────────────────

#[tokio::test]
async fn turn_cap_one_refuses_tools_and_wraps_up() {
    let h = Harness::new(vec![
        ScriptedMockProvider::tool_turn(vec![(
            "T1",
            "bash",
            serde_json::json!({"command": "echo hi"}),
        )]),
        ScriptedMockProvider::text_turn("stopping here", 3, 3),
    ]);
    let mut thread = h.thread_with_config(ThreadConfig {
        max_turns: 1,
        ..ThreadConfig::from_config(&h.runtime.config)
    });

    let text = thread
        .send_message(&CancellationToken::new(), "go", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "stopping here");

    // The requested tool was not executed; it got a synthetic error result.
    let history = thread.history();
    assert_pairing(history);
    let refused = history.iter().any(|m| {
        matches!(
            &m.content,
            MessageContent::ToolResult { content, is_error, .. }
                if *is_error && content.contains("turn limit")
        )
    });
    assert!(refused, "cap=1 must refuse the requested tools");
    // The model was told to stop.
    let told = history
        .iter()
        .any(|m| m.as_text().map(|t| t.contains("Turn limit reached")).unwrap_or(false));
    assert!(told);
}

#[tokio::test]
async fn turn_cap_zero_means_unlimited() {
    let setup = tempfile::tempdir().unwrap();
    let f = setup.path().join("f.txt");
    std::fs::write(&f, "data").unwrap();
    let tool_use = |id: &str| {
        ScriptedMockProvider::tool_turn(vec![(
            id,
            "read_file",
            serde_json::json!({"path": f.to_string_lossy()}),
        )])
    };
    // Five tool rounds then text — must run to completion with cap 0.
    let h = Harness::new(vec![
        tool_use("T1"),
        tool_use("T2"),
        tool_use("T3"),
        tool_use("T4"),
        tool_use("T5"),
        ScriptedMockProvider::text_turn("finished", 1, 1),
    ]);
    let mut thread = h.thread_with_config(ThreadConfig {
        max_turns: 0,
        ..ThreadConfig::from_config(&h.runtime.config)
    });
    let text = thread
        .send_message(&CancellationToken::new(), "loop a lot", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "finished");
    assert_eq!(h.provider.requests.lock().unwrap().len(), 6);
}

// ── Laws ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn usage_totals_never_decrease_across_sends() {
    let h = Harness::new(vec![
        ScriptedMockProvider::text_turn("one", 10, 5),
        ScriptedMockProvider::text_turn("two", 20, 7),
    ]);
    let mut thread = h.thread();
    let cancel = CancellationToken::new();

    thread
        .send_message(&cancel, "first", SendOptions::default())
        .await
        .unwrap();
    let after_first = thread.usage();
    thread
        .send_message(&cancel, "second", SendOptions::default())
        .await
        .unwrap();
    let after_second = thread.usage();

    assert_eq!(after_first.input_tokens, 10);
    assert_eq!(after_second.input_tokens, 30);
    assert!(after_second.output_tokens >= after_first.output_tokens);
}

#[tokio::test]
async fn image_only_input_on_empty_history_is_valid() {
    let h = Harness::new(vec![ScriptedMockProvider::text_turn("a red square", 8, 4)]);
    let mut thread = h.thread();
    let opts = SendOptions {
        images: vec!["data:image/png;base64,AAAA".into()],
        ..Default::default()
    };
    let text = thread
        .send_message(&CancellationToken::new(), "", opts)
        .await
        .unwrap();
    assert_eq!(text, "a red square");

    let requests = h.provider.requests.lock().unwrap();
    let first_msg = &requests[0].messages[0];
    assert!(matches!(
        &first_msg.content,
        MessageContent::ContentParts(parts) if parts.len() == 1
    ));
}

#[tokio::test]
async fn empty_query_without_images_is_invalid_input() {
    let h = Harness::new(vec![]);
    let mut thread = h.thread();
    let err = thread
        .send_message(&CancellationToken::new(), "", SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadError::InvalidInput(_)));
}

#[tokio::test]
async fn weak_model_flag_sets_model_override() {
    let h = Harness::new(vec![ScriptedMockProvider::text_turn("cheap answer", 1, 1)]);
    let mut thread = h.thread();
    thread
        .send_message(
            &CancellationToken::new(),
            "quick",
            SendOptions {
                use_weak_model: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let requests = h.provider.requests.lock().unwrap();
    assert_eq!(
        requests[0].model_override.as_deref(),
        Some("claude-haiku-4-5")
    );
}

// ── Provider error recovery ──────────────────────────────────────────────────

#[tokio::test]
async fn retryable_error_is_absorbed() {
    let h = Harness::new(vec![
        ScriptedTurn::Error(ProviderError::Retryable {
            message: "529 overloaded".into(),
            retry_after: Some(Duration::from_millis(1)),
        }),
        ScriptedMockProvider::text_turn("recovered", 2, 2),
    ]);
    let mut thread = h.thread();
    let text = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "recovered");
}

#[tokio::test]
async fn auth_expired_is_retried_once() {
    let h = Harness::new(vec![
        ScriptedTurn::Error(ProviderError::AuthExpired("401".into())),
        ScriptedMockProvider::text_turn("after refresh", 2, 2),
    ]);
    let mut thread = h.thread();
    let text = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(text, "after refresh");
}

#[tokio::test]
async fn second_auth_failure_is_fatal() {
    let h = Harness::new(vec![
        ScriptedTurn::Error(ProviderError::AuthExpired("401".into())),
        ScriptedTurn::Error(ProviderError::AuthExpired("401 again".into())),
    ]);
    let mut thread = h.thread();
    let err = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ThreadError::Provider(ProviderError::AuthExpired(_))
    ));
}

#[tokio::test]
async fn fatal_error_aborts_immediately() {
    let h = Harness::new(vec![ScriptedTurn::Error(ProviderError::Fatal(
        "schema rejected".into(),
    ))]);
    let mut thread = h.thread();
    let err = thread
        .send_message(&CancellationToken::new(), "hi", SendOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ThreadError::Provider(ProviderError::Fatal(_))));
    assert_eq!(h.provider.requests.lock().unwrap().len(), 1);
}

// ── Persistence laws ─────────────────────────────────────────────────────────

#[tokio::test]
async fn save_load_round_trip_preserves_record() {
    let h = Harness::new(vec![ScriptedMockProvider::text_turn("answer", 6, 3)]);
    let mut thread = h.thread();
    thread
        .send_message(&CancellationToken::new(), "question", SendOptions::default())
        .await
        .unwrap();

    let id = thread.conversation_id().to_string();
    let first = h.runtime.store.load(&id).await.unwrap();
    let second = h.runtime.store.load(&id).await.unwrap();
    assert_eq!(first, second);
    assert!(first.updated_at >= first.created_at);
    assert_eq!(first.usage.input_tokens, 6);
}

#[tokio::test]
async fn resume_restores_history() {
    let h = Harness::new(vec![
        ScriptedMockProvider::text_turn("first answer", 1, 1),
        ScriptedMockProvider::text_turn("second answer", 1, 1),
    ]);
    let cancel = CancellationToken::new();
    let id = {
        let mut thread = h.thread();
        thread
            .send_message(&cancel, "first question", SendOptions::default())
            .await
            .unwrap();
        thread.conversation_id().to_string()
    };

    let provider: Arc<dyn Provider> = h.provider.clone();
    let mut resumed = Thread::resume(
        Arc::clone(&h.runtime),
        provider,
        h.registry(),
        ThreadConfig::from_config(&h.runtime.config),
        Arc::clone(&h.usage),
        &id,
    )
    .await
    .unwrap();
    assert_eq!(resumed.history().len(), 2);
    resumed
        .send_message(&cancel, "second question", SendOptions::default())
        .await
        .unwrap();
    assert_eq!(resumed.history().len(), 4);

    let record = h.runtime.store.load(&id).await.unwrap();
    assert_eq!(record.messages.len(), 4);
}

// ── Sub-agent recursion ──────────────────────────────────────────────────────

#[tokio::test]
async fn sub_agent_usage_is_attributed_to_outer_sink() {
    let h = Harness::new(vec![ScriptedMockProvider::text_turn("inner result", 42, 17)]);
    let provider: Arc<dyn Provider> = h.provider.clone();
    let tool = crate::SubAgentTool::new(
        Arc::clone(&h.runtime),
        provider,
        Arc::clone(&h.usage),
    );

    use kodelet_tools::{Tool, ToolState};
    let state = ToolState::new("/tmp");
    let out = tool
        .execute(
            &state,
            &kodelet_tools::ToolCall {
                id: "S1".into(),
                name: "sub_agent".into(),
                args: serde_json::json!({"prompt": "explore the repo"}),
            },
        )
        .await;
    assert!(!out.is_error, "{}", out.assistant);
    assert_eq!(out.assistant, "inner result");
    // The inner thread's 42 input tokens land in the shared sink.
    assert_eq!(h.usage.lock().unwrap().input_tokens, 42);
}

#[tokio::test]
async fn send_and_collect_returns_text_and_usage() {
    // The harness config selects the echo mock via runtime.provider().
    let h = Harness::new(vec![]);
    let (text, usage) = crate::send_and_collect(
        Arc::clone(&h.runtime),
        h.registry(),
        "ping",
        SendOptions::default(),
    )
    .await
    .unwrap();
    assert!(text.contains("MOCK: ping"));
    assert_eq!(usage.input_tokens, 10);
}

#[tokio::test]
async fn sub_agent_rejects_empty_prompt() {
    let h = Harness::new(vec![]);
    let provider: Arc<dyn Provider> = h.provider.clone();
    let tool = crate::SubAgentTool::new(Arc::clone(&h.runtime), provider, Arc::clone(&h.usage));
    use kodelet_tools::Tool;
    assert!(tool.validate(&serde_json::json!({"prompt": "  "})).is_err());
    assert!(tool.validate(&serde_json::json!({})).is_err());
}
