// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! kodelet — an agentic coding assistant.
//!
//! Thin CLI glue over the core crates: build a runtime, wire the tool
//! registry, run a thread, render its events.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kodelet_core::{
    AgentEvent, Runtime, SendOptions, SubAgentTool, Thread, ThreadConfig, ThreadError, UsageSink,
};
use kodelet_store::{stream_live_updates, ConversationStore, QueryOptions, StreamOptions};
use kodelet_tools::{load_custom_tools, standard_registry};

mod accounts;
mod images;

/// Exit code when the user interrupted the run (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "kodelet", version, about = "An agentic coding assistant")]
struct Cli {
    /// Explicit config file path.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send a query to the agent and stream the result.
    Run(RunArgs),
    /// Inspect stored conversations.
    Conversation {
        #[command(subcommand)]
        command: ConversationCommand,
    },
    /// Manage subscription accounts.
    Accounts {
        #[command(subcommand)]
        command: accounts::AccountsCommand,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// The query; omit with --follow to tail a running conversation.
    query: Vec<String>,
    /// Resume a conversation id (or the most recent with no value).
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    resume: Option<String>,
    /// Follow live updates of the conversation instead of sending.
    #[arg(long)]
    follow: bool,
    /// Do not persist this conversation.
    #[arg(long)]
    no_save: bool,
    /// Emit newline-delimited JSON events on stdout.
    #[arg(long)]
    headless: bool,
    /// Attach an image file or URL to the query (repeatable).
    #[arg(long)]
    image: Vec<String>,
    /// Provider-call cap; 0 means no limit.
    #[arg(long)]
    max_turns: Option<u32>,
    /// Context-utilization fraction that triggers compaction.
    #[arg(long)]
    compact_ratio: Option<f32>,
    #[arg(long)]
    disable_auto_compact: bool,
    /// Skip connecting configured MCP servers.
    #[arg(long)]
    no_mcp: bool,
    /// Print only the final assistant text.
    #[arg(long)]
    result_only: bool,
    /// Use the configured weak model for this call.
    #[arg(long)]
    use_weak_model: bool,
    /// Subscription account alias.
    #[arg(long)]
    account: Option<String>,
}

#[derive(Subcommand)]
enum ConversationCommand {
    /// List stored conversations.
    List {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one conversation.
    Show { id: String },
    /// Delete a conversation.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; stdout is reserved for results (and NDJSON in
    // headless mode).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match kodelet_config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to load config: {e:#}");
            return ExitCode::from(1);
        }
    };

    let result = match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Conversation { command } => conversation(config, command).await,
        Command::Accounts { command } => accounts::run(config, command).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(mut config: kodelet_config::Config, args: RunArgs) -> anyhow::Result<ExitCode> {
    if let Some(account) = &args.account {
        config.model.account = Some(account.clone());
    }
    if let Some(n) = args.max_turns {
        config.agent.max_turns = n;
    }
    if let Some(r) = args.compact_ratio {
        config.agent.compact_ratio = r;
    }
    if args.disable_auto_compact {
        config.agent.disable_auto_compact = true;
    }

    let runtime = Runtime::from_config(config)?;

    if args.follow {
        return follow(runtime, args.resume.as_deref()).await;
    }

    let query = args.query.join(" ");
    let provider = runtime.provider()?;

    // Tool registry: builtins, user-declared custom tools, MCP bridges,
    // and the recursive sub-agent.
    let usage: UsageSink = Arc::new(std::sync::Mutex::new(Default::default()));
    let mut registry = standard_registry(&runtime.config.tools);
    let custom_dir = runtime
        .config
        .tools
        .custom_dir
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| kodelet_config::kodelet_dir().join("tools"));
    load_custom_tools(&mut registry, &custom_dir);
    let _mcp_clients = if args.no_mcp {
        Vec::new()
    } else {
        kodelet_mcp::connect_servers(&runtime.config.mcp_servers, &mut registry).await
    };
    registry.register(SubAgentTool::new(
        Arc::clone(&runtime),
        Arc::clone(&provider),
        Arc::clone(&usage),
    ));
    let registry = Arc::new(registry.filter(&runtime.config.tools.allow)?);

    let mut thread_config = ThreadConfig::from_config(&runtime.config);
    thread_config.persist = !args.no_save;

    let mut thread = match &args.resume {
        Some(id) => {
            let id = resolve_conversation_id(&runtime, id).await?;
            Thread::resume(
                Arc::clone(&runtime),
                provider,
                registry,
                thread_config,
                Arc::clone(&usage),
                &id,
            )
            .await?
        }
        None => Thread::new(
            Arc::clone(&runtime),
            provider,
            registry,
            thread_config,
            Arc::clone(&usage),
        ),
    };

    // Ctrl-C cancels the thread cooperatively.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    // Event consumer: human rendering, NDJSON, or silence (--result-only).
    let mut events = thread.subscribe(256);
    let headless = args.headless;
    let result_only = args.result_only;
    let printer = tokio::spawn(async move {
        while let Some(ev) = events.next().await {
            if headless {
                println!("{}", ev.to_ndjson());
            } else if !result_only {
                print_human(&ev);
            }
            if ev.is_terminal() {
                break;
            }
        }
    });

    let opts = SendOptions {
        images: images::resolve(&args.image)?,
        use_weak_model: args.use_weak_model,
    };
    let outcome = thread.send_message(&cancel, &query, opts).await;
    // Dropping the thread closes its dispatcher, which ends the printer's
    // event stream even when no terminal event was emitted (fatal errors).
    drop(thread);
    let _ = printer.await;

    match outcome {
        Ok(text) => {
            if result_only {
                println!("{text}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(ThreadError::Cancelled) => {
            eprintln!("interrupted");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(ExitCode::from(1))
        }
    }
}

fn print_human(ev: &AgentEvent) {
    match ev {
        AgentEvent::User { .. } => {}
        AgentEvent::Text { text } => println!("{text}"),
        AgentEvent::ToolUse { name, call_id, .. } => {
            println!("→ {name} [{call_id}]");
        }
        AgentEvent::ToolResult {
            name,
            output,
            is_error,
            ..
        } => {
            let rendered = kodelet_tools::render_human(
                name,
                &kodelet_tools::ToolOutput {
                    call_id: String::new(),
                    assistant: output.clone(),
                    payload: serde_json::Value::Null,
                    is_error: *is_error,
                },
            );
            println!("  {rendered}");
        }
        AgentEvent::Usage { total, .. } => {
            tracing::debug!(
                input = total.input_tokens,
                output = total.output_tokens,
                "usage"
            );
        }
        AgentEvent::Cancelled => println!("[cancelled]"),
        AgentEvent::Done { overflowed, .. } => {
            if *overflowed {
                warn!("event consumer overflowed; some output was dropped");
            }
        }
    }
}

/// Resolve `--resume`'s value: empty means the most recent conversation.
async fn resolve_conversation_id(runtime: &Runtime, id: &str) -> anyhow::Result<String> {
    if id.is_empty() {
        Ok(runtime.store.most_recent_id().await?)
    } else {
        Ok(id.to_string())
    }
}

async fn follow(runtime: Arc<Runtime>, resume: Option<&str>) -> anyhow::Result<ExitCode> {
    let id = resolve_conversation_id(&runtime, resume.unwrap_or("")).await?;
    let opts = StreamOptions {
        include_history: true,
        ..Default::default()
    };
    let cancel = opts.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    stream_live_updates(runtime.store.as_ref(), &id, opts, |_, msg| {
        match msg.as_text() {
            Some(text) => println!("{:?}: {text}", msg.role),
            None => println!("{:?}: [structured message]", msg.role),
        }
    })
    .await?;
    Ok(ExitCode::SUCCESS)
}

async fn conversation(
    config: kodelet_config::Config,
    command: ConversationCommand,
) -> anyhow::Result<ExitCode> {
    let runtime = Runtime::from_config(config)?;
    match command {
        ConversationCommand::List { provider, limit } => {
            let rows = runtime
                .store
                .query(&QueryOptions {
                    provider,
                    limit: Some(limit),
                    ..Default::default()
                })
                .await?;
            for row in rows {
                println!(
                    "{}  {}  {:>3} msgs  ${:.4}  {}",
                    row.id,
                    row.updated_at.format("%Y-%m-%d %H:%M"),
                    row.message_count,
                    row.cost_usd,
                    row.summary,
                );
            }
        }
        ConversationCommand::Show { id } => {
            let record = runtime.store.load(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        ConversationCommand::Delete { id } => {
            runtime.store.delete(&id).await?;
            println!("deleted {id}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
