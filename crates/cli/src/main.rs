//! CLI entrypoint and subcommand orchestration.

mod builtin;
mod config;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use agent::{AgentRuntime, ConversationHistory, OpenAiProvider, ToolRegistry};
use anyhow::Context;
use clap::{Parser, Subcommand};
use proto::ProgressEvent;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Top-level command-line arguments for the agentrt application.
#[derive(Parser)]
#[command(name = "agentrt")]
#[command(about = "Tool-calling agent runtime", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.agentrt/logs/
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Skip the built-in local tools
    #[arg(long, default_value_t = false)]
    no_builtin: bool,

    #[command(subcommand)]
    command: Commands,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Run a single request through the agent and exit
    Run {
        /// Message to send to the agent
        #[arg(short = 'e', long)]
        exec: String,
    },

    /// List registered tools
    Tools {
        /// Print the full registry export as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Invoke one tool directly and print its result envelope
    Call {
        /// Registered tool name
        name: String,

        /// JSON arguments
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Run { .. } => "run",
            Commands::Tools { .. } => "tools",
            Commands::Call { .. } => "call",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.debug);

    if cli.debug {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = cli.command.label(),
            log_level = %cli.log_level,
            "========== agentrt session start =========="
        );
    }

    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    let registry = build_registry(&config, !cli.no_builtin).await?;

    match cli.command {
        Commands::Run { exec } => cmd_run(config, registry, exec).await,
        Commands::Tools { json } => cmd_tools(&registry, json),
        Commands::Call { name, args } => cmd_call(&registry, &name, &args).await,
    }
}

/// Console logging plus, with `--debug`, a daily-rotated debug log file.
fn init_tracing(
    log_level: &str,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    if !debug {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = std::path::PathBuf::from(home).join(".agentrt").join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info"));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Some(guard)
}

/// Registers built-in tools, then every configured MCP server.
///
/// A server that fails to attach is logged and skipped.
async fn build_registry(config: &Config, builtin: bool) -> anyhow::Result<Arc<ToolRegistry>> {
    let mut registry = ToolRegistry::with_policy(config.registry.duplicate_policy);
    if builtin {
        registry.register_all(builtin::builtin_tools())?;
    }
    for server in &config.mcp_servers {
        let id = server.id.clone();
        match registry.attach_mcp_server(server.clone(), None).await {
            Ok(names) => debug!(server = %id, tools = ?names, "MCP server attached"),
            Err(proto::Error::Tool(e)) => return Err(e.into()),
            Err(e) => warn!(server = %id, error = %e, "Skipping MCP server"),
        }
    }
    info!(tools = registry.len(), "Tool registry ready");
    Ok(Arc::new(registry))
}

/// Executes one request against the agent and exits.
async fn cmd_run(config: Config, registry: Arc<ToolRegistry>, exec: String) -> anyhow::Result<()> {
    if config.agent.api_key.is_empty() {
        anyhow::bail!("no API key configured; set AGENTRT_API_KEY or agent.api_key");
    }
    let llm = match config.agent.effective_base_url() {
        Some(url) => OpenAiProvider::with_base_url(&config.agent.api_key, url),
        None => OpenAiProvider::new(&config.agent.api_key),
    };
    let runtime = AgentRuntime::new(Arc::new(llm), registry, config.agent.runtime_config());

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let (progress_tx, progress_rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_progress(progress_rx));

    let mut history = ConversationHistory::with_user(&exec);
    let result = runtime
        .run_with_progress(&mut history, &cancel, progress_tx)
        .await;
    printer.await.ok();

    let outcome = result.with_context(|| format!("conversation {} failed", history.id()))?;
    println!("{}", outcome.text);
    debug!(
        rounds = outcome.rounds,
        prompt_tokens = outcome.usage.prompt_tokens,
        completion_tokens = outcome.usage.completion_tokens,
        "Run complete"
    );
    Ok(())
}

async fn print_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        if let Some(line) = format_progress(&event) {
            eprintln!("{line}");
        }
    }
}

fn format_progress(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::LlmThinking { .. } => None,
        ProgressEvent::ToolCallStarted {
            tool_name, args, ..
        } => Some(format!("→ {tool_name} {args}")),
        ProgressEvent::ToolCallFinished {
            tool_name, success, ..
        } => Some(format!(
            "← {tool_name} {}",
            if *success { "ok" } else { "failed" }
        )),
    }
}

fn cmd_tools(registry: &ToolRegistry, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&registry.export_all())?);
        return Ok(());
    }
    for line in tool_lines(registry) {
        println!("{line}");
    }
    Ok(())
}

fn tool_lines(registry: &ToolRegistry) -> Vec<String> {
    registry
        .categories()
        .iter()
        .flat_map(|(category, names)| {
            names.iter().filter_map(move |name| {
                let tool = registry.get(name)?;
                Some(format!("[{category}] {name}: {}", tool.description()))
            })
        })
        .collect()
}

async fn cmd_call(registry: &ToolRegistry, name: &str, args: &str) -> anyhow::Result<()> {
    let args: Value = serde_json::from_str(args).context("--args must be valid JSON")?;
    let envelope = registry.dispatch(name, args).await;
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    if !envelope.success {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["agentrt", "call", "read_file", "--args", r#"{"path":"x"}"#]);
        match cli.command {
            Commands::Call { name, args } => {
                assert_eq!(name, "read_file");
                assert_eq!(args, r#"{"path":"x"}"#);
            }
            _ => panic!("expected call"),
        }

        let cli = Cli::parse_from(["agentrt", "--debug", "run", "-e", "hello"]);
        assert!(cli.debug);
        assert_eq!(cli.command.label(), "run");

        let cli = Cli::parse_from(["agentrt", "tools", "--json"]);
        assert!(matches!(cli.command, Commands::Tools { json: true }));
    }

    #[tokio::test]
    async fn registry_lists_builtin_tools_by_category() {
        let registry = build_registry(&Config::default(), true)
            .await
            .expect("registry");
        assert_eq!(
            tool_lines(&registry),
            [
                "[utility] current_time: Return the current date and time.",
                "[file] read_file: Read a UTF-8 text file from the local filesystem",
            ]
        );

        let empty = build_registry(&Config::default(), false)
            .await
            .expect("registry");
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn unreachable_server_is_skipped() {
        let mut config = Config::default();
        config.mcp_servers.push(mcp::ServerConnection::stdio(
            "gone",
            "definitely-not-an-mcp-server",
        ));
        let registry = build_registry(&config, true).await.expect("registry");
        assert_eq!(registry.len(), 2);
        assert!(registry.attached_servers().is_empty());
    }

    #[test]
    fn progress_lines_describe_tool_calls() {
        let started = ProgressEvent::ToolCallStarted {
            call_id: "c1".to_string(),
            tool_name: "read_file".to_string(),
            args: json!({"path": "a"}),
        };
        assert_eq!(
            format_progress(&started).as_deref(),
            Some(r#"→ read_file {"path":"a"}"#)
        );
        let finished = ProgressEvent::ToolCallFinished {
            call_id: "c1".to_string(),
            tool_name: "read_file".to_string(),
            success: false,
        };
        assert_eq!(
            format_progress(&finished).as_deref(),
            Some("← read_file failed")
        );
        assert!(format_progress(&ProgressEvent::LlmThinking { round: 0 }).is_none());
    }
}
