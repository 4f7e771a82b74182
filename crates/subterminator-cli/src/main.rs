//! `subterminator` binary: the CLI surface spec.md §1 explicitly scopes out
//! of the core engine. Parses flags, wires the environment into the
//! engine's explicit constructor arguments, and maps `TaskResult`/
//! `EngineError` to the exit codes spec.md §6 specifies.
//!
//! Modeled on `openclaw-cli/src/main.rs`'s `Parser`/`Subcommand` layout.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use subterminator_core::{EngineError, TaskReason, TaskResult};
use subterminator_engine::RunConfig;
use subterminator_llm::select_provider;
use subterminator_mcp::McpServerConfig;
use subterminator_services::ServiceRegistry;
use tokio_util::sync::CancellationToken;

const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TURNS: u32 = 20;

/// SubTerminator — an LLM-driven browser agent for irreversible account tasks.
#[derive(Parser)]
#[command(name = "subterminator", version, about = "AI-led browser task orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registered service's task to completion.
    Run {
        /// Registered service name (see `subterminator list`).
        #[arg(long)]
        service: String,
        /// Bound on assistant turns before giving up.
        #[arg(long, default_value_t = DEFAULT_MAX_TURNS)]
        max_turns: u32,
        /// Stop short of calling any non-read-only MCP tool; report the
        /// proposed action instead of taking it.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Skip irreversible-action checkpoints. The auth-wall pause is
        /// unaffected — only `should_checkpoint`'s checkpoint half is
        /// disabled, per spec.md §4.2.1.
        #[arg(long, default_value_t = false)]
        no_checkpoints: bool,
        /// Model name; routes to Anthropic or OpenAI-compatible by prefix.
        #[arg(long, env = "SUBTERMINATOR_MODEL", default_value = DEFAULT_MODEL)]
        model: String,
        /// Command used to launch the MCP browser server.
        #[arg(long, default_value = "npx")]
        mcp_command: String,
        /// Arguments passed to the MCP server command.
        #[arg(long, default_values_t = vec!["-y".to_string(), "@playwright/mcp@latest".to_string()])]
        mcp_arg: Vec<String>,
        /// Emit the final `TaskResult` as JSON instead of a summary line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List registered services.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "subterminator=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => {
            run_list();
            ExitCode::from(0)
        }
        Commands::Run {
            service,
            max_turns,
            dry_run,
            no_checkpoints,
            model,
            mcp_command,
            mcp_arg,
            json,
        } => run_service(service, max_turns, dry_run, no_checkpoints, model, mcp_command, mcp_arg, json).await,
    }
}

fn run_list() {
    let registry = ServiceRegistry::default();
    let mut services = registry.list();
    services.sort_by_key(|(name, _)| *name);
    for (name, description) in services {
        println!("{:<12} {}", name.bold(), description);
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_service(
    service: String,
    max_turns: u32,
    dry_run: bool,
    no_checkpoints: bool,
    model: String,
    mcp_command: String,
    mcp_arg: Vec<String>,
    json: bool,
) -> ExitCode {
    let registry = ServiceRegistry::default();

    let provider = match select_provider(&model) {
        Ok(p) => p,
        Err(err) => return report_engine_error(&err),
    };

    let profile_dir = std::env::temp_dir().join("subterminator").join(&service);
    let mcp = McpServerConfig::new(mcp_command, mcp_arg, profile_dir);

    let mut config = RunConfig::new(service, mcp);
    config.max_turns = max_turns;
    config.dry_run = dry_run;
    config.no_checkpoints = no_checkpoints;

    let cancel = CancellationToken::new();
    let sigint_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sigint_cancel.cancel();
        }
    });

    let outcome = subterminator_engine::run(&registry, provider, config, cancel).await;

    match outcome {
        Ok(result) => report_task_result(&result, json),
        Err(err) => report_engine_error(&err),
    }
}

fn was_sigint(result: &TaskResult) -> bool {
    result.reason == TaskReason::HumanRejected && result.error.as_deref() == Some("interrupted by SIGINT")
}

fn report_task_result(result: &TaskResult, json: bool) -> ExitCode {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("failed to serialize task result: {e}"),
        }
    } else {
        print_summary_line(result);
    }

    if was_sigint(result) {
        return ExitCode::from(130);
    }

    if result.success {
        ExitCode::from(0)
    } else {
        ExitCode::from(1)
    }
}

fn print_summary_line(result: &TaskResult) {
    let url = result.final_url.as_deref().unwrap_or("(unknown)");
    if result.success {
        println!(
            "{} task completed in {} turns at {}",
            "✓".green().bold(),
            result.turns,
            url
        );
    } else {
        println!(
            "{} task did not complete: {} ({} turns, last page: {})",
            "✗".red().bold(),
            result.reason,
            result.turns,
            url
        );
        if let Some(ref error) = result.error {
            println!("  {}", error.dimmed());
        }
    }
}

fn report_engine_error(err: &EngineError) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), err);
    ExitCode::from(err.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigint_detected_from_reason_and_message() {
        let result = TaskResult::failure(
            TaskReason::HumanRejected,
            2,
            Some("https://netflix.com".to_string()),
            Some("interrupted by SIGINT".to_string()),
            None,
        );
        assert!(was_sigint(&result));
    }

    #[test]
    fn checkpoint_rejection_is_not_mistaken_for_sigint() {
        let result = TaskResult::failure(
            TaskReason::HumanRejected,
            2,
            Some("https://netflix.com".to_string()),
            None,
            None,
        );
        assert!(!was_sigint(&result));
    }
}
