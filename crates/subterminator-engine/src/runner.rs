//! Task Runner: the turn loop, tool dispatch, and every terminal decision.
//!
//! Grounded on `openclaw-agent/src/runtime.rs`'s `run_agent_turn` (the
//! round-counter loop shape, the "text response with no tool call" nudge
//! pattern, appending tool results back into history) and on
//! `openclaw-gateway/src/main.rs`'s shutdown-future pattern, reworked
//! around a `CancellationToken` instead of a raw `tokio::select!` on
//! `ctrl_c()` directly — the token lets scenario tests simulate SIGINT
//! without sending a real signal, and lets the CLI own actual signal
//! registration (see DESIGN.md's open-question resolution on this).

use subterminator_core::{
    parse_snapshot, virtual_tools, EngineError, Message, NormalizedSnapshot, TaskReason, TaskResult, ToolCall,
    ToolDefinition, TransientError, UsageStats,
};
use subterminator_llm::LlmProvider;
use subterminator_mcp::{McpClient, McpTransport};
use subterminator_services::{ServiceConfig, ServiceRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::checkpoint;
use crate::checkpoint::HumanIo;
use crate::config::RunConfig;

const MAX_NO_ACTION_TURNS: u32 = 3;
const NAVIGATION_CLASS_TOOLS: [&str; 3] = ["browser_navigate", "browser_click", "browser_type"];
const READ_ONLY_TOOLS: [&str; 2] = ["browser_snapshot", "browser_take_screenshot"];

const BASE_SYSTEM_PROMPT: &str = "You are an automation agent driving a real web browser through a \
    tool interface to complete one task on behalf of a human who is watching. Call exactly one tool \
    per turn. When you believe the task has succeeded or cannot succeed, call complete_task with \
    your assessment — it will be checked against the current page before being accepted. If you are \
    ever unsure whether an action is safe to take, call request_human_approval first.";

enum DispatchOutcome {
    Terminal(TaskResult),
    Observation(String),
}

/// Run one full task to completion. Always returns a `TaskResult` except
/// for the handful of pre-loop failures that are genuinely about inputs or
/// infrastructure rather than the task itself (unknown service, MCP
/// subprocess never came up) — those are `Err` so the CLI can map them to
/// their own dedicated exit codes per spec.md §6.
pub async fn run(
    registry: &ServiceRegistry,
    provider: Box<dyn LlmProvider>,
    config: RunConfig,
    cancel: CancellationToken,
) -> Result<TaskResult, EngineError> {
    if config.max_turns < 1 {
        return Err(EngineError::Configuration("max_turns must be >= 1".to_string()));
    }

    let service = registry.get(&config.service_name)?;

    let mcp = McpClient::connect(config.mcp.clone()).await?;
    let human = checkpoint::StdinHumanIo;
    let result = run_with_transport(&mcp, service, provider.as_ref(), &config, &human, &cancel).await;
    McpTransport::close(&mcp).await;
    result
}

/// The transport and the human-input seam are both trait objects so
/// scenario tests can swap in scripted doubles in place of a real MCP
/// subprocess and a real terminal, exercising the exact same turn loop
/// `run()` uses.
pub async fn run_with_transport(
    mcp: &dyn McpTransport,
    service: &ServiceConfig,
    provider: &dyn LlmProvider,
    config: &RunConfig,
    human: &dyn HumanIo,
    cancel: &CancellationToken,
) -> Result<TaskResult, EngineError> {
    let mcp_tools = mcp.list_tools().await?;
    let mut tool_defs: Vec<ToolDefinition> = mcp_tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name.clone(),
            description: t.description.clone(),
            parameters: t.input_schema.clone(),
        })
        .collect();
    tool_defs.extend(virtual_tools::virtual_tool_definitions());

    navigate(mcp, service.initial_url).await?;
    let mut snapshot = snapshot_now(mcp).await?;

    let system_prompt = format!("{BASE_SYSTEM_PROMPT}\n\n{}", service.system_prompt_addition);
    let mut history = vec![
        Message::system(system_prompt),
        Message::user(format!("{}\n\nGoal: {}", format_observation(&snapshot), service.goal_template)),
    ];

    let mut turn: u32 = 0;
    let mut no_action_count: u32 = 0;
    let mut total_usage = UsageStats::default();

    loop {
        if cancel.is_cancelled() {
            return Ok(TaskResult::failure(
                TaskReason::HumanRejected,
                turn,
                Some(snapshot.url.clone()),
                Some("interrupted by SIGINT".to_string()),
                Some(total_usage),
            ));
        }

        turn += 1;
        if turn > config.max_turns {
            return Ok(TaskResult::failure(
                TaskReason::MaxTurnsExceeded,
                turn - 1,
                Some(snapshot.url.clone()),
                None,
                Some(total_usage),
            ));
        }

        let completion = tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(TaskResult::failure(
                    TaskReason::HumanRejected,
                    turn,
                    Some(snapshot.url.clone()),
                    Some("interrupted by SIGINT".to_string()),
                    Some(total_usage),
                ));
            }
            result = provider.complete(&history, &tool_defs) => result,
        };

        let (assistant, usage) = match completion {
            Ok(pair) => pair,
            Err(TransientError::Llm(msg)) => {
                return Ok(TaskResult::failure(
                    TaskReason::LlmError,
                    turn,
                    Some(snapshot.url.clone()),
                    Some(msg),
                    Some(total_usage),
                ));
            }
            Err(TransientError::McpTool(msg)) => {
                return Ok(TaskResult::failure(
                    TaskReason::LlmError,
                    turn,
                    Some(snapshot.url.clone()),
                    Some(msg),
                    Some(total_usage),
                ));
            }
        };
        total_usage += usage;

        if assistant.tool_calls.is_empty() {
            history.push(Message::assistant(assistant.content.clone().unwrap_or_default()));
            history.push(Message::user("Call a tool or complete_task."));
            no_action_count += 1;
            if no_action_count >= MAX_NO_ACTION_TURNS {
                return Ok(TaskResult::failure(
                    TaskReason::LlmNoAction,
                    turn,
                    Some(snapshot.url.clone()),
                    None,
                    Some(total_usage),
                ));
            }
            continue;
        }

        no_action_count = 0;
        let extras = assistant.tool_calls.len() - 1;
        if extras > 0 {
            warn!(extras, "LLM requested multiple tools in one turn, discarding all but the first");
        }
        let call = assistant.tool_calls[0].clone();
        history.push(Message::assistant_tool_calls(assistant.content.clone(), vec![call.clone()]));

        match dispatch(mcp, service, &call, &mut snapshot, config, human, cancel, turn, total_usage).await? {
            DispatchOutcome::Terminal(result) => return Ok(result),
            DispatchOutcome::Observation(text) => {
                history.push(Message::tool_result(&call.id, text));
            }
        }
    }
}

async fn dispatch(
    mcp: &dyn McpTransport,
    service: &ServiceConfig,
    call: &ToolCall,
    snapshot: &mut NormalizedSnapshot,
    config: &RunConfig,
    human: &dyn HumanIo,
    cancel: &CancellationToken,
    turn: u32,
    usage_so_far: UsageStats,
) -> Result<DispatchOutcome, EngineError> {
    if call.name == virtual_tools::COMPLETE_TASK {
        return Ok(dispatch_complete_task(mcp, service, call, snapshot, turn, usage_so_far).await);
    }
    if call.name == virtual_tools::REQUEST_HUMAN_APPROVAL {
        return Ok(dispatch_human_approval(mcp, call, snapshot, human, cancel).await);
    }

    if checkpoint::is_auth_wall(service, snapshot) {
        let kind = checkpoint::detect_auth_wall_kind(snapshot);
        match checkpoint::wait_for_auth_resolution(&kind, snapshot, human, cancel).await {
            checkpoint::HumanResponse::Abort => {
                return Ok(DispatchOutcome::Terminal(TaskResult::failure(
                    TaskReason::HumanRejected,
                    turn,
                    Some(snapshot.url.clone()),
                    Some("user aborted at authentication wall".to_string()),
                    Some(usage_so_far),
                )));
            }
            checkpoint::HumanResponse::Continue => {
                *snapshot = snapshot_now(mcp).await?;
                return Ok(DispatchOutcome::Observation(format!(
                    "A human resolved an authentication step. The page may have changed:\n{}",
                    format_observation(snapshot)
                )));
            }
        }
    }

    if checkpoint::checkpoint_fires(service, call, snapshot, config.no_checkpoints) {
        match checkpoint::request_approval(&call.name, &call.args, snapshot, mcp, human, cancel).await {
            checkpoint::HumanResponse::Abort => {
                return Ok(DispatchOutcome::Terminal(TaskResult::failure(
                    TaskReason::HumanRejected,
                    turn,
                    Some(snapshot.url.clone()),
                    Some(format!("human rejected proposed action '{}'", call.name)),
                    Some(usage_so_far),
                )));
            }
            checkpoint::HumanResponse::Continue => {}
        }
    }

    if config.dry_run && !READ_ONLY_TOOLS.contains(&call.name.as_str()) {
        return Ok(DispatchOutcome::Terminal(TaskResult::failure(
            TaskReason::DryRunStopped,
            turn,
            Some(snapshot.url.clone()),
            Some(format!("dry run: would have called {}({})", call.name, call.args)),
            Some(usage_so_far),
        )));
    }

    match mcp.call_tool(&call.name, call.args.clone()).await {
        Ok(Ok(text)) => {
            if NAVIGATION_CLASS_TOOLS.contains(&call.name.as_str()) {
                *snapshot = snapshot_now(mcp).await?;
                Ok(DispatchOutcome::Observation(format!(
                    "{text}\n\n{}",
                    format_observation(snapshot)
                )))
            } else {
                Ok(DispatchOutcome::Observation(text))
            }
        }
        Ok(Err(tool_error)) => {
            info!(tool = %call.name, error = %tool_error, "MCP tool reported an error");
            Ok(DispatchOutcome::Observation(format!("{{\"error\": true, \"message\": {tool_error:?}}}")))
        }
        Err(EngineError::McpConnection(msg)) => {
            warn!(error = %msg, "MCP connection error, attempting one reconnect");
            match reconnect_and_retry(mcp, &call.name, call.args.clone()).await {
                Ok(text) => Ok(DispatchOutcome::Observation(text)),
                Err(_) => Ok(DispatchOutcome::Terminal(TaskResult::failure(
                    TaskReason::McpError,
                    turn,
                    Some(snapshot.url.clone()),
                    Some(msg),
                    Some(usage_so_far),
                ))),
            }
        }
        Err(other) => Ok(DispatchOutcome::Terminal(TaskResult::failure(
            TaskReason::McpError,
            turn,
            Some(snapshot.url.clone()),
            Some(other.to_string()),
            Some(usage_so_far),
        ))),
    }
}

/// Respawn the MCP subprocess via `McpTransport::reconnect` and retry the
/// call that triggered the connection error once against the fresh
/// session (spec.md §4.1.1 step 4 / §4.3: a dead subprocess is recovered
/// by reconnecting, not by re-sending on the same broken pipe).
async fn reconnect_and_retry(mcp: &dyn McpTransport, name: &str, args: serde_json::Value) -> Result<String, EngineError> {
    mcp.reconnect().await?;
    match mcp.call_tool(name, args).await? {
        Ok(text) => Ok(text),
        Err(msg) => Err(EngineError::McpConnection(msg)),
    }
}

async fn dispatch_complete_task(
    mcp: &dyn McpTransport,
    service: &ServiceConfig,
    call: &ToolCall,
    snapshot: &mut NormalizedSnapshot,
    turn: u32,
    usage_so_far: UsageStats,
) -> DispatchOutcome {
    let status = call.args.get("status").and_then(|v| v.as_str()).unwrap_or("failed");
    let reason = call
        .args
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("no reason given")
        .to_string();

    if status != "success" {
        return DispatchOutcome::Terminal(TaskResult::failure(
            TaskReason::VerificationFailed,
            turn,
            Some(snapshot.url.clone()),
            Some(reason),
            Some(usage_so_far),
        ));
    }

    match snapshot_now(mcp).await {
        Ok(fresh) => {
            *snapshot = fresh;
        }
        Err(e) => {
            return DispatchOutcome::Terminal(TaskResult::failure(
                TaskReason::McpError,
                turn,
                Some(snapshot.url.clone()),
                Some(e.to_string()),
                Some(usage_so_far),
            ));
        }
    }

    match checkpoint::verify(service, snapshot) {
        Some(false) => DispatchOutcome::Terminal(TaskResult::failure(
            TaskReason::VerificationFailed,
            turn,
            Some(snapshot.url.clone()),
            Some(reason),
            Some(usage_so_far),
        )),
        Some(true) => DispatchOutcome::Terminal(TaskResult::success_completed(
            turn,
            Some(snapshot.url.clone()),
            Some(usage_so_far),
        )),
        None => DispatchOutcome::Observation(
            "Verification did not find a recognized success or failure indicator on the current \
             page. Re-assess the page and either take another action or call complete_task again \
             once a clearer confirmation is visible."
                .to_string(),
        ),
    }
}

async fn dispatch_human_approval(
    mcp: &dyn McpTransport,
    call: &ToolCall,
    snapshot: &NormalizedSnapshot,
    human: &dyn HumanIo,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let action = call.args.get("action").and_then(|v| v.as_str()).unwrap_or("(unspecified action)");
    match checkpoint::request_approval(action, &call.args, snapshot, mcp, human, cancel).await {
        checkpoint::HumanResponse::Continue => DispatchOutcome::Observation("{\"approved\": true}".to_string()),
        checkpoint::HumanResponse::Abort => DispatchOutcome::Observation("{\"approved\": false}".to_string()),
    }
}

async fn navigate(mcp: &dyn McpTransport, url: &str) -> Result<(), EngineError> {
    match mcp.call_tool("browser_navigate", serde_json::json!({"url": url})).await? {
        Ok(_) => Ok(()),
        Err(msg) => Err(EngineError::McpConnection(format!("initial navigation failed: {msg}"))),
    }
}

async fn snapshot_now(mcp: &dyn McpTransport) -> Result<NormalizedSnapshot, EngineError> {
    match mcp.call_tool("browser_snapshot", serde_json::json!({})).await? {
        Ok(raw) => parse_snapshot(&raw, None),
        Err(msg) => Err(EngineError::McpConnection(format!("browser_snapshot failed: {msg}"))),
    }
}

fn format_observation(snap: &NormalizedSnapshot) -> String {
    format!("Page URL: {}\nPage Title: {}\n\n{}", snap.url, snap.title, snap.content)
}
