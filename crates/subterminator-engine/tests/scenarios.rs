//! End-to-end scenario tests for the Task Runner: a scripted LLM provider
//! and a scripted MCP transport drive `run_with_transport` through the
//! same turn loop a real run uses, with a scripted human standing in for
//! the terminal.
//!
//! Turn counting here follows the Task Runner's own procedure: the
//! initial `browser_navigate` + `browser_snapshot` pair happens once,
//! before the turn counter starts, as a dedicated startup step — not as
//! turn 1. Each assertion below checks the turn count the loop actually
//! produces under that rule, plus the call-count and ordering invariants
//! each scenario cares about.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use subterminator_core::{
    AssistantMessage, EngineError, Message, TaskReason, ToolCall, ToolDefinition, TransientError, UsageStats,
};
use subterminator_engine::checkpoint::HumanIo;
use subterminator_engine::config::RunConfig;
use subterminator_llm::LlmProvider;
use subterminator_mcp::{McpServerConfig, McpTransport, ToolDescriptor};
use subterminator_services::ServiceRegistry;
use tokio_util::sync::CancellationToken;

struct ScriptedProvider {
    replies: Mutex<VecDeque<AssistantMessage>>,
}

impl ScriptedProvider {
    fn new(replies: Vec<AssistantMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<(AssistantMessage, UsageStats), TransientError> {
        let mut replies = self.replies.lock().unwrap();
        let msg = replies
            .pop_front()
            .unwrap_or_else(|| AssistantMessage::text("nothing scripted left, bailing"));
        Ok((msg, UsageStats::default()))
    }
}

struct ScriptedTransport {
    calls: Mutex<Vec<(String, Value)>>,
    snapshots: Mutex<VecDeque<String>>,
}

impl ScriptedTransport {
    fn new(snapshots: Vec<&str>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            snapshots: Mutex::new(snapshots.into_iter().map(str::to_string).collect()),
        }
    }

    fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(n, _)| n == name).count()
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, EngineError> {
        let names = ["browser_navigate", "browser_click", "browser_type", "browser_snapshot", "browser_take_screenshot"];
        Ok(names
            .iter()
            .map(|n| ToolDescriptor {
                name: n.to_string(),
                description: String::new(),
                input_schema: json!({"type": "object", "properties": {}}),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Result<String, String>, EngineError> {
        self.calls.lock().unwrap().push((name.to_string(), arguments));
        match name {
            "browser_snapshot" => {
                let mut snaps = self.snapshots.lock().unwrap();
                match snaps.pop_front() {
                    Some(text) => Ok(Ok(text)),
                    None => Ok(Ok(last_snapshot_fallback())),
                }
            }
            "browser_take_screenshot" => Ok(Err("no screenshot in test double".to_string())),
            _ => Ok(Ok("{\"ok\":true}".to_string())),
        }
    }

    async fn reconnect(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&self) {}
}

fn last_snapshot_fallback() -> String {
    "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
     - text \"unchanged\"\n"
        .to_string()
}

/// A human that always answers the same way.
struct ScriptedHuman {
    answer: &'static str,
}

#[async_trait]
impl HumanIo for ScriptedHuman {
    async fn read_line(&self, _cancel: &CancellationToken) -> Option<String> {
        Some(self.answer.to_string())
    }
}

fn cancel_click(id: &str, element: &str) -> AssistantMessage {
    AssistantMessage::tool_call(ToolCall::new(id, "browser_click", json!({"element": element})))
}

fn complete_task(id: &str, status: &str, reason: &str) -> AssistantMessage {
    AssistantMessage::tool_call(ToolCall::new(id, "complete_task", json!({"status": status, "reason": reason})))
}

fn snapshot_call(id: &str) -> AssistantMessage {
    AssistantMessage::tool_call(ToolCall::new(id, "browser_snapshot", json!({})))
}

fn test_config() -> RunConfig {
    RunConfig::new("netflix", McpServerConfig::new("unused", vec![], "/tmp/subterminator-test"))
}

#[tokio::test]
async fn happy_netflix_path_completes_and_verifies() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    // Three snapshot fetches happen: the pre-loop startup snapshot, the
    // refresh after the (approved) navigation-class click, and the fresh
    // fetch `complete_task(success)` itself takes before verifying.
    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - heading \"Cancel Membership\" [level=1]\n  - button \"Finish Cancellation\"\n",
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"Your membership ended successfully.\"\n",
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"Your membership ended successfully.\"\n",
    ]);
    let provider = ScriptedProvider::new(vec![
        cancel_click("1", "Finish Cancellation"),
        complete_task("2", "success", "done"),
    ]);
    let human = ScriptedHuman { answer: "y" };
    let cancel = CancellationToken::new();
    let config = test_config();

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.verified);
    assert_eq!(result.reason, TaskReason::Completed);
    assert_eq!(result.turns, 2);
    assert_eq!(transport.call_count("browser_click"), 1);
}

#[tokio::test]
async fn human_rejecting_irreversible_click_aborts_without_calling_it() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - heading \"Cancel Membership\" [level=1]\n  - button \"Finish Cancellation\"\n",
    ]);
    let provider = ScriptedProvider::new(vec![cancel_click("1", "Finish Cancellation")]);
    let human = ScriptedHuman { answer: "n" };
    let cancel = CancellationToken::new();
    let config = test_config();

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(!result.verified);
    assert_eq!(result.reason, TaskReason::HumanRejected);
    assert_eq!(result.turns, 1);
    assert_eq!(transport.call_count("browser_click"), 0, "rejected click must never reach MCP");
}

#[tokio::test]
async fn auth_wall_is_detected_before_the_proposed_click_runs() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    // The pre-loop snapshot already looks like a login page.
    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/login\n- Page Title: Sign in\n- Page Snapshot:\n  - text \"Sign in to continue\"\n",
        "- Page URL: https://netflix.com/account\n- Page Title: Account\n- Page Snapshot:\n  - text \"Welcome back\"\n",
    ]);
    let provider = ScriptedProvider::new(vec![
        AssistantMessage::tool_call(ToolCall::new("1", "browser_click", json!({"element": "Account"}))),
        complete_task("2", "failed", "cannot determine outcome in this test"),
    ]);
    let human = ScriptedHuman { answer: "continue" };
    let cancel = CancellationToken::new();
    let config = test_config();

    let snapshot_calls_before = 1; // the pre-loop snapshot

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    assert_eq!(transport.call_count("browser_click"), 0, "auth wall must pre-empt the click entirely");
    assert_eq!(
        transport.call_count("browser_snapshot"),
        snapshot_calls_before + 1,
        "resolving the auth wall refreshes the snapshot exactly once"
    );
    assert_eq!(result.reason, TaskReason::VerificationFailed);
}

#[tokio::test]
async fn three_consecutive_empty_turns_yield_llm_no_action() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"start\"\n",
    ]);
    let provider = ScriptedProvider::new(vec![
        AssistantMessage::text("thinking..."),
        AssistantMessage::text("still thinking..."),
        AssistantMessage::text("hmm..."),
    ]);
    let human = ScriptedHuman { answer: "n" };
    let cancel = CancellationToken::new();
    let config = test_config();

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.reason, TaskReason::LlmNoAction);
    assert_eq!(result.turns, 3);
}

#[tokio::test]
async fn looping_snapshot_calls_stop_at_max_turns() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"start\"\n",
    ]);
    // More scripted replies than max_turns — the loop must stop consuming them.
    let provider = ScriptedProvider::new(vec![
        snapshot_call("1"),
        snapshot_call("2"),
        snapshot_call("3"),
        snapshot_call("4"),
        snapshot_call("5"),
        snapshot_call("6"),
        snapshot_call("7"),
    ]);
    let human = ScriptedHuman { answer: "n" };
    let cancel = CancellationToken::new();
    let mut config = test_config();
    config.max_turns = 5;

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.reason, TaskReason::MaxTurnsExceeded);
    assert_eq!(result.turns, 5);
}

/// A `complete_task(success)` whose snapshot matches neither a success nor
/// a failure indicator is the one verification outcome that is *not*
/// terminal (§4.1.2's third case): it comes back to the LLM as an
/// observation and the loop keeps going. A snapshot that matches a
/// failure indicator, by contrast, is terminal `verification_failed` per
/// the same section — that path is covered by the unit tests in
/// `checkpoint.rs` (`verify` returning `Some(false)`), not here.
#[tokio::test]
async fn unmatched_verification_is_an_observation_not_a_terminal_result() {
    let registry = ServiceRegistry::default();
    let service = registry.get("netflix").unwrap();

    let transport = ScriptedTransport::new(vec![
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"start\"\n",
        // Neither a success nor a failure indicator is present yet.
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"Please wait while we process your request\"\n",
        // Second attempt: now a success indicator is present.
        "- Page URL: https://netflix.com/cancelplan\n- Page Title: Cancel your membership\n- Page Snapshot:\n  \
         - text \"Your membership ended successfully\"\n",
    ]);
    let provider = ScriptedProvider::new(vec![
        complete_task("1", "success", "looks done"),
        complete_task("2", "success", "looks done now"),
    ]);
    let human = ScriptedHuman { answer: "n" };
    let cancel = CancellationToken::new();
    let config = test_config();

    let result = subterminator_engine::run_with_transport(&transport, service, &provider, &config, &human, &cancel)
        .await
        .unwrap();

    // The first complete_task's unmatched verification must not have been
    // terminal — the loop kept going and the second attempt succeeded.
    assert!(result.success);
    assert_eq!(result.reason, TaskReason::Completed);
    assert_eq!(result.turns, 2);
}
