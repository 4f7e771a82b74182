//! Checkpoint Handler: predicate evaluation and all synchronous human I/O.
//!
//! Grounded on `openclaw-gateway/src/main.rs`'s `tokio::select!` shutdown
//! pattern (adapted here to guard a blocking stdin read instead of a
//! polling loop) and on the teacher's general "never let one bad component
//! take down the run" posture — here applied to predicate panics.

use std::io::Write as _;
use std::panic::AssertUnwindSafe;

use colored::Colorize;
use subterminator_core::NormalizedSnapshot;
use subterminator_mcp::McpTransport;
use subterminator_services::ServiceConfig;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

/// What a predicate evaluation found, before any human interaction.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthWallKind {
    Login,
    Captcha,
    Mfa,
}

/// Outcome of waiting on a blocking human prompt while SIGINT-interruptible.
#[derive(Debug, PartialEq, Eq)]
pub enum HumanResponse {
    Continue,
    Abort,
}

/// Run a single snapshot predicate, catching a panic as `false` and
/// logging it — spec.md §4.2.1: "predicates are pure functions; they must
/// not raise; exceptions from a predicate are caught, logged, and treated
/// as false."
fn eval_snapshot_predicate(name: &str, f: fn(&NormalizedSnapshot) -> bool, snap: &NormalizedSnapshot) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| f(snap))) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(predicate = name, "service predicate panicked, treating as false");
            false
        }
    }
}

fn eval_checkpoint_predicate(
    name: &str,
    f: fn(&subterminator_core::ToolCall, &NormalizedSnapshot) -> bool,
    tool: &subterminator_core::ToolCall,
    snap: &NormalizedSnapshot,
) -> bool {
    match std::panic::catch_unwind(AssertUnwindSafe(|| f(tool, snap))) {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(predicate = name, "service predicate panicked, treating as false");
            false
        }
    }
}

/// True if an auth-edge-case detector fires on this snapshot.
pub fn is_auth_wall(config: &ServiceConfig, snap: &NormalizedSnapshot) -> bool {
    config
        .auth_edge_case_detectors
        .iter()
        .enumerate()
        .any(|(i, p)| eval_snapshot_predicate(&format!("auth_edge_case_detectors[{i}]"), *p, snap))
}

/// Only the irreversibility predicates, not the auth detectors — the
/// Task Runner calls this separately from `is_auth_wall` so it can honor
/// §4.2.4's ordering rule (auth checked and handled first, on its own).
pub fn checkpoint_fires(
    config: &ServiceConfig,
    tool: &subterminator_core::ToolCall,
    snap: &NormalizedSnapshot,
    checkpoints_disabled: bool,
) -> bool {
    if checkpoints_disabled {
        return false;
    }
    config
        .checkpoint_conditions
        .iter()
        .enumerate()
        .any(|(i, p)| eval_checkpoint_predicate(&format!("checkpoint_conditions[{i}]"), *p, tool, snap))
}

/// §4.2.1's full definition: true if checkpoints are enabled and either a
/// checkpoint condition or an auth detector fires. Exposed for callers
/// that want the combined question in one call (e.g. tests); the Task
/// Runner itself evaluates the two halves separately per §4.2.4.
pub fn should_checkpoint(
    config: &ServiceConfig,
    tool: &subterminator_core::ToolCall,
    snap: &NormalizedSnapshot,
    checkpoints_disabled: bool,
) -> bool {
    checkpoint_fires(config, tool, snap, checkpoints_disabled) || (!checkpoints_disabled && is_auth_wall(config, snap))
}

/// Failure indicators override success (§4.6.1). `None` means neither
/// matched and the LLM must keep trying.
pub fn verify(config: &ServiceConfig, snap: &NormalizedSnapshot) -> Option<bool> {
    let failed = config
        .failure_indicators
        .iter()
        .enumerate()
        .any(|(i, p)| eval_snapshot_predicate(&format!("failure_indicators[{i}]"), *p, snap));
    if failed {
        return Some(false);
    }
    let succeeded = config
        .success_indicators
        .iter()
        .enumerate()
        .any(|(i, p)| eval_snapshot_predicate(&format!("success_indicators[{i}]"), *p, snap));
    if succeeded {
        Some(true)
    } else {
        None
    }
}

pub fn detect_auth_wall_kind(snap: &NormalizedSnapshot) -> AuthWallKind {
    let content = snap.content.to_lowercase();
    if content.contains("captcha") {
        AuthWallKind::Captcha
    } else if content.contains("verification code") || content.contains("two-factor") || content.contains("multi-factor")
    {
        AuthWallKind::Mfa
    } else {
        AuthWallKind::Login
    }
}

/// Seam between the Checkpoint Handler and wherever a human's keystrokes
/// actually come from. `StdinHumanIo` is the only production
/// implementation; scenario tests substitute a scripted double so a test
/// run never blocks on a real terminal.
#[async_trait::async_trait]
pub trait HumanIo: Send + Sync {
    /// `None` means the read was interrupted (SIGINT) or the input stream
    /// closed — both treated as the conservative "abort" answer by callers.
    async fn read_line(&self, cancel: &CancellationToken) -> Option<String>;
}

pub struct StdinHumanIo;

#[async_trait::async_trait]
impl HumanIo for StdinHumanIo {
    async fn read_line(&self, cancel: &CancellationToken) -> Option<String> {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut line = String::new();
        tokio::select! {
            _ = cancel.cancelled() => None,
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => None,
                    Ok(_) => Some(line.trim().to_string()),
                    Err(_) => None,
                }
            }
        }
    }
}

/// §4.2.2: block on a human resolving an auth wall in the visible browser.
pub async fn wait_for_auth_resolution(
    kind: &AuthWallKind,
    snap: &NormalizedSnapshot,
    human: &dyn HumanIo,
    cancel: &CancellationToken,
) -> HumanResponse {
    let kind_str = match kind {
        AuthWallKind::Login => "login",
        AuthWallKind::Captcha => "captcha",
        AuthWallKind::Mfa => "mfa",
    };
    println!(
        "{}",
        format!("\n— Authentication required ({kind_str}) —").yellow().bold()
    );
    println!("  URL:   {}", snap.url);
    println!("  Title: {}", snap.title);
    println!("  Resolve this in the visible browser, then press Enter to continue (or type 'abort').");
    let _ = std::io::stdout().flush();

    match human.read_line(cancel).await {
        Some(ref s) if s.eq_ignore_ascii_case("abort") => HumanResponse::Abort,
        Some(_) => HumanResponse::Continue,
        None => HumanResponse::Abort,
    }
}

/// §4.2.3: approval prompt for an irreversible action. `mcp` is used
/// best-effort to grab a screenshot; a failure there must not abort the
/// run.
pub async fn request_approval(
    tool_name: &str,
    args: &serde_json::Value,
    snap: &NormalizedSnapshot,
    mcp: &dyn McpTransport,
    human: &dyn HumanIo,
    cancel: &CancellationToken,
) -> HumanResponse {
    println!("{}", "\n— Approval requested —".cyan().bold());
    println!("  Tool:  {tool_name}({args})");
    println!("  URL:   {}", snap.url);
    println!("  Title: {}", snap.title);
    let preview: String = snap.content.chars().take(300).collect();
    println!("  Page:  {preview}");

    match mcp.call_tool("browser_take_screenshot", serde_json::json!({})).await {
        Ok(Ok(path)) => println!("  Screenshot: {path}"),
        Ok(Err(e)) => tracing::debug!("screenshot capture returned an error, continuing: {e}"),
        Err(e) => tracing::debug!("screenshot capture failed, continuing: {e}"),
    }

    println!("  Approve? [y/N]: ");
    let _ = std::io::stdout().flush();

    match human.read_line(cancel).await {
        Some(ref s) if s.to_lowercase().starts_with('y') => HumanResponse::Continue,
        _ => HumanResponse::Abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subterminator_core::ToolCall;

    fn snap(url: &str, content: &str) -> NormalizedSnapshot {
        NormalizedSnapshot {
            url: url.to_string(),
            title: "t".to_string(),
            content: content.to_string(),
            screenshot_path: None,
        }
    }

    #[test]
    fn checkpoints_disabled_short_circuits_everything() {
        let config = subterminator_services::netflix::config();
        let tool = ToolCall::new("1", "browser_click", serde_json::json!({"element": "Finish Cancellation"}));
        let s = snap("https://netflix.com/cancelplan", "");
        assert!(!should_checkpoint(&config, &tool, &s, true));
    }

    #[test]
    fn auth_wall_detected_even_without_checkpoint_disabled_flag() {
        let config = subterminator_services::netflix::config();
        let tool = ToolCall::new("1", "browser_navigate", serde_json::json!({"url": "https://netflix.com"}));
        let s = snap("https://netflix.com/login", "Sign in to continue");
        assert!(should_checkpoint(&config, &tool, &s, false));
    }

    #[test]
    fn detect_auth_wall_kind_prefers_captcha_over_login_wording() {
        let s = snap("https://netflix.com/login", "Please complete the captcha to sign in");
        assert_eq!(detect_auth_wall_kind(&s), AuthWallKind::Captcha);
    }

    #[test]
    fn verify_none_when_page_is_unrelated() {
        let config = subterminator_services::netflix::config();
        let s = snap("https://netflix.com/browse", "Welcome back");
        assert_eq!(verify(&config, &s), None);
    }
}
