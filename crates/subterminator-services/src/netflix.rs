//! Reference service policy: Netflix subscription cancellation.
//!
//! Every predicate here is a plain function, not a closure capturing
//! state — spec.md §4.6's "must not mutate inputs nor perform I/O" is
//! enforced by the type (`fn`, not `Fn`) as much as by convention.

use subterminator_core::{NormalizedSnapshot, ToolCall};

use crate::config::ServiceConfig;

fn destructive_click(tool: &ToolCall, _snap: &NormalizedSnapshot) -> bool {
    if tool.name != "browser_click" {
        return false;
    }
    let element = tool
        .args
        .get("element")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_lowercase();
    ["finish", "confirm", "complete"].iter().any(|kw| element.contains(kw))
}

fn final_cancel_page(_tool: &ToolCall, snap: &NormalizedSnapshot) -> bool {
    let content = snap.content.to_lowercase();
    content.contains("finish") && content.contains("cancel")
}

fn payment_page(_tool: &ToolCall, snap: &NormalizedSnapshot) -> bool {
    snap.url.to_lowercase().contains("payment") || snap.content.to_lowercase().contains("billing")
}

fn success_cancellation_confirmed(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("cancellation confirmed")
}

fn success_membership_ended(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("membership ended")
}

fn success_restart_membership(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("restart membership")
}

fn success_billing_stopped(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("billing stopped")
}

fn failure_error(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("error")
}

fn failure_try_again(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("try again")
}

fn failure_log_in_required(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("log in required")
}

fn failure_session_expired(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("session expired")
}

fn auth_login_page(snap: &NormalizedSnapshot) -> bool {
    let content = snap.content.to_lowercase();
    content.contains("sign in") || content.contains("log in") || snap.url.to_lowercase().contains("/login")
}

fn auth_captcha_page(snap: &NormalizedSnapshot) -> bool {
    snap.content.to_lowercase().contains("captcha")
}

fn auth_mfa_page(snap: &NormalizedSnapshot) -> bool {
    let content = snap.content.to_lowercase();
    content.contains("verification code") || content.contains("two-factor") || content.contains("multi-factor")
}

const SYSTEM_PROMPT_ADDITION: &str = "You are cancelling a Netflix subscription. Only call \
    complete_task with status=success once a page plausibly confirms the cancellation (wording \
    like \"cancellation confirmed\", \"membership ended\", \"restart membership\", or \"billing \
    stopped\"). Never attempt to solve a CAPTCHA yourself — if one appears, it will be handled as \
    an authentication wall. Always request human approval before clicking any control whose label \
    implies finality (e.g. \"Finish Cancellation\", \"Confirm\", \"Complete\").";

pub fn config() -> ServiceConfig {
    ServiceConfig {
        name: "netflix",
        description: "Cancel a Netflix subscription",
        initial_url: "https://netflix.com/cancelplan",
        goal_template: "Cancel the Netflix subscription on this account. Confirm the cancellation \
            all the way through to a page that clearly states it succeeded before calling \
            complete_task.",
        system_prompt_addition: SYSTEM_PROMPT_ADDITION,
        checkpoint_conditions: vec![destructive_click, final_cancel_page, payment_page],
        success_indicators: vec![
            success_cancellation_confirmed,
            success_membership_ended,
            success_restart_membership,
            success_billing_stopped,
        ],
        failure_indicators: vec![
            failure_error,
            failure_try_again,
            failure_log_in_required,
            failure_session_expired,
        ],
        auth_edge_case_detectors: vec![auth_login_page, auth_captcha_page, auth_mfa_page],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(url: &str, content: &str) -> NormalizedSnapshot {
        NormalizedSnapshot {
            url: url.to_string(),
            title: "Netflix".to_string(),
            content: content.to_string(),
            screenshot_path: None,
        }
    }

    #[test]
    fn destructive_click_matches_finish_cancellation() {
        let tool = ToolCall::new("1", "browser_click", json!({"element": "Finish Cancellation"}));
        let s = snap("https://netflix.com/cancelplan", "");
        assert!(destructive_click(&tool, &s));
    }

    #[test]
    fn destructive_click_ignores_unrelated_tools() {
        let tool = ToolCall::new("1", "browser_navigate", json!({"url": "https://netflix.com"}));
        let s = snap("https://netflix.com", "");
        assert!(!destructive_click(&tool, &s));
    }

    #[test]
    fn checkpoint_fires_on_payment_url() {
        let cfg = config();
        let tool = ToolCall::new("1", "browser_click", json!({"element": "Continue"}));
        let s = snap("https://netflix.com/payment/update", "");
        assert!(cfg.should_checkpoint(&tool, &s));
    }

    #[test]
    fn verify_prefers_failure_over_success() {
        let cfg = config();
        let s = snap(
            "https://netflix.com/cancelplan",
            "Cancellation confirmed, but an error occurred sending the email receipt",
        );
        assert_eq!(cfg.verify(&s), Some(false));
    }

    #[test]
    fn verify_recognizes_success_phrase() {
        let cfg = config();
        let s = snap("https://netflix.com/cancelplan", "Your membership ended successfully.");
        assert_eq!(cfg.verify(&s), Some(true));
    }

    #[test]
    fn verify_is_none_when_nothing_matches() {
        let cfg = config();
        let s = snap("https://netflix.com/browse", "Welcome back!");
        assert_eq!(cfg.verify(&s), None);
    }

    #[test]
    fn auth_wall_detects_login_page() {
        let cfg = config();
        let s = snap("https://netflix.com/login", "Sign in to continue");
        assert!(cfg.is_auth_wall(&s));
    }

    #[test]
    fn auth_wall_detects_captcha() {
        let cfg = config();
        let s = snap("https://netflix.com/cancelplan", "Please complete the CAPTCHA below");
        assert!(cfg.is_auth_wall(&s));
    }
}
