//! PreToolUse Hook Protocol
//!
//! The assistant pipes one JSON request per tool call to stdin:
//!
//! ```json
//! {"tool_name": "Bash", "tool_input": {"command": "git reset --hard"}}
//! ```
//!
//! Allowed calls produce no output and exit 0. Blocked calls (including
//! ones awaiting confirmation) print `{"decision": "block", "reason": ...}`
//! to stdout and exit non-zero.
//!
//! Failure policy is asymmetric: nothing to check (empty input, other
//! tools, empty command) fails open; anything that goes wrong while
//! checking (unparseable input, broken rule configuration) fails closed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{truncate_command, AuditSink};
use crate::confirm::Confirmation;
use crate::error::GuardError;
use crate::guard::{fail_closed, Guard, Verdict};

/// Tool whose commands are classified by default
pub const SHELL_TOOL: &str = "Bash";

/// Exit status for block / confirmation responses
pub const BLOCK_EXIT_CODE: i32 = 2;

const GUARD_NAME: &str = "git-safety-guard";

/// The part of `tool_input` the guard reads
#[derive(Debug, Default, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub command: Option<String>,
}

/// Response printed for blocked calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookResponse {
    pub decision: String,
    pub reason: String,
}

impl HookResponse {
    /// Build the response for a non-allow verdict
    pub fn from_verdict(verdict: &Verdict, command: &str) -> Option<Self> {
        let shown = if command.is_empty() {
            String::new()
        } else {
            format!(" Command: {}.", truncate_command(command))
        };

        let reason = match verdict {
            Verdict::Allow => return None,
            Verdict::Blocked { reason, .. } => format!(
                "BLOCKED by {}: {}.{} If truly needed, ask the user to run it manually.",
                GUARD_NAME, reason, shown
            ),
            Verdict::RequireConfirmation {
                reason,
                reinvocation,
                ..
            } => format!(
                "CONFIRMATION REQUIRED by {}: {}.{} After the user explicitly approves, re-run as: {}",
                GUARD_NAME, reason, shown, reinvocation
            ),
        };

        Some(Self {
            decision: "block".to_string(),
            reason,
        })
    }
}

/// Result of handling one hook request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Exit 0 silently
    Allow,
    /// Print the response and exit non-zero
    Deny {
        verdict: Verdict,
        response: HookResponse,
    },
}

impl HookOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            HookOutcome::Allow => 0,
            HookOutcome::Deny { .. } => BLOCK_EXIT_CODE,
        }
    }

    fn from_verdict(verdict: Verdict, command: &str) -> Self {
        match HookResponse::from_verdict(&verdict, command) {
            None => HookOutcome::Allow,
            Some(response) => HookOutcome::Deny { verdict, response },
        }
    }
}

/// Handles hook requests for one process invocation
pub struct Hook<'a> {
    /// `Err` when the rule configuration failed to load
    guard: Result<&'a Guard, &'a GuardError>,
    shell_tool: &'a str,
    confirmation: Confirmation,
}

impl<'a> Hook<'a> {
    pub fn new(
        guard: Result<&'a Guard, &'a GuardError>,
        shell_tool: &'a str,
        confirmation: Confirmation,
    ) -> Self {
        Self {
            guard,
            shell_tool,
            confirmation,
        }
    }

    /// Evaluate raw stdin bytes
    pub fn evaluate(&self, input: &[u8], audit: &mut dyn AuditSink) -> HookOutcome {
        let text = match String::from_utf8(input.to_vec()) {
            Ok(text) => text,
            Err(e) => return invalid_input(audit, e.into()),
        };
        if text.trim().is_empty() {
            return HookOutcome::Allow;
        }

        let request: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => return invalid_input(audit, GuardError::InvalidInput(e.to_string())),
        };
        let Some(request) = request.as_object() else {
            return invalid_input(
                audit,
                GuardError::InvalidInput("expected a JSON object".to_string()),
            );
        };

        let tool_name = request
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if tool_name != self.shell_tool {
            tracing::debug!(tool = tool_name, "not a shell tool, allowing");
            return HookOutcome::Allow;
        }

        let tool_input = match request.get("tool_input") {
            None => ToolInput::default(),
            Some(value) => match ToolInput::deserialize(value) {
                Ok(tool_input) => tool_input,
                Err(e) => {
                    return invalid_input(audit, GuardError::InvalidInput(e.to_string()));
                }
            },
        };

        let command = tool_input.command.unwrap_or_default();
        if command.trim().is_empty() {
            return HookOutcome::Allow;
        }

        let verdict = match self.guard {
            Ok(guard) => guard.decide(&command, self.confirmation, audit),
            Err(e) => {
                let reason = format!("internal error while checking command: {}", e);
                fail_closed(audit, &command, &reason)
            }
        };
        HookOutcome::from_verdict(verdict, &command)
    }
}

/// Fail closed on a request that could not be read or parsed
pub fn invalid_input(audit: &mut dyn AuditSink, error: GuardError) -> HookOutcome {
    tracing::warn!(error = %error, "rejecting unparseable hook input");
    let verdict = fail_closed(audit, "", &error.to_string());
    HookOutcome::from_verdict(verdict, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEvent, AuditRecord};
    use crate::normalize::Normalizer;
    use crate::rules::RuleSet;
    use serde_json::json;
    use std::collections::HashMap;

    fn guard() -> Guard {
        Guard::new(
            Normalizer::new(HashMap::new()),
            RuleSet::builtin(None).unwrap(),
        )
    }

    fn run(input: &str, confirmation: Confirmation) -> (HookOutcome, Vec<AuditRecord>) {
        let guard = guard();
        let hook = Hook::new(Ok(&guard), SHELL_TOOL, confirmation);
        let mut audit = Vec::new();
        let outcome = hook.evaluate(input.as_bytes(), &mut audit);
        (outcome, audit)
    }

    fn bash(command: &str) -> String {
        json!({
            "session_id": "abc",
            "hook_event_name": "PreToolUse",
            "tool_name": "Bash",
            "tool_input": { "command": command, "description": "test" }
        })
        .to_string()
    }

    fn response(outcome: &HookOutcome) -> &HookResponse {
        match outcome {
            HookOutcome::Deny { response, .. } => response,
            HookOutcome::Allow => panic!("expected a block response"),
        }
    }

    #[test]
    fn test_allowed_command_is_silent() {
        let (outcome, audit) = run(&bash("git status"), Confirmation::Absent);
        assert_eq!(outcome, HookOutcome::Allow);
        assert_eq!(outcome.exit_code(), 0);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_blocked_command_response() {
        let (outcome, audit) = run(&bash("git reset --hard HEAD~3"), Confirmation::Absent);
        assert_eq!(outcome.exit_code(), BLOCK_EXIT_CODE);

        let response = response(&outcome);
        assert_eq!(response.decision, "block");
        assert!(response.reason.starts_with("BLOCKED by git-safety-guard:"));
        assert!(response.reason.contains("Command: git reset --hard HEAD~3."));
        assert_eq!(audit.len(), 1);

        let printed = serde_json::to_value(response).unwrap();
        assert_eq!(printed["decision"], "block");
    }

    #[test]
    fn test_blocked_still_blocked_with_token() {
        let (outcome, _) = run(&bash("git stash drop"), Confirmation::Granted);
        assert_eq!(outcome.exit_code(), BLOCK_EXIT_CODE);
    }

    #[test]
    fn test_confirmation_response_embeds_reinvocation() {
        let (outcome, audit) = run(&bash("git push origin --force"), Confirmation::Absent);
        let response = response(&outcome);
        assert_eq!(response.decision, "block");
        assert!(response.reason.starts_with("CONFIRMATION REQUIRED"));
        assert!(response
            .reason
            .ends_with("re-run as: GIT_SAFETY_CONFIRMED=1 git push origin --force"));
        assert_eq!(audit[0].event, AuditEvent::NeedsConfirmation);

        let (outcome, audit) = run(&bash("git push origin --force"), Confirmation::Granted);
        assert_eq!(outcome, HookOutcome::Allow);
        assert_eq!(audit[0].event, AuditEvent::AllowedConfirmed);
    }

    #[test]
    fn test_long_command_is_truncated_in_reason() {
        let command = format!("rm -rf /srv/{}", "a".repeat(200));
        let (outcome, _) = run(&bash(&command), Confirmation::Absent);
        let reason = &response(&outcome).reason;
        let expected = format!("Command: {}...", &command[..100]);
        assert!(reason.contains(&expected));
        assert!(!reason.contains(&command));
    }

    #[test]
    fn test_malformed_json_fails_closed() {
        let truncated = r#"{"tool_name": "Bash", "tool_input": {"command": "ls""#;
        for input in ["{not json", truncated, "[1, 2]", "42"] {
            let (outcome, audit) = run(input, Confirmation::Absent);
            assert_eq!(outcome.exit_code(), BLOCK_EXIT_CODE, "{input}");
            assert!(response(&outcome).reason.contains("invalid input"), "{input}");
            assert_eq!(audit.len(), 1);
            assert_eq!(audit[0].event, AuditEvent::Blocked);
        }
    }

    #[test]
    fn test_invalid_utf8_fails_closed() {
        let guard = guard();
        let hook = Hook::new(Ok(&guard), SHELL_TOOL, Confirmation::Absent);
        let mut audit = Vec::new();
        let outcome = hook.evaluate(&[0x7b, 0xff, 0xfe, 0x7d], &mut audit);
        assert_eq!(outcome.exit_code(), BLOCK_EXIT_CODE);
        assert!(response(&outcome).reason.contains("invalid input"));
    }

    #[test]
    fn test_wrong_command_type_fails_closed() {
        let input = json!({"tool_name": "Bash", "tool_input": {"command": 42}}).to_string();
        let (outcome, _) = run(&input, Confirmation::Absent);
        assert!(response(&outcome).reason.contains("invalid input"));
    }

    #[test]
    fn test_other_tools_pass_through_without_audit() {
        let input = json!({
            "tool_name": "Write",
            "tool_input": {"file_path": "/etc/passwd", "command": ["rm", "-rf", "/"]}
        })
        .to_string();
        let (outcome, audit) = run(&input, Confirmation::Absent);
        assert_eq!(outcome, HookOutcome::Allow);
        assert!(audit.is_empty());

        let (outcome, _) = run(r#"{"tool_input": {"command": "rm -rf /"}}"#, Confirmation::Absent);
        assert_eq!(outcome, HookOutcome::Allow);
    }

    #[test]
    fn test_nothing_to_check_fails_open() {
        let empty = bash("");
        let blank = bash("   ");
        for input in ["", "  \n", r#"{"tool_name": "Bash"}"#, empty.as_str(), blank.as_str()] {
            let (outcome, audit) = run(input, Confirmation::Absent);
            assert_eq!(outcome, HookOutcome::Allow, "{input}");
            assert!(audit.is_empty());
        }
    }

    #[test]
    fn test_custom_shell_tool_name() {
        let guard = guard();
        let hook = Hook::new(Ok(&guard), "Shell", Confirmation::Absent);
        let mut audit = Vec::new();

        let input = json!({"tool_name": "Shell", "tool_input": {"command": "git clean -fd"}});
        let outcome = hook.evaluate(input.to_string().as_bytes(), &mut audit);
        assert_eq!(outcome.exit_code(), BLOCK_EXIT_CODE);

        let outcome = hook.evaluate(bash("git clean -fd").as_bytes(), &mut audit);
        assert_eq!(outcome, HookOutcome::Allow);
    }

    #[test]
    fn test_broken_rule_configuration_fails_closed() {
        let error = GuardError::InvalidPattern {
            id: "custom-blocked-1".to_string(),
            source: regex::Regex::new("(").unwrap_err(),
        };
        let hook = Hook::new(Err(&error), SHELL_TOOL, Confirmation::Absent);
        let mut audit = Vec::new();

        let outcome = hook.evaluate(bash("ls").as_bytes(), &mut audit);
        let reason = &response(&outcome).reason;
        assert!(reason.contains("internal error while checking command"));
        assert!(reason.contains("custom-blocked-1"));
        assert_eq!(audit.len(), 1);

        // Nothing to check still passes
        let outcome = hook.evaluate(b"", &mut audit);
        assert_eq!(outcome, HookOutcome::Allow);
    }
}
