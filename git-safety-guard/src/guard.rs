//! Decision Entry Point
//!
//! Ties normalization, rule classification and the confirmation gate
//! together into a single total operation:
//!
//! ```text
//! raw command ──► normalize ──► classify ──► verdict ──► audit
//!                                  │
//!         SAFE ─► Allow            │
//!      CONFIRM ─► Allow if token granted, else RequireConfirmation
//!      BLOCKED ─► Blocked (token ignored)
//!   no match   ─► Allow
//! ```
//!
//! Anything that goes wrong while checking fails closed.

use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::audit::{AuditEvent, AuditRecord, AuditSink};
use crate::confirm::Confirmation;
use crate::error::GuardError;
use crate::normalize::Normalizer;
use crate::rules::{Category, RuleSet};

/// Outcome of classifying one command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Run silently
    Allow,
    /// Needs a human to re-issue the command with the confirmation token
    RequireConfirmation {
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        reason: String,
        /// Exact command line to run after approval
        reinvocation: String,
    },
    /// Never run automatically
    Blocked {
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<String>,
        reason: String,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::RequireConfirmation { reason, .. } | Verdict::Blocked { reason, .. } => {
                Some(reason)
            }
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Verdict::Allow => None,
            Verdict::RequireConfirmation { rule_id, .. } | Verdict::Blocked { rule_id, .. } => {
                rule_id.as_deref()
            }
        }
    }

    /// Short label for text output
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::RequireConfirmation { .. } => "require_confirmation",
            Verdict::Blocked { .. } => "blocked",
        }
    }
}

/// The command safety classifier
#[derive(Debug, Clone)]
pub struct Guard {
    normalizer: Normalizer,
    rules: RuleSet,
}

impl Guard {
    pub fn new(normalizer: Normalizer, rules: RuleSet) -> Self {
        Self { normalizer, rules }
    }

    /// Build from the process environment plus an optional extra rules file
    pub fn from_env(extra_rules: Option<&Path>) -> Result<Self, GuardError> {
        let normalizer = Normalizer::from_env();
        let mut rules = RuleSet::builtin(normalizer.var("TMPDIR"))?;
        if let Some(path) = extra_rules {
            rules.extend_from_file(path)?;
            tracing::debug!(path = %path.display(), "loaded extra rules");
        }
        Ok(Self::new(normalizer, rules))
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn normalize(&self, raw: &str) -> String {
        self.normalizer.normalize(raw)
    }

    /// Classify a raw command
    ///
    /// Empty commands are allowed without classification. CONFIRM matches
    /// are allowed only when `confirmation` is granted; BLOCKED matches
    /// ignore it. Gated decisions are written to `audit`; audit failures are
    /// logged and never change the verdict.
    pub fn decide(
        &self,
        raw: &str,
        confirmation: Confirmation,
        audit: &mut dyn AuditSink,
    ) -> Verdict {
        if raw.trim().is_empty() {
            return Verdict::Allow;
        }

        let classified = catch_fault(|| {
            let normalized = self.normalizer.normalize(raw);
            tracing::trace!(%normalized, "normalized command");
            self.rules
                .classify(&normalized)
                .map(|rule| (rule.category, rule.id.clone(), rule.reason.clone()))
        });

        let matched = match classified {
            Ok(matched) => matched,
            Err(fault) => {
                tracing::error!(%fault, "classification fault, failing closed");
                let reason = format!("internal error while checking command: {}", fault);
                return fail_closed(audit, raw, &reason);
            }
        };

        let Some((category, rule_id, reason)) = matched else {
            tracing::debug!("no rule matched, allowing");
            return Verdict::Allow;
        };

        match category {
            Category::Safe => {
                tracing::debug!(rule = %rule_id, "safe pattern");
                Verdict::Allow
            }
            Category::Confirm if confirmation.is_granted() => {
                tracing::info!(rule = %rule_id, "confirmed by token");
                emit(
                    audit,
                    AuditRecord::new(AuditEvent::AllowedConfirmed, raw, &reason).with_rule(&rule_id),
                );
                Verdict::Allow
            }
            Category::Confirm => {
                tracing::info!(rule = %rule_id, "confirmation required");
                emit(
                    audit,
                    AuditRecord::new(AuditEvent::NeedsConfirmation, raw, &reason)
                        .with_rule(&rule_id),
                );
                Verdict::RequireConfirmation {
                    rule_id: Some(rule_id),
                    reason,
                    reinvocation: Confirmation::reinvocation(raw),
                }
            }
            Category::Blocked => {
                tracing::info!(rule = %rule_id, "blocked");
                emit(
                    audit,
                    AuditRecord::new(AuditEvent::Blocked, raw, &reason).with_rule(&rule_id),
                );
                Verdict::Blocked {
                    rule_id: Some(rule_id),
                    reason,
                }
            }
        }
    }
}

/// Block without a rule match (invalid input, internal fault), audited
pub fn fail_closed(audit: &mut dyn AuditSink, command: &str, reason: &str) -> Verdict {
    emit(audit, AuditRecord::new(AuditEvent::Blocked, command, reason));
    Verdict::Blocked {
        rule_id: None,
        reason: reason.to_string(),
    }
}

fn emit(audit: &mut dyn AuditSink, record: AuditRecord) {
    if let Err(e) = audit.record(&record) {
        tracing::warn!(error = %e, "failed to write audit record");
    }
}

/// Run `f`, turning a panic into its message
fn catch_fault<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
