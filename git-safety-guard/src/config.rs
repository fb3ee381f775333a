//! Runtime configuration
//!
//! Resolved once at startup from CLI flags, each of which falls back to an
//! environment variable so the hook can be configured from `settings.json`
//! without changing its command line.

use std::path::PathBuf;

use crate::audit::{AuditTrail, JsonlAuditLog, StreamAudit, DEFAULT_AUDIT_MAX_BYTES};
use crate::error::GuardError;
use crate::guard::Guard;
use crate::hook::SHELL_TOOL;

/// Default diagnostic log filter
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Tool name whose commands are classified
    pub shell_tool: String,
    /// Optional JSONL audit file
    pub audit_log: Option<PathBuf>,
    /// Rotation threshold for the audit file (0 disables rotation)
    pub audit_max_bytes: u64,
    /// Optional JSON file with extra rules
    pub rules_file: Option<PathBuf>,
    /// `tracing` filter directive for stderr diagnostics
    pub log_level: String,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            shell_tool: SHELL_TOOL.to_string(),
            audit_log: None,
            audit_max_bytes: DEFAULT_AUDIT_MAX_BYTES,
            rules_file: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl GuardConfig {
    /// Build the classifier from the process environment and rules file
    pub fn build_guard(&self) -> Result<Guard, GuardError> {
        Guard::from_env(self.rules_file.as_deref())
    }

    /// Audit sinks: stderr lines (when `include_stderr`) plus the JSONL file
    pub fn audit_trail(&self, include_stderr: bool) -> AuditTrail {
        let mut trail = AuditTrail::new();
        if include_stderr {
            trail = trail.with_sink(StreamAudit::stderr());
        }
        if let Some(path) = &self.audit_log {
            trail = trail.with_sink(JsonlAuditLog::new(path, self.audit_max_bytes));
        }
        if trail.is_empty() {
            tracing::debug!("audit disabled");
        } else {
            tracing::debug!(sinks = trail.len(), "audit trail ready");
        }
        trail
    }
}
