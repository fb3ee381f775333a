//! Confirmation Gate
//!
//! A human approves a force push by re-issuing the exact command with
//! `GIT_SAFETY_CONFIRMED=1` prefixed. The guard only sees the token as an
//! explicit [`Confirmation`] value; reading the environment variable is done
//! once at the process boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable carrying the confirmation token
pub const CONFIRM_ENV_VAR: &str = "GIT_SAFETY_CONFIRMED";

/// Whether a human already approved risky actions for this invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confirmation {
    /// No prior approval
    #[default]
    Absent,
    /// Approval present; CONFIRM-category commands are allowed
    Granted,
}

impl Confirmation {
    /// Interpret a raw token value (`1`, `true`, `yes`, `on`)
    pub fn from_value(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => Confirmation::Granted,
            _ => Confirmation::Absent,
        }
    }

    /// Read the token through an arbitrary variable lookup
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_value(lookup(CONFIRM_ENV_VAR).as_deref())
    }

    /// Read the token from the process environment
    pub fn from_process_env() -> Self {
        Self::from_env(|name| std::env::var(name).ok())
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Confirmation::Granted)
    }

    /// The command line a human would run to approve `command`
    pub fn reinvocation(command: &str) -> String {
        format!("{}=1 {}", CONFIRM_ENV_VAR, command)
    }
}

impl From<bool> for Confirmation {
    fn from(granted: bool) -> Self {
        if granted {
            Confirmation::Granted
        } else {
            Confirmation::Absent
        }
    }
}

impl fmt::Display for Confirmation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confirmation::Absent => write!(f, "absent"),
            Confirmation::Granted => write!(f, "granted"),
        }
    }
}
