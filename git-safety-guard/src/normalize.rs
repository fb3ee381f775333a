//! Command Normalization
//!
//! Reshapes a raw shell command so that superficial evasions (extra
//! whitespace, quoted paths, `$VAR` indirection) are matched by the same
//! rules as the plain form. Normalization only changes the textual shape of
//! a command, never what it would execute.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

/// `$$` is consumed as a unit so `$$NAME` never turns into a fresh reference
static VAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\$|\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("Invalid variable reference regex")
});

/// Opening/closing quote pairs stripped from token edges
const QUOTE_PAIRS: [(char, char); 4] = [
    ('"', '"'),
    ('\'', '\''),
    ('\u{201C}', '\u{201D}'),
    ('\u{2018}', '\u{2019}'),
];

/// Normalizes commands against a snapshot of environment variables
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    vars: HashMap<String, String>,
}

impl Normalizer {
    /// Create a normalizer over an explicit variable snapshot
    pub fn new(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Snapshot the current process environment
    pub fn from_env() -> Self {
        Self::new(std::env::vars().collect())
    }

    /// Look up a variable in the snapshot
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Normalize a raw command
    ///
    /// Expands variable references, collapses whitespace runs to a single
    /// space and strips quote pairs surrounding whole tokens. The result is
    /// a fixed point: `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(&self, raw: &str) -> String {
        let expanded = self.expand_vars(raw);
        expanded
            .split_whitespace()
            .map(strip_quotes)
            .filter(|token| !token.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Replace `$NAME` / `${NAME}` with snapshot values
    ///
    /// Unset variables stay verbatim. Values containing `$` are not
    /// substituted, otherwise a second pass could expand them again.
    fn expand_vars(&self, raw: &str) -> String {
        VAR_REF
            .replace_all(raw, |caps: &Captures| {
                let name = caps.get(1).or_else(|| caps.get(2)).map(|m| m.as_str());
                match name.and_then(|n| self.vars.get(n)) {
                    Some(value) if !value.contains('$') => value.clone(),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

/// Strip every layer of matching quotes around a token
fn strip_quotes(token: &str) -> &str {
    let mut current = token;
    loop {
        let mut chars = current.chars();
        let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
            return current;
        };
        let quoted = QUOTE_PAIRS
            .iter()
            .any(|&(open, close)| first == open && last == close);
        if !quoted {
            return current;
        }
        current = &current[first.len_utf8()..current.len() - last.len_utf8()];
    }
}
