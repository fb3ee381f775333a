//! Rule Tables
//!
//! Declarative, ordered rule tables used to classify normalized commands.
//!
//! Tables are evaluated strictly in the order SAFE, CONFIRM, BLOCKED and the
//! first matching rule wins; within a table, list order is significant. A
//! command that matches nothing is allowed.
//!
//! Most rules are case-insensitive regular expressions searched anywhere in
//! the command. Recursive deletion is checked by a small state machine over
//! the tokens of each `rm` invocation instead, since the allow-list of temp
//! directories needs per-target reasoning a single pattern cannot express.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::GuardError;

/// Rule category, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Never destructive; short-circuits to allow
    Safe,
    /// Irreversible but sometimes legitimate; needs explicit confirmation
    Confirm,
    /// Never auto-executed; no confirmation escape hatch
    Blocked,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Safe => write!(f, "safe"),
            Category::Confirm => write!(f, "confirm"),
            Category::Blocked => write!(f, "blocked"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "safe" | "allow" => Ok(Category::Safe),
            "confirm" | "confirmation" => Ok(Category::Confirm),
            "blocked" | "block" | "deny" => Ok(Category::Blocked),
            _ => Err(format!("Unknown rule category: {}", s)),
        }
    }
}

/// Which recursive-delete targets a rule denies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteTarget {
    /// `.` or `./`
    CurrentDirectory,
    /// Any path with a `..` component
    ParentTraversal,
    /// Any path not under one of the allowed prefixes
    OutsideAllowList(Vec<String>),
}

impl DeleteTarget {
    fn denies(&self, target: &str) -> bool {
        match self {
            DeleteTarget::CurrentDirectory => target.trim_end_matches('/') == ".",
            DeleteTarget::ParentTraversal => target.split('/').any(|part| part == ".."),
            DeleteTarget::OutsideAllowList(prefixes) => {
                !prefixes.iter().any(|prefix| target.starts_with(prefix.as_str()))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            DeleteTarget::CurrentDirectory => "recursive rm targeting .".to_string(),
            DeleteTarget::ParentTraversal => "recursive rm targeting a path with ..".to_string(),
            DeleteTarget::OutsideAllowList(prefixes) => {
                format!("recursive rm outside {}", prefixes.join(", "))
            }
        }
    }
}

/// How a rule recognizes a command
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Case-insensitive regex, searched anywhere in the command
    Pattern(Regex),
    /// Recursive `rm` with a target of the given kind
    RecursiveDelete(DeleteTarget),
}

/// A single classification rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub category: Category,
    pub matcher: Matcher,
    pub reason: String,
}

impl Rule {
    /// Build a regex rule; patterns are compiled case-insensitively
    pub fn pattern(
        id: &str,
        category: Category,
        pattern: &str,
        reason: &str,
    ) -> Result<Self, GuardError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| GuardError::InvalidPattern {
                id: id.to_string(),
                source,
            })?;
        Ok(Self {
            id: id.to_string(),
            category,
            matcher: Matcher::Pattern(regex),
            reason: reason.to_string(),
        })
    }

    /// Build a recursive-delete rule (always BLOCKED)
    pub fn recursive_delete(id: &str, target: DeleteTarget, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            category: Category::Blocked,
            matcher: Matcher::RecursiveDelete(target),
            reason: reason.to_string(),
        }
    }

    /// Whether this rule matches a normalized command
    pub fn matches(&self, command: &str) -> bool {
        match &self.matcher {
            Matcher::Pattern(regex) => regex.is_match(command),
            Matcher::RecursiveDelete(target) => recursive_delete_targets(command)
                .into_iter()
                .any(|t| target.denies(t)),
        }
    }

    /// Serializable description for listings
    pub fn summary(&self) -> RuleSummary {
        let matcher = match &self.matcher {
            Matcher::Pattern(regex) => regex.as_str().to_string(),
            Matcher::RecursiveDelete(target) => target.describe(),
        };
        RuleSummary {
            id: self.id.clone(),
            category: self.category,
            matcher,
            reason: self.reason.clone(),
        }
    }
}

/// Flattened rule description (for `rules` output)
#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub category: Category,
    pub matcher: String,
    pub reason: String,
}

// ============================================================================
// Built-in tables
// ============================================================================

/// (id, pattern, reason)
type PatternSpec = (&'static str, &'static str, &'static str);

const SAFE_PATTERNS: &[PatternSpec] = &[
    // Branch creation
    (
        "checkout-new-branch",
        r"\bgit\s+checkout\s+(-b|--orphan)\s+",
        "creates a new branch",
    ),
    (
        "switch-create",
        r"\bgit\s+switch\s+(-c|--create)\s+",
        "creates a new branch",
    ),
    // Unstage only; --worktree would touch the working tree
    (
        "restore-staged",
        r"\bgit\s+restore\s+--staged\s+([^-\s]|--\s)",
        "unstages changes without touching the working tree",
    ),
    // Preview only
    (
        "clean-dry-run",
        r"\bgit\s+clean\b.*\s(-[a-z]*n[a-z]*|--dry-run)\b",
        "previews untracked files without removing them",
    ),
    // Read-only
    (
        "read-only",
        r"\bgit\s+(status|log|diff|show|remote|fetch)\b",
        "read-only inspection",
    ),
    (
        "branch-list",
        r"\bgit\s+branch(\s+(-a|-r|-v|-vv|-l|--all|--remotes|--list|--verbose|--show-current|(--merged|--no-merged|--contains)(\s+[^-\s]\S*)?))*$",
        "lists branches without modifying them",
    ),
    // Non-destructive writes
    (
        "safe-write",
        r"\bgit\s+(add|commit|pull|stash\s+push|stash\s+save)\b",
        "non-destructive write",
    ),
];

const CONFIRM_PATTERNS: &[PatternSpec] = &[
    (
        "push-force",
        r"\bgit\s+push\b.*\s--force",
        "destroys remote history - coordinate with team first",
    ),
    (
        "push-force-short",
        r"\bgit\s+push\b.*\s-f\b",
        "force push destroys remote history",
    ),
    (
        "push-plus-refspec",
        r"\bgit\s+push\s+\S+\s+\+",
        "force push via + prefix destroys remote history",
    ),
];

const BLOCKED_PATTERNS: &[PatternSpec] = &[
    (
        "checkout-discard",
        r"\bgit\s+checkout\s+--\s",
        "discards uncommitted changes permanently",
    ),
    (
        "restore-worktree",
        r"\bgit\s+restore\s+\S+",
        "overwrites working tree changes without stash",
    ),
    (
        "reset-hard",
        r"\bgit\s+reset\s+--hard",
        "destroys all uncommitted changes permanently",
    ),
    (
        "reset-merge",
        r"\bgit\s+reset\s+--merge",
        "can lose uncommitted changes during merge resolution",
    ),
    (
        "clean-force",
        r"\bgit\s+clean\b.*\s(-[a-z]*f|--force)",
        "removes untracked files permanently (use -n first to preview)",
    ),
    // -d is the safe, merge-checked delete
    (
        "branch-force-delete",
        r"\bgit\s+branch\s+(.*\s)?(?-i:-D)\b",
        "force-deletes branch without checking if merged",
    ),
    (
        "branch-delete-force",
        r"\bgit\s+branch\s+(.*\s)?(--delete\s+--force|--force\s+--delete|-d\s+-f|-f\s+-d)\b",
        "force-deletes branch without checking if merged",
    ),
    (
        "stash-drop",
        r"\bgit\s+stash\s+drop",
        "permanently deletes stashed changes",
    ),
    (
        "stash-clear",
        r"\bgit\s+stash\s+clear",
        "permanently deletes ALL stashed changes",
    ),
    (
        "rebase-shared-branch",
        r"\bgit\s+rebase\b.*[\s/](main|master|develop)\b",
        "rebasing shared branches can cause issues for collaborators",
    ),
];

/// Ephemeral directories where recursive deletion is allowed
///
/// `$TMPDIR` is covered by its expanded value only. A reference left over
/// after normalization is unset, so the shell would expand it to nothing.
const TEMP_PREFIXES: &[&str] = &["/tmp/", "/var/tmp/", "/private/tmp/"];

/// Allow-list prefixes, including the expanded temp directory when sane
pub fn temp_prefixes(temp_dir: Option<&str>) -> Vec<String> {
    let mut prefixes: Vec<String> = TEMP_PREFIXES.iter().map(|p| p.to_string()).collect();
    if let Some(dir) = temp_dir {
        let trimmed = dir.trim().trim_end_matches('/');
        // An empty or root TMPDIR would allow-list the whole filesystem
        if trimmed.starts_with('/') && !trimmed.contains('$') {
            let prefix = format!("{}/", trimmed);
            if !prefixes.contains(&prefix) {
                prefixes.push(prefix);
            }
        }
    }
    prefixes
}

/// The recursive-delete rules, specific before generic
///
/// The generic allow-list rule also matches `.` and `..` targets, so the
/// specific rules come first to surface their own reasons.
fn recursive_delete_rules(temp_dir: Option<&str>) -> Vec<Rule> {
    vec![
        Rule::recursive_delete(
            "rm-current-dir",
            DeleteTarget::CurrentDirectory,
            "recursive deletion of the current directory - name the directory explicitly",
        ),
        Rule::recursive_delete(
            "rm-parent-traversal",
            DeleteTarget::ParentTraversal,
            "recursive deletion through a parent-directory (..) path",
        ),
        Rule::recursive_delete(
            "rm-outside-temp",
            DeleteTarget::OutsideAllowList(temp_prefixes(temp_dir)),
            "recursive deletion outside temp directories - verify path first",
        ),
    ]
}

// ============================================================================
// Recursive delete state machine
// ============================================================================

/// Shell operators that end a simple command wherever they appear, glued to
/// a word or not: `;`, `&`, `&&`, `|`, `||`, subshells `( )`, and command
/// substitution `$( )` / backticks.
fn is_shell_operator(c: char) -> bool {
    matches!(c, ';' | '&' | '|' | '(' | ')' | '`')
}

/// Quote characters that may be left on a word by an inner `sh -c "..."`
fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201C}' | '\u{201D}' | '\u{2018}' | '\u{2019}')
}

/// Drop quote fragments and the alias escape (`\rm`) from a word
fn clean_word(token: &str) -> &str {
    token
        .trim_matches(is_quote)
        .trim_start_matches('\\')
        .trim_matches(is_quote)
}

/// `Some(true)` for a bare redirection operator whose target is the next
/// word (`>`, `2>>`), `Some(false)` when the target is attached (`>/dev/null`)
fn redirection(token: &str) -> Option<bool> {
    let rest = token.trim_start_matches(|c: char| c.is_ascii_digit());
    if !rest.starts_with(|c: char| c == '<' || c == '>') {
        return None;
    }
    Some(rest.trim_start_matches(|c: char| c == '<' || c == '>').is_empty())
}

/// State of one `rm` invocation while scanning its arguments
#[derive(Debug, Default)]
struct RmInvocation<'a> {
    recursive: bool,
    end_of_options: bool,
    redirect_pending: bool,
    operands: Vec<&'a str>,
}

impl<'a> RmInvocation<'a> {
    fn push(&mut self, token: &'a str) {
        if self.redirect_pending {
            self.redirect_pending = false;
            return;
        }
        if let Some(needs_target) = redirection(token) {
            self.redirect_pending = needs_target;
            return;
        }
        if !self.end_of_options && token == "--" {
            self.end_of_options = true;
            return;
        }
        if !self.end_of_options && token.len() > 1 && token.starts_with('-') {
            let short_recursive = !token.starts_with("--")
                && token[1..].contains(|c: char| c == 'r' || c == 'R');
            if short_recursive || token.eq_ignore_ascii_case("--recursive") {
                self.recursive = true;
            }
            return;
        }
        self.operands.push(token);
    }

    /// Operands of a recursive invocation
    fn into_targets(self) -> Vec<&'a str> {
        if self.recursive {
            self.operands
        } else {
            Vec::new()
        }
    }
}

fn is_rm(token: &str) -> bool {
    token.eq_ignore_ascii_case("rm") || token.to_ascii_lowercase().ends_with("/rm")
}

/// Targets of every recursive `rm` invocation in a normalized command
///
/// The command is cut at shell operators first, so `a;rm`, `(rm ...)`,
/// `$(rm ...)` and `sh -c "rm ..."` all expose their `rm`. An `rm` word
/// anywhere in a segment starts an invocation (`sudo rm`, `xargs rm`),
/// except `git rm`, which only removes tracked files git can restore.
fn recursive_delete_targets(command: &str) -> Vec<&str> {
    let mut targets = Vec::new();

    for segment in command.split(is_shell_operator) {
        let mut current: Option<RmInvocation<'_>> = None;
        let mut previous: Option<&str> = None;

        for token in segment.split_whitespace().map(clean_word) {
            if token.is_empty() {
                continue;
            }
            match current.as_mut() {
                Some(invocation) => invocation.push(token),
                None => {
                    let after_git = previous.is_some_and(|p| p.eq_ignore_ascii_case("git"));
                    if is_rm(token) && !after_git {
                        current = Some(RmInvocation::default());
                    }
                }
            }
            previous = Some(token);
        }

        if let Some(invocation) = current {
            targets.extend(invocation.into_targets());
        }
    }

    targets
}

// ============================================================================
// Rule set
// ============================================================================

/// Extra rules loaded from a JSON file
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub safe: Vec<RuleEntry>,
    #[serde(default)]
    pub confirm: Vec<RuleEntry>,
    #[serde(default)]
    pub blocked: Vec<RuleEntry>,
}

/// One user-supplied regex rule
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub pattern: String,
    pub reason: String,
}

/// Immutable, ordered rule tables
#[derive(Debug, Clone)]
pub struct RuleSet {
    safe: Vec<Rule>,
    confirm: Vec<Rule>,
    blocked: Vec<Rule>,
}

impl RuleSet {
    /// Built-in tables; `temp_dir` extends the recursive-delete allow-list
    pub fn builtin(temp_dir: Option<&str>) -> Result<Self, GuardError> {
        let compile = |specs: &[PatternSpec], category: Category| {
            specs
                .iter()
                .map(|(id, pattern, reason)| Rule::pattern(id, category, pattern, reason))
                .collect::<Result<Vec<_>, _>>()
        };

        let mut blocked = compile(BLOCKED_PATTERNS, Category::Blocked)?;
        blocked.extend(recursive_delete_rules(temp_dir));

        Ok(Self {
            safe: compile(SAFE_PATTERNS, Category::Safe)?,
            confirm: compile(CONFIRM_PATTERNS, Category::Confirm)?,
            blocked,
        })
    }

    /// Append extra rules after the built-ins of each table
    pub fn extend(&mut self, file: RuleFile) -> Result<(), GuardError> {
        let tables = [
            (Category::Safe, file.safe),
            (Category::Confirm, file.confirm),
            (Category::Blocked, file.blocked),
        ];
        for (category, entries) in tables {
            for (index, entry) in entries.into_iter().enumerate() {
                let id = entry
                    .id
                    .unwrap_or_else(|| format!("custom-{}-{}", category, index + 1));
                let rule = Rule::pattern(&id, category, &entry.pattern, &entry.reason)?;
                self.table_mut(category).push(rule);
            }
        }
        Ok(())
    }

    /// Load and append extra rules from a JSON file
    pub fn extend_from_file(&mut self, path: &Path) -> Result<(), GuardError> {
        let content = std::fs::read_to_string(path).map_err(|source| GuardError::RulesFile {
            path: path.to_path_buf(),
            source,
        })?;
        let file: RuleFile =
            serde_json::from_str(&content).map_err(|source| GuardError::RulesParse {
                path: path.to_path_buf(),
                source,
            })?;
        self.extend(file)
    }

    fn table_mut(&mut self, category: Category) -> &mut Vec<Rule> {
        match category {
            Category::Safe => &mut self.safe,
            Category::Confirm => &mut self.confirm,
            Category::Blocked => &mut self.blocked,
        }
    }

    /// All rules in evaluation order
    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.safe
            .iter()
            .chain(self.confirm.iter())
            .chain(self.blocked.iter())
    }

    /// First matching rule in evaluation order; `None` means default-allow
    pub fn classify(&self, normalized: &str) -> Option<&Rule> {
        self.iter().find(|rule| rule.matches(normalized))
    }
}
