mod audit;
mod config;
mod confirm;
mod error;
mod guard;
mod hook;
mod logging;
mod normalize;
mod rules;

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::io::Read;
use std::path::PathBuf;

use audit::DEFAULT_AUDIT_MAX_BYTES;
use config::{GuardConfig, DEFAULT_LOG_LEVEL};
use confirm::Confirmation;
use error::GuardError;
use guard::Verdict;
use hook::{Hook, HookOutcome, BLOCK_EXIT_CODE, SHELL_TOOL};

#[derive(Parser)]
#[command(name = "git-safety-guard")]
#[command(
    about = "Blocks destructive git and filesystem commands before an AI assistant runs them",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    /// Defaults to `hook` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct GlobalArgs {
    /// Append audit records as JSON lines to this file
    #[arg(long, env = "GIT_SAFETY_AUDIT_LOG", global = true)]
    audit_log: Option<PathBuf>,

    /// Rotate the audit log once it reaches this many bytes (0 disables)
    #[arg(long, env = "GIT_SAFETY_AUDIT_MAX_BYTES", default_value_t = DEFAULT_AUDIT_MAX_BYTES, global = true)]
    audit_max_bytes: u64,

    /// JSON file with extra safe/confirm/blocked rules
    #[arg(long, env = "GIT_SAFETY_RULES", global = true)]
    rules: Option<PathBuf>,

    /// Tool name whose commands are checked
    #[arg(long, env = "GIT_SAFETY_SHELL_TOOL", default_value = SHELL_TOOL, global = true)]
    shell_tool: String,

    /// Diagnostic log filter (written to stderr)
    #[arg(long, env = "GIT_SAFETY_LOG", default_value = DEFAULT_LOG_LEVEL, global = true)]
    log_level: String,
}

impl From<GlobalArgs> for GuardConfig {
    fn from(args: GlobalArgs) -> Self {
        GuardConfig {
            shell_tool: args.shell_tool,
            audit_log: args.audit_log,
            audit_max_bytes: args.audit_max_bytes,
            rules_file: args.rules,
            log_level: args.log_level,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Handle a PreToolUse hook request read from stdin
    Hook,

    /// Classify a single command
    Check {
        /// Command to classify
        #[arg(short, long)]
        command: String,

        /// Treat the command as already confirmed by a human
        #[arg(long)]
        confirmed: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the normalized form of a command
    Normalize {
        /// Command to normalize
        #[arg(short, long)]
        command: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List the effective rules in evaluation order
    Rules {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let config = GuardConfig::from(cli.global);

    if let Err(e) = logging::init_logging(&config.log_level) {
        eprintln!("Warning: {}", e);
    }

    let code = match cli.command.unwrap_or(Commands::Hook) {
        Commands::Hook => run_hook(&config),

        Commands::Check {
            command,
            confirmed,
            format,
        } => {
            let guard = build_guard_or_exit(&config);
            let confirmation =
                Confirmation::from(confirmed || Confirmation::from_process_env().is_granted());
            let mut audit = config.audit_trail(false);
            let verdict = guard.decide(&command, confirmation, &mut audit);
            let normalized = guard.normalize(&command);

            if format == "json" {
                let output = json!({
                    "command": command,
                    "normalized": normalized,
                    "confirmation": confirmation,
                    "result": verdict,
                });
                print_json(&output);
            } else {
                print_verdict(&command, &normalized, &verdict);
            }

            if verdict.is_allowed() {
                0
            } else {
                BLOCK_EXIT_CODE
            }
        }

        Commands::Normalize { command, format } => {
            let guard = build_guard_or_exit(&config);
            output_result(&format, "normalized", &guard.normalize(&command));
            0
        }

        Commands::Rules { format } => {
            let guard = build_guard_or_exit(&config);
            let summaries: Vec<_> = guard.rules().iter().map(|rule| rule.summary()).collect();

            if format == "json" {
                print_json(&summaries);
            } else {
                for summary in &summaries {
                    println!("[{}] {}", summary.category, summary.id);
                    println!("    match:  {}", summary.matcher);
                    println!("    reason: {}", summary.reason);
                }
            }
            0
        }
    };

    std::process::exit(code);
}

/// Read one request from stdin, print a response if blocked, return exit code
fn run_hook(config: &GuardConfig) -> i32 {
    let mut audit = config.audit_trail(true);
    let guard = config.build_guard();
    if let Err(e) = &guard {
        tracing::error!(error = %e, "failed to load rules; shell commands will be blocked");
    }
    let hook = Hook::new(
        guard.as_ref(),
        &config.shell_tool,
        Confirmation::from_process_env(),
    );

    let mut input = Vec::new();
    let outcome = match std::io::stdin().read_to_end(&mut input) {
        Ok(_) => hook.evaluate(&input, &mut audit),
        Err(e) => hook::invalid_input(&mut audit, GuardError::InvalidInput(e.to_string())),
    };

    if let HookOutcome::Deny { verdict, response } = &outcome {
        tracing::info!(
            verdict = verdict.label(),
            rule = verdict.rule_id().unwrap_or("-"),
            "denied hook request"
        );
        match serde_json::to_string(response) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error serializing hook response: {}", e),
        }
    }
    outcome.exit_code()
}

fn build_guard_or_exit(config: &GuardConfig) -> guard::Guard {
    match config.build_guard() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error loading rules: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_verdict(command: &str, normalized: &str, verdict: &Verdict) {
    let icon = if verdict.is_allowed() { "✓" } else { "✗" };
    println!("{} Command: {}", icon, command);
    if normalized != command {
        println!("Normalized: {}", normalized);
    }
    println!("Verdict: {}", verdict.label());
    if let Some(rule_id) = verdict.rule_id() {
        println!("Rule: {}", rule_id);
    }
    if let Some(reason) = verdict.reason() {
        println!("Reason: {}", reason);
    }
    if let Verdict::RequireConfirmation { reinvocation, .. } = verdict {
        println!("Re-run after approval: {}", reinvocation);
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            std::process::exit(1);
        }
    }
}

fn output_result(format: &str, key: &str, value: &str) {
    if format == "json" {
        println!("{}", json!({ key: value }));
    } else {
        println!("{}={}", key, value);
    }
}
