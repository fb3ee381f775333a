//! Audit Trail
//!
//! Write-only record of every gated decision (confirmation requests, blocks
//! and confirmed overrides). The guard never reads its own audit output.
//!
//! Sinks:
//! - [`StreamAudit`]: one human-readable line per event on a diagnostic
//!   stream (stderr in the hook, never stdout)
//! - [`JsonlAuditLog`]: optional append-only JSONL file, locked for
//!   concurrent writers and gzip-rotated when it grows too large

use chrono::{SecondsFormat, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::error::GuardError;

/// Commands longer than this are cut and suffixed with `...`
pub const COMMAND_PREVIEW_LEN: usize = 100;

/// Default size at which the JSONL log is rotated (1 MiB)
pub const DEFAULT_AUDIT_MAX_BYTES: u64 = 1024 * 1024;

/// Kind of audited decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    /// A CONFIRM command ran because the token was present
    AllowedConfirmed,
    /// A CONFIRM command was held back pending approval
    NeedsConfirmation,
    /// A command was blocked (rule match, invalid input or internal fault)
    Blocked,
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::AllowedConfirmed => write!(f, "ALLOWED_CONFIRMED"),
            AuditEvent::NeedsConfirmation => write!(f, "NEEDS_CONFIRMATION"),
            AuditEvent::Blocked => write!(f, "BLOCKED"),
        }
    }
}

/// A single audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339 / ISO 8601, UTC
    pub timestamp: String,
    pub event: AuditEvent,
    /// Matching rule, if the decision came from one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub reason: String,
    /// Truncated to [`COMMAND_PREVIEW_LEN`] characters
    pub command: String,
}

impl AuditRecord {
    pub fn new(event: AuditEvent, command: &str, reason: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
            rule_id: None,
            reason: reason.to_string(),
            command: truncate_command(command),
        }
    }

    pub fn with_rule(mut self, rule_id: &str) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    /// `[timestamp] EVENT: reason | command`
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}: {} | {}",
            self.timestamp, self.event, self.reason, self.command
        )
    }
}

/// Cut a command to [`COMMAND_PREVIEW_LEN`] characters plus `...`
pub fn truncate_command(command: &str) -> String {
    match command.char_indices().nth(COMMAND_PREVIEW_LEN) {
        Some((end, _)) => format!("{}...", &command[..end]),
        None => command.to_string(),
    }
}

/// Destination for audit records
pub trait AuditSink {
    fn record(&mut self, record: &AuditRecord) -> Result<(), GuardError>;
}

/// In-memory sink
impl AuditSink for Vec<AuditRecord> {
    fn record(&mut self, record: &AuditRecord) -> Result<(), GuardError> {
        self.push(record.clone());
        Ok(())
    }
}

/// Writes [`AuditRecord::to_line`] to any stream
pub struct StreamAudit<W: Write> {
    writer: W,
}

impl<W: Write> StreamAudit<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl StreamAudit<std::io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }
}

impl<W: Write> AuditSink for StreamAudit<W> {
    fn record(&mut self, record: &AuditRecord) -> Result<(), GuardError> {
        writeln!(self.writer, "{}", record.to_line())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Append-only JSONL audit file
///
/// Each append takes an exclusive lock so parallel hook invocations cannot
/// interleave lines. When the file reaches `max_bytes` its contents are
/// compressed to `<path>.1.gz` (replacing any previous archive) and the file
/// is truncated before the new record is written. `max_bytes == 0` disables
/// rotation.
#[derive(Debug, Clone)]
pub struct JsonlAuditLog {
    path: PathBuf,
    max_bytes: u64,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    /// Location of the rotated archive
    pub fn rotated_path(&self) -> PathBuf {
        let mut name: OsString = self.path.as_os_str().to_os_string();
        name.push(".1.gz");
        PathBuf::from(name)
    }

    fn append(&self, record: &AuditRecord) -> Result<(), GuardError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        // Blocks until other writers are done
        file.lock_exclusive()?;
        let result = self.append_locked(&file, record);
        let unlocked = file.unlock();
        result?;
        unlocked?;
        Ok(())
    }

    fn append_locked(&self, file: &File, record: &AuditRecord) -> Result<(), GuardError> {
        if self.max_bytes > 0 && file.metadata()?.len() >= self.max_bytes {
            self.rotate(file)?;
        }

        let json = serde_json::to_string(record)?;
        let mut writer = std::io::BufWriter::new(file);
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn rotate(&self, file: &File) -> Result<(), GuardError> {
        let mut reader = file;
        reader.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents)?;

        let archive = File::create(self.rotated_path())?;
        let mut encoder = GzEncoder::new(archive, Compression::default());
        encoder.write_all(&contents)?;
        encoder.finish()?;

        file.set_len(0)?;
        tracing::debug!(path = %self.path.display(), bytes = contents.len(), "rotated audit log");
        Ok(())
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&mut self, record: &AuditRecord) -> Result<(), GuardError> {
        self.append(record)
    }
}

/// Fans a record out to several sinks
///
/// Every sink is attempted; the first failure is returned.
#[derive(Default)]
pub struct AuditTrail {
    sinks: Vec<Box<dyn AuditSink>>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AuditSink for AuditTrail {
    fn record(&mut self, record: &AuditRecord) -> Result<(), GuardError> {
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.record(record) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::path::Path;
    use tempfile::TempDir;

    fn read_records(path: &Path) -> Vec<AuditRecord> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_truncate_command() {
        assert_eq!(truncate_command("git status"), "git status");

        let exact = "a".repeat(COMMAND_PREVIEW_LEN);
        assert_eq!(truncate_command(&exact), exact);

        let long = "b".repeat(COMMAND_PREVIEW_LEN + 20);
        let cut = truncate_command(&long);
        assert_eq!(cut, format!("{}...", "b".repeat(COMMAND_PREVIEW_LEN)));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let long = "é".repeat(COMMAND_PREVIEW_LEN + 5);
        let cut = truncate_command(&long);
        assert_eq!(cut.chars().count(), COMMAND_PREVIEW_LEN + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_event_display_and_serialization() {
        assert_eq!(AuditEvent::AllowedConfirmed.to_string(), "ALLOWED_CONFIRMED");
        assert_eq!(AuditEvent::NeedsConfirmation.to_string(), "NEEDS_CONFIRMATION");
        assert_eq!(
            serde_json::to_string(&AuditEvent::Blocked).unwrap(),
            "\"BLOCKED\""
        );
    }

    #[test]
    fn test_record_line_format() {
        let record = AuditRecord::new(AuditEvent::Blocked, "git reset --hard", "destroys changes")
            .with_rule("reset-hard");
        let line = record.to_line();
        assert!(line.starts_with('['));
        assert!(line.contains("] BLOCKED: destroys changes | git reset --hard"));
        assert!(record.timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    }

    #[test]
    fn test_stream_audit_writes_one_line() {
        let mut buffer = Vec::new();
        let record = AuditRecord::new(AuditEvent::NeedsConfirmation, "git push -f", "force push");
        StreamAudit::new(&mut buffer).record(&record).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output.lines().count(), 1);
        assert!(output.contains("NEEDS_CONFIRMATION: force push | git push -f"));
    }

    #[test]
    fn test_jsonl_log_appends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let mut log = JsonlAuditLog::new(&path, DEFAULT_AUDIT_MAX_BYTES);

        let blocked = AuditRecord::new(AuditEvent::Blocked, "rm -rf /", "outside temp")
            .with_rule("rm-outside-temp");
        let confirmed = AuditRecord::new(AuditEvent::AllowedConfirmed, "git push -f", "force push");
        log.record(&blocked).unwrap();
        log.record(&confirmed).unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].event, AuditEvent::Blocked);
        assert_eq!(records[0].rule_id.as_deref(), Some("rm-outside-temp"));
        assert_eq!(records[1].event, AuditEvent::AllowedConfirmed);
        assert!(records[1].rule_id.is_none());
    }

    #[test]
    fn test_jsonl_log_rotates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = JsonlAuditLog::new(&path, 10);

        log.record(&AuditRecord::new(AuditEvent::Blocked, "first", "r1")).unwrap();
        let first_contents = fs::read(&path).unwrap();
        assert!(!log.rotated_path().exists());

        log.record(&AuditRecord::new(AuditEvent::Blocked, "second", "r2")).unwrap();

        let records = read_records(&path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "second");

        let mut decoder = GzDecoder::new(File::open(log.rotated_path()).unwrap());
        let mut archived = Vec::new();
        decoder.read_to_end(&mut archived).unwrap();
        assert_eq!(archived, first_contents);
    }

    #[test]
    fn test_rotation_disabled_with_zero_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = JsonlAuditLog::new(&path, 0);

        for i in 0..5 {
            log.record(&AuditRecord::new(AuditEvent::Blocked, &format!("cmd {i}"), "r"))
                .unwrap();
        }
        assert_eq!(read_records(&path).len(), 5);
        assert!(!log.rotated_path().exists());
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&mut self, _record: &AuditRecord) -> Result<(), GuardError> {
            Err(GuardError::Audit(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn test_trail_reaches_every_sink() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut trail = AuditTrail::new()
            .with_sink(FailingSink)
            .with_sink(JsonlAuditLog::new(&path, 0));
        assert_eq!(trail.len(), 2);

        let result = trail.record(&AuditRecord::new(AuditEvent::Blocked, "x", "y"));
        assert!(result.is_err());
        assert_eq!(read_records(&path).len(), 1);
    }
}
