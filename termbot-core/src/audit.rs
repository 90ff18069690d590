// ABOUTME: Append-only newline-delimited audit trail of dispatched commands
// ABOUTME: Writes are best-effort and non-blocking to the command path; failures only log

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: String,
    pub user_id: String,
    pub tab_id: Option<String>,
    pub command: String,
    pub outcome: String,
}

const MAX_COMMAND_LEN: usize = 256;

impl AuditRecord {
    pub fn new(
        user_id: impl Into<String>,
        tab_id: Option<String>,
        command: &str,
        outcome: impl Into<String>,
    ) -> Self {
        let mut truncated: String = command.chars().take(MAX_COMMAND_LEN).collect();
        if command.chars().count() > MAX_COMMAND_LEN {
            truncated.push_str("...");
        }
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            user_id: user_id.into(),
            tab_id,
            command: truncated,
            outcome: outcome.into(),
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl AuditLog {
    pub fn open<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path).ok();
        Self {
            path,
            file: Mutex::new(file),
        }
    }

    /// Append a record. Never returns an error to the caller: a failed
    /// write is logged via `tracing` and otherwise swallowed, since the
    /// command path must not fail because auditing did.
    pub fn append(&self, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize audit record");
                return;
            }
        };

        let mut guard = self.file.lock().unwrap();
        if guard.is_none() {
            *guard = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        if let Some(file) = guard.as_mut() {
            if let Err(e) = writeln!(file, "{line}") {
                tracing::warn!(error = %e, path = %self.path.display(), "failed to write audit record");
                *guard = None;
            }
        } else {
            tracing::warn!(path = %self.path.display(), "audit log unavailable, dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path);
        log.append(&AuditRecord::new("u1", Some("t1".to_string()), "ls", "ok"));
        log.append(&AuditRecord::new("u1", None, "pwd", "blocked"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.lines().next().unwrap().contains("\"command\":\"ls\""));
    }

    #[test]
    fn command_is_truncated_past_max_len() {
        let long = "x".repeat(1000);
        let record = AuditRecord::new("u1", None, &long, "ok");
        assert!(record.command.len() < 1000);
        assert!(record.command.ends_with("..."));
    }

    #[test]
    fn missing_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let log = AuditLog::open(&path);
        log.append(&AuditRecord::new("u1", None, "ls", "ok"));
        assert!(path.exists());
    }
}
