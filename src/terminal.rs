// ABOUTME: Thin facade over the multiplexer binary, invoked as an external process
// ABOUTME: create/has/kill/list sessions, send text/keys, capture pane text

use async_trait::async_trait;
use std::time::Duration;
use termbot_core::error::DriverError;
use termbot_core::model::SESSION_PREFIX;
use termbot_core::traits::TerminalDriver;
use tokio::process::Command;
use tokio::time::timeout;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MultiplexerDriver {
    binary_path: String,
    width: u16,
    height: u16,
}

impl MultiplexerDriver {
    pub fn new(binary_path: impl Into<String>, width: u16, height: u16) -> Self {
        Self {
            binary_path: binary_path.into(),
            width,
            height,
        }
    }

    fn session_name(tab_id: &str) -> String {
        format!("{SESSION_PREFIX}{tab_id}")
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, DriverError> {
        if self.binary_path.contains("..") || self.binary_path.contains('\0') {
            return Err(DriverError::DriverFault(
                "invalid multiplexer binary path".to_string(),
            ));
        }

        tracing::debug!(binary = %self.binary_path, ?args, "invoking multiplexer");

        let mut command = Command::new(&self.binary_path);
        command.args(args);

        let output = timeout(DEFAULT_TIMEOUT, command.output())
            .await
            .map_err(|_| DriverError::Timeout(DEFAULT_TIMEOUT))?
            .map_err(|e| DriverError::DriverFault(e.to_string()))?;

        Ok(output)
    }
}

#[async_trait]
impl TerminalDriver for MultiplexerDriver {
    async fn create_session(&self, tab_id: &str) -> anyhow::Result<()> {
        let session = Self::session_name(tab_id);
        let width = self.width.to_string();
        let height = self.height.to_string();
        let output = self
            .run(&[
                "new-session",
                "-d",
                "-s",
                &session,
                "-x",
                &width,
                "-y",
                &height,
            ])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::DriverFault(stderr.to_string()).into());
        }
        Ok(())
    }

    async fn has_session(&self, tab_id: &str) -> anyhow::Result<bool> {
        let session = Self::session_name(tab_id);
        let output = self.run(&["has-session", "-t", &session]).await?;
        Ok(output.status.success())
    }

    async fn kill_session(&self, tab_id: &str) -> anyhow::Result<()> {
        let session = Self::session_name(tab_id);
        let output = self.run(&["kill-session", "-t", &session]).await?;
        // Idempotent: killing an already-missing session is not an error.
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("can't find session") || stderr.contains("no such session") {
                return Ok(());
            }
            return Err(DriverError::DriverFault(stderr.to_string()).into());
        }
        Ok(())
    }

    async fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
        let output = self
            .run(&["list-sessions", "-F", "#{session_name}"])
            .await?;
        if !output.status.success() {
            // An empty server (no sessions at all) is reported as a
            // nonzero exit by most multiplexers; treat it as an empty list.
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().map(str::to_string).collect())
    }

    async fn send_text(&self, tab_id: &str, text: &str) -> anyhow::Result<()> {
        let session = Self::session_name(tab_id);
        if !self.has_session(tab_id).await? {
            return Err(DriverError::SessionMissing {
                tab_id: tab_id.to_string(),
            }
            .into());
        }
        let output = self
            .run(&["send-keys", "-t", &session, text, "Enter"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::DriverFault(stderr.to_string()).into());
        }
        Ok(())
    }

    async fn send_key(&self, tab_id: &str, key: &str) -> anyhow::Result<()> {
        let session = Self::session_name(tab_id);
        if !self.has_session(tab_id).await? {
            return Err(DriverError::SessionMissing {
                tab_id: tab_id.to_string(),
            }
            .into());
        }
        let output = self.run(&["send-keys", "-t", &session, key]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::DriverFault(stderr.to_string()).into());
        }
        Ok(())
    }

    async fn capture(&self, tab_id: &str, scrollback_lines: usize) -> anyhow::Result<String> {
        let session = Self::session_name(tab_id);
        if !self.has_session(tab_id).await? {
            return Err(DriverError::SessionMissing {
                tab_id: tab_id.to_string(),
            }
            .into());
        }
        let start = format!("-{scrollback_lines}");
        let output = self
            .run(&["capture-pane", "-t", &session, "-p", "-S", &start])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DriverError::DriverFault(stderr.to_string()).into());
        }

        let raw = String::from_utf8_lossy(&output.stdout);
        Ok(normalize_capture(&raw))
    }
}

/// Normalize line endings and strip non-printable bytes except newline.
fn normalize_capture(text: &str) -> String {
    text.replace("\r\n", "\n")
        .chars()
        .filter(|c| *c == '\n' || !c.is_control())
        .collect()
}
