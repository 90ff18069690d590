// ABOUTME: Platform-agnostic chat transport abstraction and the terminal driver seam
// ABOUTME: Generalizes the ChatRoom/ChatInterface split to the flatter Update/Outbound shape

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An inbound event from the chat transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub user_id: String,
    pub chat_id: String,
    pub text: Option<String>,
    pub callback_data: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

/// An outbound response.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Outbound {
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub buttons: Vec<Vec<InlineButton>>,
    #[serde(default)]
    pub parse_mode: Option<String>,
}

/// The chat transport seam: inbound updates in, outbound messages out.
/// Polling and webhook adapters both implement this identically.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn next_update(&self) -> anyhow::Result<Update>;
    async fn send(&self, outbound: Outbound) -> anyhow::Result<()>;
}

/// The facade over the external multiplexer binary (Component A). Defined
/// here so the Dispatcher and Output Scheduler can depend on the
/// abstraction without depending on the concrete process-spawning
/// implementation, which lives in the binary crate.
#[async_trait]
pub trait TerminalDriver: Send + Sync {
    async fn create_session(&self, tab_id: &str) -> anyhow::Result<()>;
    async fn has_session(&self, tab_id: &str) -> anyhow::Result<bool>;
    async fn kill_session(&self, tab_id: &str) -> anyhow::Result<()>;
    async fn list_sessions(&self) -> anyhow::Result<Vec<String>>;
    async fn send_text(&self, tab_id: &str, text: &str) -> anyhow::Result<()>;
    async fn send_key(&self, tab_id: &str, key: &str) -> anyhow::Result<()>;
    async fn capture(&self, tab_id: &str, scrollback_lines: usize) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_defaults_to_no_buttons() {
        let out = Outbound {
            chat_id: "c1".to_string(),
            text: "hi".to_string(),
            ..Default::default()
        };
        assert!(out.buttons.is_empty());
        assert_eq!(out.parse_mode, None);
    }
}
