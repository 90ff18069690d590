// ABOUTME: Core data model shared by the registry, user-state, and prompt-rule stores
// ABOUTME: Plain serde-derived records, no behavior beyond small constructors/helpers

use serde::{Deserialize, Serialize};

pub const SESSION_PREFIX: &str = "tgbot_";

/// A user-visible named terminal slot, backed by exactly one multiplexer session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tab {
    pub tab_id: String,
    pub user_id: String,
    pub display_name: String,
    pub created_at: String,
    pub last_used_at: String,
}

impl Tab {
    pub fn session_name(&self) -> String {
        format!("{SESSION_PREFIX}{}", self.tab_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Interval {
    OneMinute,
    FiveMinutes,
    OneHour,
    Never,
}

impl Default for Interval {
    fn default() -> Self {
        Interval::FiveMinutes
    }
}

impl Interval {
    pub fn as_duration(self) -> Option<std::time::Duration> {
        match self {
            Interval::OneMinute => Some(std::time::Duration::from_secs(60)),
            Interval::FiveMinutes => Some(std::time::Duration::from_secs(5 * 60)),
            Interval::OneHour => Some(std::time::Duration::from_secs(60 * 60)),
            Interval::Never => None,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::OneMinute),
            "5m" => Some(Interval::FiveMinutes),
            "1h" => Some(Interval::OneHour),
            "never" => Some(Interval::Never),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Mode {
    Normal,
    Claude,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Normal
    }
}

/// Per-user state tracked across restarts (Component C).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserState {
    pub user_id: String,
    pub active_tab_id: Option<String>,
    pub interval: Interval,
    pub mode: Mode,
    pub authorized: bool,
    pub server_ip: Option<String>,
}

impl UserState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            active_tab_id: None,
            interval: Interval::default(),
            mode: Mode::default(),
            authorized: false,
            server_ip: None,
        }
    }
}

/// A whitelist entry consulted by the Auth Manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhitelistEntry {
    pub user_id: String,
    pub access_key: String,
    #[serde(default)]
    pub server_ip: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EditState {
    AwaitingContent,
    Saving,
    Closed,
}

/// A single-file, per-user stateful edit flow (Component H).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EditSession {
    pub edit_id: String,
    pub path: String,
    pub started_at: String,
    pub state: EditState,
}

/// Literal keystrokes bound to an inline button produced by a matched prompt rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleButton {
    pub label: String,
    pub action: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleKind {
    Regex,
    Keyword,
}

/// A matcher over captured pane text (Component F).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptRule {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    /// Regex source (kind == Regex) or newline-free keyword list (kind == Keyword).
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    pub incremental_output: bool,
    #[serde(default)]
    pub buttons: Vec<RuleButton>,
}

/// The last captured pane contents for a tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub tab_id: String,
    pub captured_at: String,
    pub text: String,
    pub hash: String,
}
