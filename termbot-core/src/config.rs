// ABOUTME: Layered TOML + environment-variable configuration, validated at load
// ABOUTME: Secrets are redacted in Debug output so they never land in logs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub tmux: TmuxConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub whitelist_keys: Vec<WhitelistKeyConfig>,
    #[serde(default)]
    pub command_policy: CommandPolicyConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    #[serde(default)]
    pub use_webhook: bool,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("use_webhook", &self.use_webhook)
            .field("webhook_url", &self.webhook_url)
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmuxConfig {
    #[serde(default = "default_width")]
    pub width: u16,
    #[serde(default = "default_height")]
    pub height: u16,
    #[serde(default = "default_scrollback")]
    pub scrollback: usize,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            scrollback: default_scrollback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
    #[serde(default = "default_tag_registry_path")]
    pub tag_registry_path: String,
    #[serde(default = "default_prompt_rules_path")]
    pub prompt_rules_path: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            tag_registry_path: default_tag_registry_path(),
            prompt_rules_path: default_prompt_rules_path(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WhitelistKeyConfig {
    pub user_id: String,
    pub access_key: String,
    #[serde(default)]
    pub server_ip: Option<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub admin: bool,
}

impl std::fmt::Debug for WhitelistKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhitelistKeyConfig")
            .field("user_id", &self.user_id)
            .field("access_key", &"[REDACTED]")
            .field("server_ip", &self.server_ip)
            .field("expires_at", &self.expires_at)
            .field("admin", &self.admin)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandPolicyConfig {
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
    #[serde(default)]
    pub require_allowlist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_lockout_seconds")]
    pub lockout_seconds: i64,
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    #[serde(default = "default_failure_window_seconds")]
    pub failure_window_seconds: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lockout_seconds: default_lockout_seconds(),
            max_failures: default_max_failures(),
            failure_window_seconds: default_failure_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: String,
    #[serde(default = "default_audit_rotate_max_bytes")]
    pub audit_rotate_max_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            audit_log_path: default_audit_log_path(),
            audit_rotate_max_bytes: default_audit_rotate_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
        }
    }
}

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}
fn default_listen_port() -> u16 {
    8443
}
fn default_poll_timeout_secs() -> u32 {
    30
}
fn default_width() -> u16 {
    80
}
fn default_height() -> u16 {
    24
}
fn default_scrollback() -> usize {
    2000
}
fn default_state_path() -> String {
    "./data/user_state.json".to_string()
}
fn default_tag_registry_path() -> String {
    "./data/tags.json".to_string()
}
fn default_prompt_rules_path() -> String {
    "./data/prompt_rules.json".to_string()
}
fn default_max_length() -> usize {
    4096
}
fn default_lockout_seconds() -> i64 {
    900
}
fn default_max_failures() -> usize {
    5
}
fn default_failure_window_seconds() -> i64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_audit_log_path() -> String {
    "./data/audit.jsonl".to_string()
}
fn default_audit_rotate_max_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_shutdown_grace_seconds() -> u64 {
    10
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("telegram", &self.telegram)
            .field("tmux", &self.tmux)
            .field("paths", &self.paths)
            .field("whitelist_keys", &self.whitelist_keys)
            .field("command_policy", &self.command_policy)
            .field("auth", &self.auth)
            .field("logging", &self.logging)
            .field("server", &self.server)
            .finish()
    }
}

impl Config {
    /// Load configuration from `config.toml`, falling back to defaults with
    /// an empty bot token when absent, then apply environment overrides,
    /// then validate required fields.
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();
        let mut config: Config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", config_path.display()))?
        } else {
            toml::from_str(
                r#"
                [telegram]
                bot_token = ""
                "#,
            )
            .expect("inline default config is valid toml")
        };

        if let Ok(val) = std::env::var("TELEGRAM_BOT_TOKEN") {
            config.telegram.bot_token = val;
        }
        if let Ok(val) = std::env::var("TELEGRAM_USE_WEBHOOK") {
            config.telegram.use_webhook = val == "1" || val.eq_ignore_ascii_case("true");
        }
        if let Ok(val) = std::env::var("TELEGRAM_WEBHOOK_URL") {
            config.telegram.webhook_url = Some(val);
        }
        if let Ok(val) = std::env::var("STATE_PATH") {
            config.paths.state_path = val;
        }
        if let Ok(val) = std::env::var("TAG_REGISTRY_PATH") {
            config.paths.tag_registry_path = val;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            config.logging.level = val;
        }

        if config.telegram.bot_token.trim().is_empty() {
            anyhow::bail!(
                "telegram.bot_token is required (set in config.toml or TELEGRAM_BOT_TOKEN env var)"
            );
        }
        if config.telegram.use_webhook && config.telegram.webhook_url.is_none() {
            anyhow::bail!("telegram.webhook_url is required when telegram.use_webhook is true");
        }
        if config.whitelist_keys.is_empty() {
            anyhow::bail!("whitelist_keys must contain at least one entry");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_missing_file_fails_validation_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(dir.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn load_from_file_with_whitelist_and_token_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [telegram]
            bot_token = "abc123"

            [[whitelist_keys]]
            user_id = "42"
            access_key = "k"
            "#,
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.telegram.bot_token, "abc123");
        assert_eq!(config.tmux.width, 80);
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [telegram]
            bot_token = "from-file"

            [[whitelist_keys]]
            user_id = "42"
            access_key = "k"
            "#,
        )
        .unwrap();
        std::env::set_var("TELEGRAM_BOT_TOKEN", "from-env");
        let config = Config::load_from(&path).unwrap();
        std::env::remove_var("TELEGRAM_BOT_TOKEN");
        assert_eq!(config.telegram.bot_token, "from-env");
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [telegram]
            bot_token = "super-secret-token"

            [[whitelist_keys]]
            user_id = "42"
            access_key = "super-secret-key"
            "#,
        )
        .unwrap();
        let config = Config::load_from(&path).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-token"));
        assert!(!debug.contains("super-secret-key"));
    }
}
