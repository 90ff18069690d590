// ABOUTME: Tagged-variant decoders for slash commands and callback-button data
// ABOUTME: Replaces the stringly-typed prefix dispatch the spec's redesign flags call out

use crate::model::Interval;

/// A slash command recognized by the Dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Start,
    Help,
    Login { server_ip: String, key: String },
    Tabs,
    Jobs,
    Claude,
    Interval,
    Refresh,
    Edit,
    Cancel,
    UpdateKey {
        user_id: String,
        new_key: String,
        expires_at: Option<i64>,
    },
    RevokeKey {
        user_id: String,
    },
    RotateToken {
        new_token: String,
    },
    /// A `/`-prefixed token not in the recognized surface.
    Unknown { name: String, args: Vec<String> },
}

impl SlashCommand {
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            SlashCommand::UpdateKey { .. }
                | SlashCommand::RevokeKey { .. }
                | SlashCommand::RotateToken { .. }
        )
    }
}

/// Split on whitespace, respecting nothing fancier than that — slash-command
/// arguments in this surface are never quoted.
fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Parse a raw inbound message body into a slash command, if it is one.
/// Returns `None` for anything not starting with `/`.
pub fn parse_slash_command(body: &str) -> Option<SlashCommand> {
    let trimmed = body.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let without_slash = &trimmed[1..];
    let mut parts = without_slash.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or("").to_lowercase();
    let raw_args = parts.next().unwrap_or("").trim();
    let args = split_args(raw_args);

    Some(match name.as_str() {
        "start" => SlashCommand::Start,
        "help" => SlashCommand::Help,
        "login" => match (args.first(), args.get(1)) {
            (Some(ip), Some(key)) => SlashCommand::Login {
                server_ip: ip.clone(),
                key: key.clone(),
            },
            _ => SlashCommand::Unknown {
                name,
                args,
            },
        },
        "tabs" => SlashCommand::Tabs,
        "jobs" => SlashCommand::Jobs,
        "claude" => SlashCommand::Claude,
        "interval" => SlashCommand::Interval,
        "refresh" => SlashCommand::Refresh,
        "edit" => SlashCommand::Edit,
        "cancel" => SlashCommand::Cancel,
        "update_key" => match (args.first(), args.get(1)) {
            (Some(user_id), Some(new_key)) => SlashCommand::UpdateKey {
                user_id: user_id.clone(),
                new_key: new_key.clone(),
                expires_at: args.get(2).and_then(|s| s.parse().ok()),
            },
            _ => SlashCommand::Unknown { name, args },
        },
        "revoke_key" => match args.first() {
            Some(user_id) => SlashCommand::RevokeKey {
                user_id: user_id.clone(),
            },
            None => SlashCommand::Unknown { name, args },
        },
        "rotate_token" => match args.first() {
            Some(new_token) => SlashCommand::RotateToken {
                new_token: new_token.clone(),
            },
            None => SlashCommand::Unknown { name, args },
        },
        _ => SlashCommand::Unknown { name, args },
    })
}

/// A decoded inline-keyboard callback action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    TabList,
    TabNew,
    TabSelect(String),
    TabRename(String),
    TabClose(String),
    IntervalList,
    IntervalSet(Interval),
    RefreshNow,
    EditList,
    EditOpen(String),
    EditSave(String),
    JobsList,
    JobsCtrlZ,
    JobsBg(String),
    ModeClaude,
    ModeShell,
    /// Malformed or unrecognized callback data; the caller responds
    /// "bad action" and logs the raw payload.
    Invalid,
}

/// Parse `prefix:token[:arg]` callback data into a tagged action.
pub fn parse_callback_data(data: &str) -> CallbackAction {
    let mut parts = data.splitn(3, ':');
    let prefix = parts.next().unwrap_or("");
    let token = parts.next().unwrap_or("");
    let arg = parts.next();

    match (prefix, token, arg) {
        ("tab", "list", None) => CallbackAction::TabList,
        ("tab", "new", None) => CallbackAction::TabNew,
        ("tab", "select", Some(id)) => CallbackAction::TabSelect(id.to_string()),
        ("tab", "rename", Some(id)) => CallbackAction::TabRename(id.to_string()),
        ("tab", "close", Some(id)) => CallbackAction::TabClose(id.to_string()),
        ("interval", "list", None) => CallbackAction::IntervalList,
        ("interval", "set", Some(value)) => match Interval::parse(value) {
            Some(interval) => CallbackAction::IntervalSet(interval),
            None => CallbackAction::Invalid,
        },
        ("refresh", "now", None) => CallbackAction::RefreshNow,
        ("edit", "list", None) => CallbackAction::EditList,
        ("edit", "open", Some(path)) => CallbackAction::EditOpen(path.to_string()),
        ("edit", "save", Some(edit_id)) => CallbackAction::EditSave(edit_id.to_string()),
        ("jobs", "list", None) => CallbackAction::JobsList,
        ("jobs", "ctrlz", None) => CallbackAction::JobsCtrlZ,
        ("jobs", "bg", Some(job_id)) => CallbackAction::JobsBg(job_id.to_string()),
        ("mode", "claude", None) => CallbackAction::ModeClaude,
        ("mode", "shell", None) => CallbackAction::ModeShell,
        _ => CallbackAction::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_login_with_two_args() {
        let cmd = parse_slash_command("/login 1.2.3.4 secretkey").unwrap();
        assert_eq!(
            cmd,
            SlashCommand::Login {
                server_ip: "1.2.3.4".to_string(),
                key: "secretkey".to_string(),
            }
        );
    }

    #[test]
    fn login_with_missing_args_is_unknown() {
        let cmd = parse_slash_command("/login 1.2.3.4").unwrap();
        assert!(matches!(cmd, SlashCommand::Unknown { .. }));
    }

    #[test]
    fn non_slash_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello world"), None);
    }

    #[test]
    fn admin_commands_are_flagged() {
        assert!(SlashCommand::RevokeKey {
            user_id: "1".to_string()
        }
        .is_admin_only());
        assert!(!SlashCommand::Tabs.is_admin_only());
    }

    #[test]
    fn callback_tab_select_decodes_argument() {
        assert_eq!(
            parse_callback_data("tab:select:abc123"),
            CallbackAction::TabSelect("abc123".to_string())
        );
    }

    #[test]
    fn callback_interval_set_rejects_unknown_value() {
        assert_eq!(
            parse_callback_data("interval:set:3d"),
            CallbackAction::Invalid
        );
    }

    #[test]
    fn callback_unknown_prefix_is_invalid_not_a_panic() {
        assert_eq!(parse_callback_data("bogus:whatever"), CallbackAction::Invalid);
        assert_eq!(parse_callback_data(""), CallbackAction::Invalid);
    }

    #[test]
    fn callback_refresh_now() {
        assert_eq!(parse_callback_data("refresh:now"), CallbackAction::RefreshNow);
    }
}
