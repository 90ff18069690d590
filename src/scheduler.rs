// ABOUTME: Per-(user_id, active_tab_id) capture loop; manual refresh; prompt-driven incremental flushes
// ABOUTME: Scheduler ticks try the per-user lock and skip rather than queue behind a slow command

use crate::locks::PerUserLocks;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use termbot_core::chunk::{chunk_message, DEFAULT_MAX_CHARS};
use termbot_core::diff::incremental_tail;
use termbot_core::model::{Interval, Mode};
use termbot_core::prompt_rules::{PromptRuleEngine, UserOverride};
use termbot_core::traits::{ChatTransport, Outbound, TerminalDriver};
use termbot_core::user_state::UserStateStore;
use tokio::task::JoinHandle;

pub struct OutputScheduler {
    driver: Arc<dyn TerminalDriver>,
    transport: Arc<dyn ChatTransport>,
    user_states: Arc<UserStateStore>,
    rule_engine: Arc<PromptRuleEngine>,
    locks: Arc<PerUserLocks>,
    scrollback_lines: usize,
    last_text: Mutex<HashMap<String, String>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl OutputScheduler {
    pub fn new(
        driver: Arc<dyn TerminalDriver>,
        transport: Arc<dyn ChatTransport>,
        user_states: Arc<UserStateStore>,
        rule_engine: Arc<PromptRuleEngine>,
        locks: Arc<PerUserLocks>,
        scrollback_lines: usize,
    ) -> Self {
        Self {
            driver,
            transport,
            user_states,
            rule_engine,
            locks,
            scrollback_lines,
            last_text: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// (Re)start the ticking timer for `user_id`. Call whenever the user's
    /// interval changes or their active tab switches, so the timer phase
    /// resets instead of firing on a stale schedule.
    pub fn restart_for_user(self: &Arc<Self>, user_id: &str) {
        self.stop_for_user(user_id);
        let interval = self.user_states.get(user_id).interval;
        let Some(period) = interval.as_duration() else {
            return;
        };

        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                this.tick(&user_id).await;
            }
        });
        self.tasks.lock().unwrap().insert(user_id, handle);
    }

    pub fn stop_for_user(&self, user_id: &str) {
        if let Some(handle) = self.tasks.lock().unwrap().remove(user_id) {
            handle.abort();
        }
    }

    async fn tick(&self, user_id: &str) {
        let Some(_guard) = self.locks.try_lock(user_id) else {
            tracing::debug!(user_id, "scheduler skipped tick: user busy");
            return;
        };

        let state = self.user_states.get(user_id);
        let Some(tab_id) = state.active_tab_id.clone() else {
            return;
        };

        let capture = match self.driver.capture(&tab_id, self.scrollback_lines).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(user_id, tab_id, error = %e, "scheduler capture failed");
                return;
            }
        };

        match state.mode {
            Mode::Normal => self.emit_normal_if_changed(user_id, &tab_id, &capture).await,
            Mode::Claude => self.emit_claude_incremental(user_id, &tab_id, &capture).await,
        }
    }

    async fn emit_normal_if_changed(&self, user_id: &str, tab_id: &str, capture: &str) {
        let changed = {
            let mut last = self.last_text.lock().unwrap();
            let prior = last.get(tab_id).cloned().unwrap_or_default();
            if prior == capture {
                false
            } else {
                last.insert(tab_id.to_string(), capture.to_string());
                true
            }
        };
        if changed {
            self.send_chunks(user_id, capture).await;
        }
    }

    async fn emit_claude_incremental(&self, user_id: &str, tab_id: &str, capture: &str) {
        let Some(signal) = self.rule_engine.evaluate(capture, UserOverride::default()) else {
            return;
        };

        let tail = {
            let mut last = self.last_text.lock().unwrap();
            let prior = last.get(tab_id).cloned().unwrap_or_default();
            let tail = incremental_tail(&prior, capture, None);
            last.insert(tab_id.to_string(), capture.to_string());
            tail
        };

        if tail.is_empty() && signal.buttons.is_empty() {
            return;
        }

        let buttons = signal
            .buttons
            .iter()
            .map(|b| {
                vec![termbot_core::traits::InlineButton {
                    label: b.label.clone(),
                    callback_data: format!("prompt:{}", b.action),
                }]
            })
            .collect();

        self.send(user_id, &tail, buttons).await;
    }

    /// Perform one immediate capture and emit unconditionally, ignoring the
    /// normal-mode change check / claude-mode rule match.
    pub async fn refresh_now(&self, user_id: &str) -> anyhow::Result<()> {
        let state = self.user_states.get(user_id);
        let Some(tab_id) = state.active_tab_id.clone() else {
            return Ok(());
        };
        let capture = self.driver.capture(&tab_id, self.scrollback_lines).await?;

        match state.mode {
            Mode::Normal => {
                self.last_text
                    .lock()
                    .unwrap()
                    .insert(tab_id.clone(), capture.clone());
                self.send_chunks(user_id, &capture).await;
            }
            Mode::Claude => {
                let tail = {
                    let mut last = self.last_text.lock().unwrap();
                    let prior = last.get(&tab_id).cloned().unwrap_or_default();
                    let tail = incremental_tail(&prior, &capture, None);
                    last.insert(tab_id, capture);
                    tail
                };
                self.send(user_id, &tail, vec![]).await;
            }
        }
        Ok(())
    }

    async fn send_chunks(&self, user_id: &str, text: &str) {
        for chunk in chunk_message(text, DEFAULT_MAX_CHARS) {
            self.send(user_id, &chunk, vec![]).await;
        }
    }

    async fn send(
        &self,
        user_id: &str,
        text: &str,
        buttons: Vec<Vec<termbot_core::traits::InlineButton>>,
    ) {
        let outbound = Outbound {
            chat_id: user_id.to_string(),
            text: text.to_string(),
            buttons,
            parse_mode: None,
        };
        if let Err(e) = self.transport.send(outbound).await {
            tracing::warn!(user_id, error = %e, "scheduler failed to send output");
        }
    }
}

/// Convenience for constructing the default interval if none is configured.
pub fn default_interval() -> Interval {
    Interval::FiveMinutes
}
