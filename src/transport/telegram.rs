// ABOUTME: Long-poll Telegram adapter; the only concrete ChatTransport in this repo
// ABOUTME: Long-polls getUpdates with an offset cursor, decodes into the transport-agnostic Update type

use anyhow::Context;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, Message, UpdateKind,
};
use termbot_core::traits::{ChatTransport, Outbound, Update};
use tokio::sync::{mpsc, Mutex};

pub struct TelegramTransport {
    bot: Bot,
    rx: Mutex<mpsc::Receiver<Update>>,
}

impl TelegramTransport {
    pub async fn new(bot_token: &str, poll_timeout_secs: u32) -> anyhow::Result<Self> {
        let bot = Bot::new(bot_token);
        bot.get_me().await.context("failed to authenticate with telegram (getMe)")?;

        let (tx, rx) = mpsc::channel(256);
        let poll_bot = bot.clone();
        tokio::spawn(async move {
            let mut offset: i32 = 0;
            loop {
                let updates = match poll_bot.get_updates().offset(offset).timeout(poll_timeout_secs).await {
                    Ok(updates) => updates,
                    Err(e) => {
                        tracing::warn!(error = %e, "telegram long-poll error, retrying in 5s");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                for raw in &updates {
                    offset = raw.id.as_offset();
                    if let Some(update) = decode_update(&raw.kind) {
                        if tx.send(update).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Self {
            bot,
            rx: Mutex::new(rx),
        })
    }
}

fn decode_update(kind: &UpdateKind) -> Option<Update> {
    match kind {
        UpdateKind::Message(msg) => decode_message(msg),
        UpdateKind::CallbackQuery(query) => decode_callback(query),
        _ => None,
    }
}

fn decode_message(msg: &Message) -> Option<Update> {
    let from = msg.from.as_ref()?;
    Some(Update {
        user_id: from.id.0.to_string(),
        chat_id: msg.chat.id.0.to_string(),
        text: msg.text().map(str::to_string),
        callback_data: None,
        message_id: Some(msg.id.0.to_string()),
    })
}

fn decode_callback(query: &CallbackQuery) -> Option<Update> {
    let chat_id = query.message.as_ref().map(|m| m.chat().id.0.to_string())?;
    Some(Update {
        user_id: query.from.id.0.to_string(),
        chat_id,
        text: None,
        callback_data: query.data.clone(),
        message_id: query.message.as_ref().map(|m| m.id().0.to_string()),
    })
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn next_update(&self) -> anyhow::Result<Update> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("telegram update stream closed"))
    }

    async fn send(&self, outbound: Outbound) -> anyhow::Result<()> {
        let chat_id: i64 = outbound
            .chat_id
            .parse()
            .context("outbound chat_id is not a valid telegram chat id")?;

        let mut request = self.bot.send_message(ChatId(chat_id), &outbound.text);
        if !outbound.buttons.is_empty() {
            let rows: Vec<Vec<InlineKeyboardButton>> = outbound
                .buttons
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.callback_data.clone()))
                        .collect()
                })
                .collect();
            request = request.reply_markup(InlineKeyboardMarkup::new(rows));
        }

        request.await.context("telegram sendMessage failed")?;
        Ok(())
    }
}
