// ABOUTME: Chat transport adapters implementing termbot_core::traits::ChatTransport
// ABOUTME: One concrete long-poll Telegram adapter; the trait seam leaves room for a webhook one

pub mod telegram;

pub use telegram::TelegramTransport;
