//! Telegram Bot API webhook adapter.
//!
//! `POST /telegram/webhook` receives a Telegram `Update`. When
//! `ORCHESTRA_TELEGRAM_WEBHOOK_SECRET` is set, Telegram is expected to echo
//! it back in `X-Telegram-Bot-Api-Secret-Token` on every request.

use teloxide::prelude::Requester;
use teloxide::types::{ChatId, Update, UpdateKind};
use teloxide::Bot;

use crate::config::ChannelCredentials;
use crate::router::ChatRequest;

use super::ChannelError;

/// Verify the webhook secret header, if one is configured.
pub fn verify_secret(creds: &ChannelCredentials, provided: Option<&str>) -> bool {
    match &creds.telegram_webhook_secret {
        Some(expected) => provided.map(|p| p == expected).unwrap_or(false),
        None => true,
    }
}

/// Translate an inbound Telegram `Update` into a `ChatRequest`, if it carries
/// a text message. Non-text updates (edits, callback queries, ...) are
/// ignored by returning `None`.
pub fn parse_update(update: &Update) -> Option<ChatRequest> {
    let UpdateKind::Message(message) = &update.kind else {
        return None;
    };
    let text = message.text()?.to_string();
    let sender_id = message.from.as_ref().map(|u| u.id.0.to_string())?;
    Some(ChatRequest {
        channel: "telegram".to_string(),
        sender_id,
        chat_id: message.chat.id.0.to_string(),
        text,
        service_url: None,
        request_id: Some(update.id.0.to_string()),
    })
}

pub async fn send(
    creds: &ChannelCredentials,
    _http: &reqwest::Client,
    target: &str,
    text: &str,
) -> Result<(), ChannelError> {
    let token = creds
        .telegram_bot_token
        .as_deref()
        .ok_or(ChannelError::NotConfigured("telegram"))?;
    let chat_id: i64 = target
        .parse()
        .map_err(|_| ChannelError::Other(anyhow::anyhow!("invalid telegram chat id: {target}")))?;
    let bot = Bot::new(token);
    bot.send_message(ChatId(chat_id), text)
        .await
        .map_err(|e| ChannelError::Other(anyhow::anyhow!("telegram send failed: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_secret_passes_when_unconfigured() {
        let creds = ChannelCredentials::default();
        assert!(verify_secret(&creds, None));
    }

    #[test]
    fn verify_secret_rejects_mismatch() {
        let mut creds = ChannelCredentials::default();
        creds.telegram_webhook_secret = Some("shh".to_string());
        assert!(!verify_secret(&creds, Some("nope")));
        assert!(verify_secret(&creds, Some("shh")));
    }
}
