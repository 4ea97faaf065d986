//! Slack Events API webhook adapter.
//!
//! `POST /slack/events` is verified via HMAC-SHA256 over
//! `v0:{timestamp}:{body}` using the app's signing secret, compared in
//! constant time, with a 5-minute replay window.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::ChannelCredentials;
use crate::router::ChatRequest;

use super::ChannelError;

#[derive(Debug, thiserror::Error)]
pub enum SlackVerifyError {
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("request timestamp is too old (replay protection)")]
    StaleTimestamp,
    #[error("HMAC signature does not match")]
    InvalidSignature,
    #[error("signing secret unavailable")]
    Internal,
}

/// Verify `X-Slack-Signature`/`X-Slack-Request-Timestamp` against the body.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &[u8],
    provided_sig: &str,
) -> Result<(), SlackVerifyError> {
    let ts: i64 = timestamp.parse().map_err(|_| SlackVerifyError::InvalidTimestamp)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;
    if (now - ts).unsigned_abs() > 300 {
        return Err(SlackVerifyError::StaleTimestamp);
    }

    let mut mac = Hmac::<Sha256>::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| SlackVerifyError::Internal)?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    if expected.as_bytes().ct_eq(provided_sig.as_bytes()).unwrap_u8() != 1 {
        return Err(SlackVerifyError::InvalidSignature);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackPayload {
    UrlVerification { challenge: String },
    EventCallback { event: SlackEvent },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    Message {
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        user: Option<String>,
        channel: String,
        #[serde(default)]
        bot_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

pub fn parse_event(event: &SlackEvent) -> Option<ChatRequest> {
    let SlackEvent::Message { text, user, channel, bot_id } = event else {
        return None;
    };
    // Ignore our own bot's messages to avoid a reply loop.
    if bot_id.is_some() {
        return None;
    }
    Some(ChatRequest {
        channel: "slack".to_string(),
        sender_id: user.clone()?,
        chat_id: channel.clone(),
        text: text.clone()?,
        service_url: None,
        request_id: None,
    })
}

pub async fn send(
    creds: &ChannelCredentials,
    http: &reqwest::Client,
    target: &str,
    text: &str,
) -> Result<(), ChannelError> {
    let token = creds
        .slack_bot_token
        .as_deref()
        .ok_or(ChannelError::NotConfigured("slack"))?;
    let resp: serde_json::Value = http
        .post("https://slack.com/api/chat.postMessage")
        .bearer_auth(token)
        .json(&json!({ "channel": target, "text": text }))
        .send()
        .await?
        .json()
        .await?;
    if resp.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        let error = resp.get("error").and_then(|v| v.as_str()).unwrap_or("unknown");
        return Err(ChannelError::Other(anyhow::anyhow!("slack send failed: {error}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_signature_rejects_stale_timestamp() {
        let old_ts = "1000000000";
        let err = verify_signature("secret", old_ts, b"body", "v0=deadbeef").unwrap_err();
        assert!(matches!(err, SlackVerifyError::StaleTimestamp));
    }

    #[test]
    fn verify_signature_accepts_correctly_signed_body() {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            .to_string();
        let mut mac = Hmac::<Sha256>::new_from_slice(b"secret").unwrap();
        mac.update(b"v0:");
        mac.update(now.as_bytes());
        mac.update(b":");
        mac.update(b"body");
        let sig = format!("v0={}", hex::encode(mac.finalize().into_bytes()));
        assert!(verify_signature("secret", &now, b"body", &sig).is_ok());
    }
}
