//! WhatsApp Cloud API webhook adapter.
//!
//! `GET /whatsapp/webhook` handles Meta's subscription verification
//! challenge; `POST /whatsapp/webhook` receives inbound messages.

use serde::Deserialize;
use serde_json::json;

use crate::config::ChannelCredentials;
use crate::router::ChatRequest;

use super::ChannelError;

/// Answer Meta's `hub.challenge` verification handshake, or `None` if the
/// verify token doesn't match (the caller should respond 403 in that case).
pub fn verify_subscription(
    creds: &ChannelCredentials,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
) -> Option<String> {
    let expected = creds.whatsapp_verify_token.as_deref()?;
    if mode == Some("subscribe") && token == Some(expected) {
        challenge.map(|c| c.to_string())
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize, Default)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub from: String,
    pub id: String,
    pub text: Option<InboundText>,
}

#[derive(Debug, Deserialize)]
pub struct InboundText {
    pub body: String,
}

/// Flatten a webhook payload into zero or more chat requests — a single
/// webhook delivery may batch several inbound messages.
pub fn parse_payload(payload: &WebhookPayload) -> Vec<ChatRequest> {
    payload
        .entry
        .iter()
        .flat_map(|entry| entry.changes.iter())
        .flat_map(|change| change.value.messages.iter())
        .filter_map(|msg| {
            let text = msg.text.as_ref()?.body.clone();
            Some(ChatRequest {
                channel: "whatsapp".to_string(),
                sender_id: msg.from.clone(),
                chat_id: msg.from.clone(),
                text,
                service_url: None,
                request_id: Some(msg.id.clone()),
            })
        })
        .collect()
}

pub async fn send(
    creds: &ChannelCredentials,
    http: &reqwest::Client,
    target: &str,
    text: &str,
) -> Result<(), ChannelError> {
    let token = creds
        .whatsapp_access_token
        .as_deref()
        .ok_or(ChannelError::NotConfigured("whatsapp"))?;
    let phone_number_id = creds
        .whatsapp_phone_number_id
        .as_deref()
        .ok_or(ChannelError::NotConfigured("whatsapp"))?;

    let url = format!("https://graph.facebook.com/v18.0/{phone_number_id}/messages");
    http.post(url)
        .bearer_auth(token)
        .json(&json!({
            "messaging_product": "whatsapp",
            "to": target,
            "type": "text",
            "text": { "body": text },
        }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_subscription_echoes_challenge_on_match() {
        let mut creds = ChannelCredentials::default();
        creds.whatsapp_verify_token = Some("secret".to_string());
        assert_eq!(
            verify_subscription(&creds, Some("subscribe"), Some("secret"), Some("123")),
            Some("123".to_string())
        );
    }

    #[test]
    fn verify_subscription_rejects_mismatch() {
        let mut creds = ChannelCredentials::default();
        creds.whatsapp_verify_token = Some("secret".to_string());
        assert_eq!(
            verify_subscription(&creds, Some("subscribe"), Some("wrong"), Some("123")),
            None
        );
    }
}
