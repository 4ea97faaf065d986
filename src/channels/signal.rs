//! Signal adapter, backed by a local `signal-cli-rest-api` instance.
//!
//! Signal has no inbound webhook of its own, so unlike the other channels
//! this one is driven by a poll loop (`run_poll_loop`) against
//! `GET /v1/receive/{number}` rather than an HTTP route in `api::mod`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use crate::config::ChannelCredentials;
use crate::router::ChatRequest;

use super::ChannelError;

#[derive(Debug, Deserialize)]
struct ReceiveEnvelope {
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    source: Option<String>,
    #[serde(rename = "dataMessage")]
    data_message: Option<DataMessage>,
}

#[derive(Debug, Deserialize)]
struct DataMessage {
    message: Option<String>,
}

fn parse_envelope(entry: &ReceiveEnvelope) -> Option<ChatRequest> {
    let sender = entry.envelope.source.clone()?;
    let text = entry.envelope.data_message.as_ref()?.message.clone()?;
    Some(ChatRequest {
        channel: "signal".to_string(),
        sender_id: sender.clone(),
        chat_id: sender,
        text,
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
    let base_url = creds
        .signal_cli_url
        .as_deref()
        .ok_or(ChannelError::NotConfigured("signal"))?;
    http.post(format!("{}/v2/send", base_url.trim_end_matches('/')))
        .json(&json!({
            "message": text,
            "recipients": [target],
        }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

/// Poll `/v1/receive/{number}` once per `interval`, forwarding each inbound
/// message to `on_message`. Runs until `stop` reports `true`.
pub async fn run_poll_loop(
    base_url: String,
    number: String,
    http: reqwest::Client,
    interval: Duration,
    on_message: impl Fn(ChatRequest) + Send + Sync + 'static,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(error) = poll_once(&base_url, &number, &http, &on_message).await {
                    tracing::warn!(%error, "signal poll failed");
                }
            }
        }
    }
}

async fn poll_once(
    base_url: &str,
    number: &str,
    http: &reqwest::Client,
    on_message: &(impl Fn(ChatRequest) + Send + Sync),
) -> Result<(), ChannelError> {
    let url = format!("{}/v1/receive/{number}", base_url.trim_end_matches('/'));
    let entries: Vec<ReceiveEnvelope> = http.get(url).send().await?.json().await?;
    for entry in &entries {
        if let Some(req) = parse_envelope(entry) {
            on_message(req);
        }
    }
    Ok(())
}
