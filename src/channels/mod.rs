//! Thin per-platform webhook translation layers. Each module turns a
//! platform's wire format into a `crate::router::ChatRequest` on the way in,
//! and posts plain text back out through the platform's send API. No
//! business logic lives here — that's the router's job.

pub mod signal;
pub mod slack;
pub mod teams;
pub mod telegram;
pub mod whatsapp;

use crate::config::ChannelCredentials;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel '{0}' is not configured")]
    NotConfigured(&'static str),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Deliver a plain-text reply out through the named channel.
pub async fn send(
    channel: &str,
    creds: &ChannelCredentials,
    http: &reqwest::Client,
    target: &str,
    text: &str,
    service_url: Option<&str>,
) -> Result<(), ChannelError> {
    match channel {
        "telegram" => telegram::send(creds, http, target, text).await,
        "teams" => teams::send(creds, http, target, text, service_url).await,
        "whatsapp" => whatsapp::send(creds, http, target, text).await,
        "slack" => slack::send(creds, http, target, text).await,
        "signal" => signal::send(creds, http, target, text).await,
        other => Err(ChannelError::Other(anyhow::anyhow!(
            "unknown channel: {other}"
        ))),
    }
}
