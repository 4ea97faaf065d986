//! Microsoft Teams Bot Framework webhook adapter.
//!
//! `POST /teams/api/messages` receives a Bot Framework `Activity`. Full JWKS
//! validation of the bearer token is out of scope here; we check that an
//! `Authorization: Bearer <token>` header is present whenever app
//! credentials are configured, which stops unauthenticated traffic from a
//! network that can't present any token at all.

use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;

use crate::config::ChannelCredentials;
use crate::router::ChatRequest;

use super::ChannelError;

#[derive(Debug, Deserialize)]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    pub text: Option<String>,
    pub from: ActivityAccount,
    pub conversation: ActivityConversation,
    #[serde(rename = "serviceUrl")]
    pub service_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityAccount {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivityConversation {
    pub id: String,
}

/// Whether the request may proceed given its `Authorization` header.
/// When no Teams app id/password is configured, any request is accepted —
/// the operator has not opted into signature enforcement yet.
pub fn verify_authorization(creds: &ChannelCredentials, authorization: Option<&str>) -> bool {
    if creds.teams_app_id.is_none() {
        return true;
    }
    authorization
        .map(|h| h.starts_with("Bearer ") && h.len() > "Bearer ".len())
        .unwrap_or(false)
}

pub fn parse_activity(activity: &Activity) -> Option<ChatRequest> {
    if activity.activity_type != "message" {
        return None;
    }
    Some(ChatRequest {
        channel: "teams".to_string(),
        sender_id: activity.from.id.clone(),
        chat_id: activity.conversation.id.clone(),
        text: activity.text.clone()?,
        service_url: activity.service_url.clone(),
        request_id: None,
    })
}

/// Caches the bearer token obtained from the Microsoft login endpoint until
/// just before it expires.
pub struct TeamsTokenCache {
    cached: RwLock<Option<(String, chrono::DateTime<chrono::Utc>)>>,
}

impl Default for TeamsTokenCache {
    fn default() -> Self {
        Self {
            cached: RwLock::new(None),
        }
    }
}

impl TeamsTokenCache {
    async fn get_token(
        &self,
        http: &reqwest::Client,
        app_id: &str,
        app_password: &str,
    ) -> Result<String, ChannelError> {
        if let Some((token, expires_at)) = self.cached.read().await.clone() {
            if expires_at > chrono::Utc::now() {
                return Ok(token);
            }
        }
        let resp: serde_json::Value = http
            .post("https://login.microsoftonline.com/botframework.com/oauth2/v2.0/token")
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", app_id),
                ("client_secret", app_password),
                ("scope", "https://api.botframework.com/.default"),
            ])
            .send()
            .await?
            .json()
            .await?;
        let token = resp
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ChannelError::Other(anyhow::anyhow!("teams token response missing access_token")))?
            .to_string();
        let expires_in = resp.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(3600);
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expires_in - 60);
        *self.cached.write().await = Some((token.clone(), expires_at));
        Ok(token)
    }
}

static TOKEN_CACHE: std::sync::OnceLock<TeamsTokenCache> = std::sync::OnceLock::new();

pub async fn send(
    creds: &ChannelCredentials,
    http: &reqwest::Client,
    conversation_id: &str,
    text: &str,
    service_url: Option<&str>,
) -> Result<(), ChannelError> {
    let app_id = creds
        .teams_app_id
        .as_deref()
        .ok_or(ChannelError::NotConfigured("teams"))?;
    let app_password = creds
        .teams_app_password
        .as_deref()
        .ok_or(ChannelError::NotConfigured("teams"))?;
    let service_url = service_url
        .ok_or_else(|| ChannelError::Other(anyhow::anyhow!("teams reply requires a service_url")))?;

    let cache = TOKEN_CACHE.get_or_init(TeamsTokenCache::default);
    let token = cache.get_token(http, app_id, app_password).await?;

    let url = format!(
        "{}/v3/conversations/{}/activities",
        service_url.trim_end_matches('/'),
        conversation_id
    );
    http.post(url)
        .bearer_auth(token)
        .json(&json!({ "type": "message", "text": text }))
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_authorization_open_when_unconfigured() {
        let creds = ChannelCredentials::default();
        assert!(verify_authorization(&creds, None));
    }

    #[test]
    fn verify_authorization_requires_bearer_when_configured() {
        let mut creds = ChannelCredentials::default();
        creds.teams_app_id = Some("app".to_string());
        assert!(!verify_authorization(&creds, None));
        assert!(verify_authorization(&creds, Some("Bearer abc")));
    }
}
