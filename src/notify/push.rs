// src/notify/push.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::store::Event;

pub const DEFAULT_FCM_BASE_URL: &str = "https://fcm.googleapis.com";
pub const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    /// Token is permanently unusable (unregistered / malformed).
    #[error("invalid push token: {0}")]
    InvalidToken(String),
    /// FCM refused our credentials (HTTP 401 / `UNAUTHENTICATED`), or none could be minted.
    #[error("push credentials rejected: {0}")]
    Unauthenticated(String),
    #[error("push delivery failed: {0}")]
    Delivery(String),
}

/// Deep-link metadata delivered alongside the visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub event_id: String,
    pub category: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub data: PushData,
}

impl PushPayload {
    /// `"{category}: {title}"` and `"{first sentence}.\nvia {source}"`.
    pub fn for_event(event: &Event) -> Self {
        let lead = if event.summary.trim().is_empty() {
            event.title.as_str()
        } else {
            event.summary.as_str()
        };
        Self {
            title: format!("{}: {}", event.category, event.title),
            body: format!("{}.\nvia {}", first_sentence(lead), event.source),
            data: PushData {
                event_id: event.id.to_string(),
                category: event.category.to_string(),
                timestamp: event.timestamp.to_rfc3339(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub payload: PushPayload,
}

/// Text up to the first sentence break (`.`, `!` or `?` followed by whitespace),
/// without trailing sentence punctuation.
pub fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let mut prev: Option<(usize, char)> = None;
    for (i, c) in text.char_indices() {
        if let Some((pi, pc)) = prev {
            if matches!(pc, '.' | '!' | '?') && c.is_whitespace() {
                return &text[..pi];
            }
        }
        prev = Some((i, c));
    }
    text.trim_end_matches(['.', '!', '?'])
}

/// Push delivery collaborator.
#[async_trait]
pub trait PushClient: Send + Sync {
    /// Returns the provider's message id.
    async fn send(&self, msg: &PushMessage) -> Result<String, PushError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Stand-in when no push credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledPush;

#[async_trait]
impl PushClient for DisabledPush {
    async fn send(&self, _msg: &PushMessage) -> Result<String, PushError> {
        Err(PushError::Delivery("push delivery is not configured".into()))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Supplies the OAuth bearer token for each FCM request.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, PushError>;
}

/// Fixed token, for emulators and short manual runs. Google tokens expire after about an hour.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<String, PushError> {
        Ok(self.0.clone())
    }
}

/// Tokens minted from a service-account key; gcp_auth caches them and refreshes before expiry.
pub struct ServiceAccountTokens {
    account: gcp_auth::CustomServiceAccount,
}

impl ServiceAccountTokens {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, gcp_auth::Error> {
        Ok(Self {
            account: gcp_auth::CustomServiceAccount::from_file(path)?,
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokens {
    async fn access_token(&self) -> Result<String, PushError> {
        use gcp_auth::TokenProvider;
        let token = self
            .account
            .token(&[FCM_SCOPE])
            .await
            .map_err(|e| PushError::Unauthenticated(format!("minting access token failed: {e}")))?;
        Ok(token.as_str().to_string())
    }
}

/// Firebase Cloud Messaging, HTTP v1 API.
#[derive(Clone)]
pub struct FcmPushClient {
    client: Client,
    base_url: String,
    project_id: String,
    tokens: Arc<dyn AccessTokenSource>,
    timeout: Duration,
}

impl FcmPushClient {
    pub fn new(project_id: String, tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_FCM_BASE_URL.to_string(),
            project_id,
            tokens,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.base_url, self.project_id
        )
    }

    /// Build the send request with a token fetched for this call.
    async fn authorized_request(&self, msg: &PushMessage) -> Result<reqwest::Request, PushError> {
        let token = self.tokens.access_token().await?;
        self.client
            .post(self.endpoint())
            .timeout(self.timeout)
            .bearer_auth(token)
            .json(&FcmRequest::from_message(msg))
            .build()
            .map_err(|e| PushError::Delivery(format!("FCM request build failed: {e}")))
    }
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a PushData,
    android: FcmAndroid,
    apns: FcmApns,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct FcmAndroid {
    priority: &'static str,
}

#[derive(Serialize)]
struct FcmApns {
    payload: serde_json::Value,
}

impl<'a> FcmRequest<'a> {
    fn from_message(msg: &'a PushMessage) -> Self {
        Self {
            message: FcmMessage {
                token: &msg.token,
                notification: FcmNotification {
                    title: &msg.payload.title,
                    body: &msg.payload.body,
                },
                data: &msg.payload.data,
                android: FcmAndroid { priority: "high" },
                apns: FcmApns {
                    payload: serde_json::json!({ "aps": { "sound": "default" } }),
                },
            },
        }
    }
}

#[derive(Deserialize)]
struct FcmSendResponse {
    name: String,
}

#[derive(Deserialize, Default)]
struct FcmErrorBody {
    #[serde(default)]
    error: FcmErrorInner,
}

#[derive(Deserialize, Default)]
struct FcmErrorInner {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Map an FCM error response onto a failure class.
fn classify_fcm_error(http_status: u16, body: &str) -> PushError {
    let parsed: FcmErrorBody = serde_json::from_str(body).unwrap_or_default();
    let err = parsed.error;
    if http_status == 401 || err.status == "UNAUTHENTICATED" {
        let detail = if err.message.is_empty() { body } else { err.message.as_str() };
        return PushError::Unauthenticated(format!("FCM HTTP {http_status}: {detail}"));
    }
    let unregistered = err
        .details
        .iter()
        .any(|d| d.error_code.as_deref() == Some("UNREGISTERED"));
    let bad_token = err.status == "INVALID_ARGUMENT"
        && err.message.to_ascii_lowercase().contains("registration token");

    if unregistered || bad_token {
        return PushError::InvalidToken(err.message);
    }
    let detail = if err.message.is_empty() {
        body.to_string()
    } else {
        err.message
    };
    PushError::Delivery(format!("FCM HTTP {http_status}: {detail}"))
}

#[async_trait]
impl PushClient for FcmPushClient {
    async fn send(&self, msg: &PushMessage) -> Result<String, PushError> {
        let req = self.authorized_request(msg).await?;
        let res = self
            .client
            .execute(req)
            .await
            .map_err(|e| PushError::Delivery(format!("FCM request failed: {e}")))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| PushError::Delivery(format!("FCM response read failed: {e}")))?;

        if !status.is_success() {
            return Err(classify_fcm_error(status.as_u16(), &body));
        }
        serde_json::from_str::<FcmSendResponse>(&body)
            .map(|r| r.name)
            .map_err(|e| PushError::Delivery(format!("unexpected FCM response: {e}")))
    }
}
