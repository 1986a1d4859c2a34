use super::client::Session;
use super::types::*;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatInfo {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Debug)]
enum ApiFailure {
    RateLimited(u64),
    Unauthorized(String),
    Rejected { status: StatusCode, detail: String },
    Transport(String),
}

/// Session backed by a bot-API style HTTP endpoint:
/// `{base_url}/bot{token}/{method}` returning `{ok, result, description, ...}`.
pub struct BotApiSession {
    client: Client,
    base_url: String,
    token: String,
    profile_name: Option<String>,
    default_retry_after_secs: u64,
    identity: RwLock<Option<BotIdentity>>,
}

impl BotApiSession {
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            profile_name: None,
            default_retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            identity: RwLock::new(None),
        }
    }

    pub fn from_profile(profile: &SessionProfile) -> Self {
        let mut session = Self::new(&profile.api_base_url, &profile.token);
        session.profile_name = Some(profile.name.clone());
        session
    }

    pub fn with_default_retry_after(mut self, secs: u64) -> Self {
        self.default_retry_after_secs = secs;
        self
    }

    /// Check the credentials with `getMe`. Rejected credentials are not an
    /// error: they produce `ConnectStatus::Unauthorized`.
    pub async fn connect(&self) -> Result<ConnectStatus, SessionError> {
        let request = self.client.get(self.method_url("getMe"));

        match self.call::<BotIdentity>(request).await {
            Ok(identity) => {
                info!(account = %identity.display_name(), "Connected to messaging API");
                self.set_identity(Some(identity.clone()));
                Ok(ConnectStatus::Connected(identity))
            }
            Err(ApiFailure::Unauthorized(detail)) => {
                self.set_identity(None);
                Ok(ConnectStatus::Unauthorized(detail))
            }
            Err(ApiFailure::Rejected { status, detail }) if status == StatusCode::NOT_FOUND => {
                // an unknown token answers 404 rather than 401
                self.set_identity(None);
                Ok(ConnectStatus::Unauthorized(detail))
            }
            Err(ApiFailure::RateLimited(secs)) => Err(SessionError::RateLimited {
                retry_after_secs: secs,
            }),
            Err(ApiFailure::Rejected { detail, .. }) | Err(ApiFailure::Transport(detail)) => {
                Err(SessionError::Transport(detail))
            }
        }
    }

    pub fn disconnect(&self) {
        if self.is_authenticated() {
            info!(account = %self.account_id(), "Disconnected from messaging API");
        }
        self.set_identity(None);
    }

    pub fn identity(&self) -> Option<BotIdentity> {
        self.identity.read().ok().and_then(|guard| guard.clone())
    }

    fn set_identity(&self, identity: Option<BotIdentity>) {
        match self.identity.write() {
            Ok(mut guard) => *guard = identity,
            Err(poisoned) => *poisoned.into_inner() = identity,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiFailure> {
        let response = request
            .send()
            .await
            .map_err(|e| ApiFailure::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let header_retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = response
            .text()
            .await
            .map_err(|e| ApiFailure::Transport(e.without_url().to_string()))?;

        let parsed: Option<ApiResponse<T>> = serde_json::from_str(&body).ok();

        let error_code = parsed.as_ref().and_then(|r| r.error_code);
        if status == StatusCode::TOO_MANY_REQUESTS || error_code == Some(429) {
            let secs = parsed
                .as_ref()
                .and_then(|r| r.parameters.as_ref())
                .and_then(|p| p.retry_after)
                .or(header_retry_after)
                .unwrap_or(self.default_retry_after_secs);
            return Err(ApiFailure::RateLimited(secs));
        }

        let Some(parsed) = parsed else {
            return Err(ApiFailure::Rejected {
                status,
                detail: format!("Request failed with status: {}", status),
            });
        };

        let detail = parsed
            .description
            .unwrap_or_else(|| format!("Request failed with status: {}", status));

        if status == StatusCode::UNAUTHORIZED || error_code == Some(401) {
            return Err(ApiFailure::Unauthorized(detail));
        }

        match (parsed.ok, parsed.result) {
            (true, Some(result)) if status.is_success() => Ok(result),
            _ => Err(ApiFailure::Rejected { status, detail }),
        }
    }
}

/// Map a user-entered group reference onto a `chat_id` parameter.
///
/// `https://t.me/name` and bare `name` become `@name`; numeric ids and
/// `@name` pass through.
pub fn normalize_chat_id(name: &str) -> String {
    let trimmed = name.trim();

    let mut rest = trimmed;
    for prefix in ["https://", "http://"] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    for host in ["t.me/", "telegram.me/"] {
        if let Some(path) = rest.strip_prefix(host) {
            let path = path.trim_end_matches('/');
            if path.is_empty() || path.contains('/') || path.starts_with('+') {
                // invite links cannot be looked up by username
                return trimmed.to_string();
            }
            return format!("@{}", path);
        }
    }

    if trimmed.starts_with('@') || trimmed.parse::<i64>().is_ok() {
        trimmed.to_string()
    } else {
        format!("@{}", trimmed)
    }
}

#[async_trait]
impl Session for BotApiSession {
    fn account_id(&self) -> String {
        if let Some(identity) = self.identity() {
            return identity.id.to_string();
        }
        self.profile_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn is_authenticated(&self) -> bool {
        self.identity
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    async fn resolve(&self, name: &str) -> Result<ChatHandle, SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let chat_id = normalize_chat_id(name);
        debug!(group = %name, chat_id = %chat_id, "Resolving group");

        let request = self
            .client
            .get(self.method_url("getChat"))
            .query(&[("chat_id", chat_id.as_str())]);

        match self.call::<ChatInfo>(request).await {
            Ok(chat) => Ok(ChatHandle {
                id: chat.id.to_string(),
                name: name.to_string(),
                title: chat.title.or(chat.username),
            }),
            Err(ApiFailure::RateLimited(secs)) => Err(SessionError::RateLimited {
                retry_after_secs: secs,
            }),
            Err(ApiFailure::Unauthorized(detail)) => {
                warn!(detail = %detail, "Credentials rejected while resolving");
                self.set_identity(None);
                Err(SessionError::NotAuthenticated)
            }
            Err(ApiFailure::Rejected { detail, .. }) => Err(SessionError::Resolution(detail)),
            Err(ApiFailure::Transport(detail)) => Err(SessionError::Transport(detail)),
        }
    }

    async fn send(&self, handle: &ChatHandle, text: &str) -> Result<(), SessionError> {
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }

        let request = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest {
                chat_id: &handle.id,
                text,
            });

        match self.call::<serde_json::Value>(request).await {
            Ok(_) => Ok(()),
            Err(ApiFailure::RateLimited(secs)) => Err(SessionError::RateLimited {
                retry_after_secs: secs,
            }),
            Err(ApiFailure::Unauthorized(detail)) => {
                warn!(detail = %detail, "Credentials rejected while sending");
                self.set_identity(None);
                Err(SessionError::NotAuthenticated)
            }
            Err(ApiFailure::Rejected { detail, .. }) => Err(SessionError::Send(detail)),
            Err(ApiFailure::Transport(detail)) => Err(SessionError::Transport(detail)),
        }
    }
}

impl std::fmt::Debug for BotApiSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApiSession")
            .field("base_url", &self.base_url)
            .field("profile_name", &self.profile_name)
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}
