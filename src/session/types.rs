use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider-side handle for a resolved group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatHandle {
    pub id: String,
    /// The name the handle was resolved from.
    pub name: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl BotIdentity {
    pub fn display_name(&self) -> String {
        match &self.username {
            Some(username) => format!("@{}", username),
            None => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectStatus {
    Connected(BotIdentity),
    /// The provider rejected the credentials; the session stays unauthenticated.
    Unauthorized(String),
}

/// Everything needed to re-create a session without asking the user again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionProfile {
    pub name: String,
    pub api_base_url: String,
    pub token: String,
    #[serde(default)]
    pub account_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl SessionProfile {
    pub fn new(name: impl Into<String>, api_base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base_url: api_base_url.into(),
            token: token.into(),
            account_id: None,
            created_at: Utc::now(),
            last_used: None,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("session is not authenticated")]
    NotAuthenticated,

    #[error("could not resolve group: {0}")]
    Resolution(String),

    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session profile error: {0}")]
    Profile(String),
}
