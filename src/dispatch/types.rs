use crate::destinations::DestinationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_INTER_SEND_DELAY_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    RateLimited { retry_after_secs: u64 },
    Failed { detail: String },
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Sent => "sent",
            DispatchStatus::RateLimited { .. } => "rate_limited",
            DispatchStatus::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub run_id: String,
    pub destination: String,
    #[serde(flatten)]
    pub status: DispatchStatus,
    /// Text that was (or would have been) sent to this destination.
    pub message_text: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl DispatchOutcome {
    pub fn new(run_id: &str, destination: &str, status: DispatchStatus, message_text: Option<String>) -> Self {
        Self {
            run_id: run_id.to_string(),
            destination: destination.to_string(),
            status,
            message_text,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DispatchStatus::Sent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub run_id: String,
    pub state: DispatchState,
    pub cancelled: bool,
    pub outcomes: Vec<DispatchOutcome>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DispatchReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            state: DispatchState::Idle,
            cancelled: false,
            outcomes: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.state = DispatchState::Running;
        self.started_at = Some(Utc::now());
    }

    pub(crate) fn finish(&mut self) {
        self.state = DispatchState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn sent_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_sent()).count()
    }

    pub fn rate_limited_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DispatchStatus::RateLimited { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, DispatchStatus::Failed { .. }))
            .count()
    }
}

impl Default for DispatchReport {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Pause after every successful send.
    pub inter_send_delay_secs: u64,
}

impl DispatchConfig {
    pub fn inter_send_delay(&self) -> Duration {
        Duration::from_secs(self.inter_send_delay_secs)
    }

    pub fn with_inter_send_delay(mut self, secs: u64) -> Self {
        self.inter_send_delay_secs = secs;
        self
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            inter_send_delay_secs: DEFAULT_INTER_SEND_DELAY_SECS,
        }
    }
}

/// Errors that stop a run before anything is sent.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Please login first: the session is not authenticated")]
    NotAuthenticated,

    #[error("Please enter a message: the message is empty")]
    EmptyMessage,

    #[error("No groups found. Please save groups first.")]
    NoDestinations,

    #[error("Another broadcast is already using this session")]
    SessionBusy,

    #[error(transparent)]
    Destinations(#[from] DestinationError),
}
