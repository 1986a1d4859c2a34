use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A target group identifier: `@name`, a `t.me` link, or a numeric chat id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, DestinationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DestinationError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Destination {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum DestinationError {
    #[error("group name must not be empty")]
    Empty,

    #[error("groups file {path} has no `group_name` column")]
    MissingColumn { path: String },

    #[error("failed to access groups file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
