//! Log messages forwarded by clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a log message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    /// Sent by an instrumented process over its connection
    Client,
    /// Produced by the network layer
    Network,
    /// Produced by the server itself
    Internal,
}

/// One log entry. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    message: String,
    /// Free-form tag viewers may filter on
    filter: Option<String>,
    origin: MessageOrigin,
    received_at: DateTime<Utc>,
}

impl LogMessage {
    /// Creates a message. An empty filter is stored as no filter.
    pub fn new(message: impl Into<String>, filter: impl Into<String>, origin: MessageOrigin) -> Self {
        let filter = filter.into();
        Self {
            message: message.into(),
            filter: (!filter.is_empty()).then_some(filter),
            origin,
            received_at: Utc::now(),
        }
    }

    pub fn client(message: impl Into<String>, filter: impl Into<String>) -> Self {
        Self::new(message, filter, MessageOrigin::Client)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(message, String::new(), MessageOrigin::Internal)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    pub fn origin(&self) -> MessageOrigin {
        self.origin
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}
