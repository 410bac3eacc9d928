//! Message value flowing through channels.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Header carrying the partition index assigned on the producer side.
pub const PARTITION_HEADER: &str = "partition";

/// A message with a JSON payload and a header map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID.
    pub id: Uuid,
    /// Message body.
    pub payload: Value,
    /// Headers, ordered by name.
    #[serde(default)]
    pub headers: BTreeMap<String, Value>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with no headers.
    pub fn new(payload: impl Into<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            headers: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Builder-style header setter.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Partition index stamped by a partitioned producer, if any.
    pub fn partition(&self) -> Option<u32> {
        self.header(PARTITION_HEADER)
            .and_then(Value::as_u64)
            .and_then(|p| u32::try_from(p).ok())
    }
}
