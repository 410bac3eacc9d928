//! Partition key extraction.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::PartitionError;
use crate::message::Message;

/// Pluggable strategy computing a partition key from an outbound message.
pub trait PartitionKeyExtractor: Send + Sync {
    /// Returns `None` when the message carries no key.
    fn extract_key(&self, message: &Message) -> Option<Value>;
}

static PAYLOAD_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^payload((?:\.[A-Za-z0-9_\-]+)*)$").unwrap());
static HEADER_DOTTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^headers\.([A-Za-z_][A-Za-z0-9_\-]*)$").unwrap());
static HEADER_INDEXED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^headers\['([^']+)'\]$").unwrap());

/// Path expression evaluated against a message.
///
/// Supported forms:
/// - `id`
/// - `payload`, `payload.customer.id`, `payload.items.0`
/// - `headers.name`, `headers['name']`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyExpression {
    Id,
    Payload(Vec<String>),
    Header(String),
}

impl KeyExpression {
    pub fn parse(expression: &str) -> Result<Self, PartitionError> {
        let trimmed = expression.trim();

        if trimmed == "id" {
            return Ok(Self::Id);
        }
        if let Some(caps) = PAYLOAD_PATH.captures(trimmed) {
            let path = caps
                .get(1)
                .map(|m| m.as_str())
                .unwrap_or_default()
                .split('.')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Self::Payload(path));
        }
        if let Some(caps) = HEADER_DOTTED
            .captures(trimmed)
            .or_else(|| HEADER_INDEXED.captures(trimmed))
        {
            return Ok(Self::Header(caps[1].to_string()));
        }

        Err(PartitionError::InvalidKeyExpression {
            expression: expression.to_string(),
            reason: "expected id, payload[.path] or headers.<name>".into(),
        })
    }

    pub fn evaluate(&self, message: &Message) -> Option<Value> {
        match self {
            Self::Id => Some(Value::String(message.id.to_string())),
            Self::Header(name) => message.header(name).cloned(),
            Self::Payload(path) => {
                let mut current = &message.payload;
                for segment in path {
                    current = match current {
                        Value::Object(map) => map.get(segment)?,
                        Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                Some(current.clone())
            }
        }
    }
}

impl PartitionKeyExtractor for KeyExpression {
    fn extract_key(&self, message: &Message) -> Option<Value> {
        self.evaluate(message)
    }
}
