//! Configuration types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::properties::{BindingProperties, ConsumerProperties, ProducerProperties};

/// What `resolve` does with a channel whose producer bind failed earlier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebindPolicy {
    /// Hand out the unbound channel again and log a warning.
    #[default]
    ReturnUnbound,
    /// Attempt the bind again under the creation lock.
    Retry,
}

impl FromStr for RebindPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "return-unbound" | "return_unbound" | "none" => Ok(Self::ReturnUnbound),
            "retry" => Ok(Self::Retry),
            other => Err(ConfigError::InvalidValue {
                key: "STREAM_REBIND_POLICY".into(),
                message: format!("unknown policy {other:?}, expected return-unbound or retry"),
            }),
        }
    }
}

impl fmt::Display for RebindPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReturnUnbound => write!(f, "return-unbound"),
            Self::Retry => write!(f, "retry"),
        }
    }
}

/// Resolver and binding configuration.
#[derive(Debug, Clone, Default)]
pub struct StreamConfig {
    /// Binder used for unprefixed channel names when several are configured.
    pub default_binder: Option<String>,
    /// Handling of channels whose bind failed.
    pub rebind_policy: RebindPolicy,
    /// Producer properties applied to every channel before per-binding overrides.
    pub producer_defaults: ProducerProperties,
    /// Consumer properties for channels without a consumer section.
    pub consumer_defaults: ConsumerProperties,
    /// Per-channel binding properties, keyed by logical channel name.
    pub bindings: HashMap<String, BindingProperties>,
}

impl StreamConfig {
    /// Load from `STREAM_*` environment variables.
    ///
    /// - `STREAM_DEFAULT_BINDER`: binder name
    /// - `STREAM_REBIND_POLICY`: `return-unbound` (default) or `retry`
    /// - `STREAM_PRODUCER_DEFAULTS`, `STREAM_CONSUMER_DEFAULTS`: JSON objects
    /// - `STREAM_BINDINGS`: JSON object of channel name to binding properties
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup using the same keys as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let default_binder = lookup("STREAM_DEFAULT_BINDER")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let rebind_policy = match lookup("STREAM_REBIND_POLICY") {
            Some(raw) => raw.parse()?,
            None => RebindPolicy::default(),
        };

        let producer_defaults: ProducerProperties =
            parse_json(&lookup, "STREAM_PRODUCER_DEFAULTS")?.unwrap_or_default();
        producer_defaults
            .validate()
            .map_err(|e| ConfigError::InvalidValue {
                key: "STREAM_PRODUCER_DEFAULTS".into(),
                message: e.to_string(),
            })?;

        Ok(Self {
            default_binder,
            rebind_policy,
            producer_defaults,
            consumer_defaults: parse_json(&lookup, "STREAM_CONSUMER_DEFAULTS")?
                .unwrap_or_default(),
            bindings: parse_json(&lookup, "STREAM_BINDINGS")?.unwrap_or_default(),
        })
    }

    pub fn binding(&self, channel: &str) -> Option<&BindingProperties> {
        self.bindings.get(channel)
    }

    /// Producer defaults overlaid with the channel's own producer section.
    pub fn producer_properties(&self, channel: &str) -> ProducerProperties {
        match self.binding(channel).and_then(|b| b.producer.as_ref()) {
            Some(overrides) => self.producer_defaults.merged_with(overrides),
            None => self.producer_defaults.clone(),
        }
    }

    pub fn consumer_properties(&self, channel: &str) -> ConsumerProperties {
        self.binding(channel)
            .and_then(|b| b.consumer.clone())
            .unwrap_or_else(|| self.consumer_defaults.clone())
    }
}

fn parse_json<T: DeserializeOwned>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key).filter(|raw| !raw.trim().is_empty()) {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ConfigError::ParseError(format!("{key}: {e}"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = StreamConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.default_binder.is_none());
        assert_eq!(config.rebind_policy, RebindPolicy::ReturnUnbound);
        assert!(config.bindings.is_empty());
        assert_eq!(config.producer_properties("any"), ProducerProperties::default());
    }

    #[test]
    fn reads_default_binder_and_policy() {
        let config = StreamConfig::from_lookup(lookup(&[
            ("STREAM_DEFAULT_BINDER", " redis "),
            ("STREAM_REBIND_POLICY", "retry"),
        ]))
        .unwrap();
        assert_eq!(config.default_binder.as_deref(), Some("redis"));
        assert_eq!(config.rebind_policy, RebindPolicy::Retry);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = StreamConfig::from_lookup(lookup(&[("STREAM_REBIND_POLICY", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn bindings_merge_over_producer_defaults() {
        let config = StreamConfig::from_lookup(lookup(&[
            (
                "STREAM_PRODUCER_DEFAULTS",
                r#"{"partition-selector": "by-region"}"#,
            ),
            (
                "STREAM_BINDINGS",
                r#"{"orders": {"destination": "orders-v2",
                               "producer": {"partition-key-expression": "payload.id",
                                            "partition-count": 3},
                               "consumer": {"partitioned": true, "instance-count": 3,
                                            "partition-count": 3}}}"#,
            ),
        ]))
        .unwrap();

        let producer = config.producer_properties("orders");
        assert_eq!(producer.partition_count, 3);
        assert_eq!(producer.partition_key_expression.as_deref(), Some("payload.id"));
        assert_eq!(producer.partition_selector.as_deref(), Some("by-region"));

        let consumer = config.consumer_properties("orders");
        assert!(consumer.partitioned);
        assert_eq!(consumer.instance_count, 3);

        assert_eq!(
            config.binding("orders").unwrap().destination.as_deref(),
            Some("orders-v2")
        );
        assert_eq!(config.consumer_properties("other"), ConsumerProperties::default());
    }

    #[test]
    fn binding_extractor_replaces_default_expression() {
        let config = StreamConfig::from_lookup(lookup(&[
            (
                "STREAM_PRODUCER_DEFAULTS",
                r#"{"partition-key-expression": "payload.id", "partition-count": 4}"#,
            ),
            (
                "STREAM_BINDINGS",
                r#"{"audit": {"producer": {"partition-key-extractor": "tenant"}},
                    "log": {"producer": {"partition-count": 1}}}"#,
            ),
        ]))
        .unwrap();

        let audit = config.producer_properties("audit");
        assert_eq!(audit.partition_key_expression, None);
        assert_eq!(audit.partition_key_extractor.as_deref(), Some("tenant"));
        assert_eq!(audit.partition_count, 4);
        assert!(audit.validate().is_ok());

        assert_eq!(config.producer_properties("log").partition_count, 1);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = StreamConfig::from_lookup(lookup(&[("STREAM_BINDINGS", "{not json")])).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(msg) if msg.starts_with("STREAM_BINDINGS")));
    }

    #[test]
    fn invalid_producer_defaults_fail_eagerly() {
        let err = StreamConfig::from_lookup(lookup(&[(
            "STREAM_PRODUCER_DEFAULTS",
            r#"{"partition-count": 0}"#,
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == "STREAM_PRODUCER_DEFAULTS"));
    }
}
