//! Per-binding properties.
//!
//! Values are supplied by the hosting application (see [`crate::config`]);
//! the resolver and binders only consume the resolved structures.

use serde::{Deserialize, Serialize};

use crate::error::PartitionError;

/// Producer-side binding properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProducerProperties {
    /// Path expression evaluated against each message to get its partition key.
    pub partition_key_expression: Option<String>,
    /// Name of a registered partition key extractor.
    pub partition_key_extractor: Option<String>,
    /// Name of a registered partition selector.
    pub partition_selector: Option<String>,
    /// Number of partitions of the destination.
    pub partition_count: i32,
}

impl Default for ProducerProperties {
    fn default() -> Self {
        Self {
            partition_key_expression: None,
            partition_key_extractor: None,
            partition_selector: None,
            partition_count: 1,
        }
    }
}

impl ProducerProperties {
    /// A binding is partitioned as soon as a key strategy is configured.
    pub fn is_partitioned(&self) -> bool {
        self.partition_key_expression.is_some() || self.partition_key_extractor.is_some()
    }

    /// Check the partition configuration. Called at binding time.
    pub fn validate(&self) -> Result<(), PartitionError> {
        if self.partition_count <= 0 {
            return Err(PartitionError::NonPositivePartitionCount(
                self.partition_count,
            ));
        }
        if self.partition_key_expression.is_some() && self.partition_key_extractor.is_some() {
            return Err(PartitionError::ConflictingKeyStrategies);
        }
        if self.partition_count > 1 && !self.is_partitioned() {
            return Err(PartitionError::MissingKeyStrategy(self.partition_count));
        }
        Ok(())
    }

    /// Overlay per-binding overrides on top of these properties.
    ///
    /// The key strategy is replaced as a unit: an override setting either the
    /// expression or the extractor clears both inherited fields.
    pub fn merged_with(&self, overrides: &ProducerOverrides) -> ProducerProperties {
        let (partition_key_expression, partition_key_extractor) =
            if overrides.partition_key_expression.is_some()
                || overrides.partition_key_extractor.is_some()
            {
                (
                    overrides.partition_key_expression.clone(),
                    overrides.partition_key_extractor.clone(),
                )
            } else {
                (
                    self.partition_key_expression.clone(),
                    self.partition_key_extractor.clone(),
                )
            };

        ProducerProperties {
            partition_key_expression,
            partition_key_extractor,
            partition_selector: overrides
                .partition_selector
                .clone()
                .or_else(|| self.partition_selector.clone()),
            partition_count: overrides.partition_count.unwrap_or(self.partition_count),
        }
    }
}

/// Producer settings for one binding. Unset fields inherit the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProducerOverrides {
    pub partition_key_expression: Option<String>,
    pub partition_key_extractor: Option<String>,
    pub partition_selector: Option<String>,
    pub partition_count: Option<i32>,
}

/// Consumer-side binding properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConsumerProperties {
    /// Whether this consumer reads a subset of partitions.
    pub partitioned: bool,
    /// Index of this instance, `0..instance_count`.
    pub instance_index: i32,
    /// Number of deployed consumer instances.
    pub instance_count: i32,
    /// Number of partitions of the destination.
    pub partition_count: i32,
}

impl Default for ConsumerProperties {
    fn default() -> Self {
        Self {
            partitioned: false,
            instance_index: 0,
            instance_count: 1,
            partition_count: 1,
        }
    }
}

/// Everything configurable for one logical channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BindingProperties {
    /// Physical destination; defaults to the channel name.
    pub destination: Option<String>,
    /// Binder to use when the channel name has no selector prefix.
    pub binder: Option<String>,
    /// Consumer group.
    pub group: Option<String>,
    pub producer: Option<ProducerOverrides>,
    pub consumer: Option<ConsumerProperties>,
}
