//! Partitioned routing.
//!
//! Outbound messages on a partitioned binding go through two steps:
//! 1. a key strategy (a [`KeyExpression`] or a registered
//!    [`PartitionKeyExtractor`]) computes the partition key,
//! 2. a [`PartitionSelector`] maps the key to a partition index.
//!
//! All configuration is validated when the [`PartitionHandler`] is built,
//! which happens at binding time.

pub mod assignment;
pub mod key;
pub mod selector;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PartitionError;
use crate::message::Message;
use crate::properties::ProducerProperties;

pub use assignment::PartitionAssignment;
pub use key::{KeyExpression, PartitionKeyExtractor};
pub use selector::{DefaultPartitionSelector, PartitionSelector, stable_hash};

/// Named key extractors and selectors that producer properties can reference.
#[derive(Clone, Default)]
pub struct PartitionStrategies {
    extractors: HashMap<String, Arc<dyn PartitionKeyExtractor>>,
    selectors: HashMap<String, Arc<dyn PartitionSelector>>,
}

impl PartitionStrategies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extractor(
        &mut self,
        name: impl Into<String>,
        extractor: Arc<dyn PartitionKeyExtractor>,
    ) {
        self.extractors.insert(name.into(), extractor);
    }

    pub fn register_selector(
        &mut self,
        name: impl Into<String>,
        selector: Arc<dyn PartitionSelector>,
    ) {
        self.selectors.insert(name.into(), selector);
    }

    pub fn extractor(&self, name: &str) -> Option<Arc<dyn PartitionKeyExtractor>> {
        self.extractors.get(name).cloned()
    }

    pub fn selector(&self, name: &str) -> Option<Arc<dyn PartitionSelector>> {
        self.selectors.get(name).cloned()
    }
}

impl fmt::Debug for PartitionStrategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionStrategies")
            .field("extractors", &self.extractors.keys().collect::<Vec<_>>())
            .field("selectors", &self.selectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validated partition routing for one producer binding.
#[derive(Clone)]
pub struct PartitionHandler {
    key_strategy: Arc<dyn PartitionKeyExtractor>,
    selector: Arc<dyn PartitionSelector>,
    partition_count: u32,
}

impl PartitionHandler {
    /// Build the handler for a producer binding.
    ///
    /// Returns `Ok(None)` when the binding is not partitioned. Every
    /// configuration error is reported here, never at send time.
    pub fn from_properties(
        props: &ProducerProperties,
        strategies: &PartitionStrategies,
    ) -> Result<Option<Self>, PartitionError> {
        props.validate()?;
        if !props.is_partitioned() {
            return Ok(None);
        }

        let key_strategy: Arc<dyn PartitionKeyExtractor> =
            match (&props.partition_key_expression, &props.partition_key_extractor) {
                (Some(expression), None) => Arc::new(KeyExpression::parse(expression)?),
                (None, Some(name)) => strategies
                    .extractor(name)
                    .ok_or_else(|| PartitionError::UnknownKeyExtractor(name.clone()))?,
                (Some(_), Some(_)) => return Err(PartitionError::ConflictingKeyStrategies),
                (None, None) => {
                    return Err(PartitionError::MissingKeyStrategy(props.partition_count));
                }
            };

        let selector: Arc<dyn PartitionSelector> = match &props.partition_selector {
            Some(name) => strategies
                .selector(name)
                .ok_or_else(|| PartitionError::UnknownSelector(name.clone()))?,
            None => Arc::new(DefaultPartitionSelector),
        };

        Ok(Some(Self {
            key_strategy,
            selector,
            partition_count: props.partition_count as u32,
        }))
    }

    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Extract the key and select a partition in `0..partition_count`.
    pub fn determine_partition(&self, message: &Message) -> Result<u32, PartitionError> {
        let key = match self.key_strategy.extract_key(message) {
            None | Some(Value::Null) => return Err(PartitionError::NullKey),
            Some(key) => key,
        };
        Ok(self.select(&key))
    }

    /// Select a partition for an already extracted key.
    pub fn select(&self, key: &Value) -> u32 {
        let raw = self.selector.select_partition(key, self.partition_count);
        raw.rem_euclid(self.partition_count as i32) as u32
    }
}

impl fmt::Debug for PartitionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionHandler")
            .field("partition_count", &self.partition_count)
            .finish_non_exhaustive()
    }
}
