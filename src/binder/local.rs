//! In-process binder.
//!
//! Every destination is a `tokio::sync::broadcast` channel. Producer bindings
//! stamp the partition index on outbound messages; partitioned consumer
//! bindings only forward messages whose partition they own. Useful as the
//! default backend for a single process and as a reference for real binders.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::binder::{Binder, Binding, BindingKind};
use crate::channel::{MessageChannel, MessageHandler};
use crate::error::{BindingError, ChannelError};
use crate::message::{Message, PARTITION_HEADER};
use crate::partition::{PartitionAssignment, PartitionHandler, PartitionStrategies};
use crate::properties::{ConsumerProperties, ProducerProperties};

/// Default per-destination buffer.
const DEFAULT_DESTINATION_CAPACITY: usize = 1024;

/// Binder backed by in-memory broadcast destinations.
pub struct LocalBinder {
    name: String,
    strategies: PartitionStrategies,
    capacity: usize,
    destinations: RwLock<HashMap<String, broadcast::Sender<Message>>>,
    producers: Arc<Mutex<HashSet<Uuid>>>,
}

impl LocalBinder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategies: PartitionStrategies::new(),
            capacity: DEFAULT_DESTINATION_CAPACITY,
            destinations: RwLock::new(HashMap::new()),
            producers: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Named extractors and selectors available to producer bindings.
    pub fn with_strategies(mut self, strategies: PartitionStrategies) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Names of destinations created so far.
    pub async fn destinations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.destinations.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    async fn destination(&self, name: &str) -> broadcast::Sender<Message> {
        if let Some(tx) = self.destinations.read().await.get(name) {
            return tx.clone();
        }
        let mut destinations = self.destinations.write().await;
        destinations
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(binder = %self.name, destination = %name, "Created destination");
                broadcast::channel(self.capacity).0
            })
            .clone()
    }
}

#[async_trait]
impl Binder for LocalBinder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn bind_producer(
        &self,
        destination: &str,
        channel: Arc<MessageChannel>,
        properties: &ProducerProperties,
    ) -> Result<Binding, BindingError> {
        if destination.is_empty() {
            return Err(BindingError::Rejected {
                binder: self.name.clone(),
                destination: destination.to_string(),
                reason: "empty destination name".into(),
            });
        }

        let partitioner = PartitionHandler::from_properties(properties, &self.strategies)?;

        if !self.producers.lock().await.insert(channel.id()) {
            return Err(BindingError::AlreadyBound {
                channel: channel.name().to_string(),
            });
        }

        let tx = self.destination(destination).await;
        let partition_count = partitioner.as_ref().map(PartitionHandler::partition_count);
        let subscription = channel
            .subscribe(Arc::new(ProducerHandler {
                destination: destination.to_string(),
                tx,
                partitioner,
            }))
            .await;

        info!(
            binder = %self.name,
            channel = %channel.name(),
            destination = %destination,
            partitions = ?partition_count,
            "Bound producer"
        );

        let producers = Arc::clone(&self.producers);
        let bound_channel = Arc::clone(&channel);
        Ok(
            Binding::new(BindingKind::Producer, &self.name, destination, channel.name())
                .on_unbind(Box::pin(async move {
                    bound_channel.unsubscribe(subscription).await;
                    producers.lock().await.remove(&bound_channel.id());
                })),
        )
    }

    async fn bind_consumer(
        &self,
        destination: &str,
        group: Option<&str>,
        channel: Arc<MessageChannel>,
        properties: &ConsumerProperties,
    ) -> Result<Binding, BindingError> {
        if destination.is_empty() {
            return Err(BindingError::Rejected {
                binder: self.name.clone(),
                destination: destination.to_string(),
                reason: "empty destination name".into(),
            });
        }

        let assignment = PartitionAssignment::from_properties(properties)?;
        let mut rx = self.destination(destination).await.subscribe();

        let target = Arc::clone(&channel);
        let source = destination.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if let Some(assignment) = &assignment {
                            match message.partition() {
                                Some(p) if assignment.owns(p) => {}
                                _ => {
                                    trace!(
                                        destination = %source,
                                        message_id = %message.id,
                                        "Skipping message outside assigned partitions"
                                    );
                                    continue;
                                }
                            }
                        }
                        if let Err(e) = target.send(message).await {
                            warn!(
                                destination = %source,
                                channel = %target.name(),
                                error = %e,
                                "Failed to deliver inbound message"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(destination = %source, skipped, "Consumer lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        info!(
            binder = %self.name,
            channel = %channel.name(),
            destination = %destination,
            group = ?group,
            partitions = ?assignment.map(|a| a.partitions()),
            "Bound consumer"
        );

        Ok(
            Binding::new(BindingKind::Consumer, &self.name, destination, channel.name())
                .with_group(group)
                .on_unbind(Box::pin(async move {
                    handle.abort();
                    let _ = handle.await;
                })),
        )
    }
}

/// Publishes channel messages to a destination.
struct ProducerHandler {
    destination: String,
    tx: broadcast::Sender<Message>,
    partitioner: Option<PartitionHandler>,
}

#[async_trait]
impl MessageHandler for ProducerHandler {
    async fn handle(&self, message: Message) -> Result<(), ChannelError> {
        let message = match &self.partitioner {
            Some(partitioner) => {
                let partition = partitioner.determine_partition(&message)?;
                message.with_header(PARTITION_HEADER, partition)
            }
            None => message,
        };

        if self.tx.send(message).is_err() {
            // No consumer bound yet; the broker drops the message.
            trace!(destination = %self.destination, "No consumers for destination");
        }
        Ok(())
    }
}
