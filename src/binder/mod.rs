//! Binder capability: the seam where a messaging backend plugs in.
//!
//! A [`Binder`] attaches a [`MessageChannel`] to a physical destination on one
//! messaging system, either as a producer (messages sent on the channel leave
//! through the backend) or as a consumer (messages arriving at the
//! destination are sent on the channel). The resolver never constructs a
//! binder; it looks one up in the [`BinderRegistry`].

pub mod local;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::channel::MessageChannel;
use crate::error::BindingError;
use crate::properties::{ConsumerProperties, ProducerProperties};

pub use local::LocalBinder;
pub use registry::BinderRegistry;

/// Backend-specific capability binding channels to destinations.
#[async_trait]
pub trait Binder: Send + Sync {
    /// Identifier used in logs and binding records.
    fn name(&self) -> &str;

    /// Bind `channel` so that messages sent on it reach `destination`.
    async fn bind_producer(
        &self,
        destination: &str,
        channel: Arc<MessageChannel>,
        properties: &ProducerProperties,
    ) -> Result<Binding, BindingError>;

    /// Bind `channel` so that messages arriving at `destination` are sent on it.
    async fn bind_consumer(
        &self,
        destination: &str,
        group: Option<&str>,
        channel: Arc<MessageChannel>,
        properties: &ConsumerProperties,
    ) -> Result<Binding, BindingError>;
}

/// Direction of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Producer,
    Consumer,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}

/// Record of a channel bound to a destination, with its teardown.
pub struct Binding {
    id: Uuid,
    kind: BindingKind,
    binder: String,
    destination: String,
    channel: String,
    group: Option<String>,
    created_at: DateTime<Utc>,
    teardown: Mutex<Option<BoxFuture<'static, ()>>>,
}

impl Binding {
    pub fn new(
        kind: BindingKind,
        binder: impl Into<String>,
        destination: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            binder: binder.into(),
            destination: destination.into(),
            channel: channel.into(),
            group: None,
            created_at: Utc::now(),
            teardown: Mutex::new(None),
        }
    }

    pub fn with_group(mut self, group: Option<&str>) -> Self {
        self.group = group.map(str::to_string);
        self
    }

    /// Future run once by [`Binding::unbind`].
    pub fn on_unbind(mut self, teardown: BoxFuture<'static, ()>) -> Self {
        self.teardown = Mutex::new(Some(teardown));
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    pub fn binder(&self) -> &str {
        &self.binder
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Tear the binding down. Returns false if it was already unbound.
    pub async fn unbind(&self) -> bool {
        let teardown = self.teardown.lock().await.take();
        match teardown {
            Some(teardown) => {
                teardown.await;
                info!(
                    kind = %self.kind,
                    binder = %self.binder,
                    destination = %self.destination,
                    channel = %self.channel,
                    "Unbound channel"
                );
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("binder", &self.binder)
            .field("destination", &self.destination)
            .field("channel", &self.channel)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}
