//! In-process message channels.
//!
//! A [`MessageChannel`] is a direct channel: every `send` is dispatched to
//! exactly one subscribed handler, round-robin across handlers. A channel
//! without subscribers rejects sends, which is how an unbound producer
//! channel shows up to callers.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::message::Message;

/// Receives messages dispatched by a channel.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), ChannelError>;
}

/// Runs on every message before dispatch. May rewrite or reject it.
pub trait ChannelInterceptor: Send + Sync {
    fn pre_send(&self, channel: &str, message: Message) -> Result<Message, ChannelError>;
}

/// Post-construction hook applied to every channel the resolver creates.
#[async_trait]
pub trait ChannelInitializer: Send + Sync {
    async fn initialize(&self, channel: &MessageChannel);
}

/// Whether the resolver managed to bind a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingState {
    /// Created, bind not attempted yet, or unbound again.
    Unbound,
    /// A producer bind is in progress.
    Pending,
    /// Bound through the named binder.
    Bound { binder: String, destination: String },
    /// The bind call failed; the channel is registered but unusable.
    Failed { reason: String },
}

/// Handle returned by [`MessageChannel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Direct, in-process message conduit.
pub struct MessageChannel {
    id: Uuid,
    name: String,
    handlers: RwLock<Vec<(SubscriptionId, Arc<dyn MessageHandler>)>>,
    interceptors: RwLock<Vec<Arc<dyn ChannelInterceptor>>>,
    state: RwLock<BindingState>,
    next_handler: AtomicUsize,
}

impl MessageChannel {
    /// Create a new, unbound channel.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            handlers: RwLock::new(Vec::new()),
            interceptors: RwLock::new(Vec::new()),
            state: RwLock::new(BindingState::Unbound),
            next_handler: AtomicUsize::new(0),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a handler. Handlers share the load round-robin.
    pub async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.handlers.write().await.push((id, handler));
        debug!(channel = %self.name, "Handler subscribed");
        id
    }

    /// Subscribe a bounded queue and return its receiving end.
    pub async fn subscribe_queue(
        &self,
        capacity: usize,
    ) -> (SubscriptionId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self
            .subscribe(Arc::new(QueueHandler {
                channel: self.name.clone(),
                tx,
            }))
            .await;
        (id, rx)
    }

    /// Detach a handler. Returns false if it was not subscribed.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().await;
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        handlers.len() != before
    }

    pub async fn subscriber_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Add an interceptor; interceptors run in insertion order.
    pub async fn add_interceptor(&self, interceptor: Arc<dyn ChannelInterceptor>) {
        self.interceptors.write().await.push(interceptor);
    }

    /// Send a message to one subscribed handler.
    pub async fn send(&self, message: Message) -> Result<(), ChannelError> {
        let mut message = message;
        for interceptor in self.interceptors.read().await.iter() {
            message = interceptor.pre_send(&self.name, message)?;
        }

        let handler = {
            let handlers = self.handlers.read().await;
            if handlers.is_empty() {
                return Err(ChannelError::NoSubscribers {
                    channel: self.name.clone(),
                });
            }
            let index = self.next_handler.fetch_add(1, Ordering::Relaxed) % handlers.len();
            Arc::clone(&handlers[index].1)
        };

        trace!(channel = %self.name, message_id = %message.id, "Dispatching message");
        handler.handle(message).await
    }

    pub async fn binding_state(&self) -> BindingState {
        self.state.read().await.clone()
    }

    pub(crate) async fn set_binding_state(&self, state: BindingState) {
        *self.state.write().await = state;
    }
}

impl fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageChannel")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Forwards dispatched messages into an mpsc queue.
struct QueueHandler {
    channel: String,
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl MessageHandler for QueueHandler {
    async fn handle(&self, message: Message) -> Result<(), ChannelError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| ChannelError::DeliveryFailed {
                channel: self.channel.clone(),
                reason: "subscriber queue closed".into(),
            })
    }
}
