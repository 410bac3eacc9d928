//! Channel resolution: the binding core.
//!
//! [`ChannelResolver::resolve`] maps a logical channel name to a channel,
//! creating and binding it on first use. Lookups of known names only take a
//! read lock; creation is serialized on a single mutex and re-checked inside
//! it, so each name is created and bound at most once however many callers
//! race on it.
//!
//! The bind call runs while the creation lock is held. A binder that never
//! returns blocks the resolution of every new name.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::binder::{Binding, BinderRegistry};
use crate::channel::{BindingState, ChannelInitializer, MessageChannel};
use crate::config::{RebindPolicy, StreamConfig};
use crate::error::ResolutionError;
use crate::properties::BindingProperties;

/// A parsed `[<binder>:]<name>` channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelName<'a> {
    binder: Option<&'a str>,
    destination: &'a str,
}

impl<'a> ChannelName<'a> {
    /// Split off the optional binder prefix.
    ///
    /// At most one colon is allowed, and neither side of it may be empty.
    pub fn parse(name: &'a str) -> Result<Self, ResolutionError> {
        let invalid = |reason: &str| ResolutionError::InvalidChannelName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("empty name"));
        }

        match name.split_once(':') {
            None => Ok(Self {
                binder: None,
                destination: name,
            }),
            Some((_, rest)) if rest.contains(':') => Err(invalid("more than one binder prefix")),
            Some(("", _)) => Err(invalid("empty binder prefix")),
            Some((_, "")) => Err(invalid("empty channel name after binder prefix")),
            Some((binder, destination)) => Ok(Self {
                binder: Some(binder),
                destination,
            }),
        }
    }

    /// Binder selector, if the name carried one.
    pub fn binder(&self) -> Option<&'a str> {
        self.binder
    }

    /// The name with the binder prefix stripped.
    pub fn destination(&self) -> &'a str {
        self.destination
    }
}

/// Outcome of [`ChannelResolver::inspect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    /// Hand the channel back as is.
    Ready,
    /// Another caller is binding it; take the creation lock.
    Wait,
    /// Bind it again.
    Rebind,
}

/// Registry of logical channels, bound on first resolution.
pub struct ChannelResolver {
    binders: BinderRegistry,
    config: StreamConfig,
    initializers: Vec<Arc<dyn ChannelInitializer>>,
    channels: RwLock<HashMap<String, Arc<MessageChannel>>>,
    producer_bindings: RwLock<HashMap<String, Arc<Binding>>>,
    consumer_bindings: Mutex<Vec<Arc<Binding>>>,
    creation: Mutex<()>,
}

impl ChannelResolver {
    /// Create a resolver. A default binder in `config` overrides the registry's.
    pub fn new(mut binders: BinderRegistry, config: StreamConfig) -> Self {
        if config.default_binder.is_some() {
            binders.set_default_binder(config.default_binder.clone());
        }
        Self {
            binders,
            config,
            initializers: Vec::new(),
            channels: RwLock::new(HashMap::new()),
            producer_bindings: RwLock::new(HashMap::new()),
            consumer_bindings: Mutex::new(Vec::new()),
            creation: Mutex::new(()),
        }
    }

    /// Add a hook run on every channel this resolver creates, before binding.
    pub fn with_initializer(mut self, initializer: Arc<dyn ChannelInitializer>) -> Self {
        self.initializers.push(initializer);
        self
    }

    pub fn binders(&self) -> &BinderRegistry {
        &self.binders
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Resolve `name` to its channel, creating and binding it as a producer
    /// on first use.
    ///
    /// The channel is registered, in [`BindingState::Pending`], before the
    /// binder is called. If binding fails, or the returned future is dropped
    /// mid-bind, the channel stays registered as [`BindingState::Failed`].
    /// Later calls either return that channel or retry the bind, per
    /// [`RebindPolicy`].
    pub async fn resolve(&self, name: &str) -> Result<Arc<MessageChannel>, ResolutionError> {
        if let Some(channel) = self.lookup(name).await
            && self.inspect(&channel, false).await == Next::Ready
        {
            return Ok(channel);
        }

        let _guard = self.creation.lock().await;

        let channel = match self.lookup(name).await {
            Some(channel) => {
                if self.inspect(&channel, true).await == Next::Ready {
                    return Ok(channel);
                }
                info!(channel = %name, "Retrying producer bind");
                channel.set_binding_state(BindingState::Pending).await;
                channel
            }
            None => {
                ChannelName::parse(name)?;
                let channel = MessageChannel::new(name);
                for initializer in &self.initializers {
                    initializer.initialize(&channel).await;
                }
                // Registered before the bind so that a caller dropping this
                // future mid-bind cannot cause a second bind of the name.
                channel.set_binding_state(BindingState::Pending).await;
                self.channels
                    .write()
                    .await
                    .insert(name.to_string(), Arc::clone(&channel));
                debug!(channel = %name, channel_id = %channel.id(), "Created channel");
                channel
            }
        };

        self.bind_producer(name, &channel).await.map(|_| channel)
    }

    /// Bind a fresh inbound channel for `name` as a consumer.
    ///
    /// `group` falls back to the binding's configured group.
    pub async fn bind_consumer(
        &self,
        name: &str,
        group: Option<&str>,
    ) -> Result<(Arc<MessageChannel>, Arc<Binding>), ResolutionError> {
        let parsed = ChannelName::parse(name)?;
        let (key, binding_props) = self.binding_properties(name, &parsed);
        let group = group
            .map(str::to_string)
            .or_else(|| binding_props.and_then(|b| b.group.clone()));
        let selector = parsed
            .binder()
            .or_else(|| binding_props.and_then(|b| b.binder.as_deref()));
        let destination = binding_props
            .and_then(|b| b.destination.clone())
            .unwrap_or_else(|| parsed.destination().to_string());
        let properties = self.config.consumer_properties(key);

        let channel = MessageChannel::new(name);
        for initializer in &self.initializers {
            initializer.initialize(&channel).await;
        }

        let binder = self.binders.get_binder(selector)?;
        let binding = Arc::new(
            binder
                .bind_consumer(
                    &destination,
                    group.as_deref(),
                    Arc::clone(&channel),
                    &properties,
                )
                .await?,
        );
        channel
            .set_binding_state(BindingState::Bound {
                binder: binder.name().to_string(),
                destination: destination.clone(),
            })
            .await;
        self.consumer_bindings.lock().await.push(Arc::clone(&binding));

        info!(
            channel = %name,
            binder = %binder.name(),
            destination = %destination,
            group = ?group,
            "Consumer channel bound"
        );
        Ok((channel, binding))
    }

    /// Channel registered under `name`, without creating it.
    pub async fn lookup(&self, name: &str) -> Option<Arc<MessageChannel>> {
        self.channels.read().await.get(name).cloned()
    }

    /// Producer binding of a resolved channel.
    pub async fn binding(&self, name: &str) -> Option<Arc<Binding>> {
        self.producer_bindings.read().await.get(name).cloned()
    }

    /// Names of every registered channel, sorted.
    pub async fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tear down every binding this resolver created. Channels stay registered.
    pub async fn unbind_all(&self) {
        let _guard = self.creation.lock().await;

        let producers: Vec<(String, Arc<Binding>)> =
            self.producer_bindings.write().await.drain().collect();
        for (name, binding) in producers {
            binding.unbind().await;
            if let Some(channel) = self.lookup(&name).await {
                channel.set_binding_state(BindingState::Unbound).await;
            }
        }

        let consumers: Vec<Arc<Binding>> = self.consumer_bindings.lock().await.drain(..).collect();
        for binding in consumers {
            binding.unbind().await;
        }
    }

    /// Decide what `resolve` does with a registered channel.
    ///
    /// `Pending` seen without the creation lock means a bind is in flight.
    /// Seen with the lock held, the bind that set it was dropped before
    /// completing and is treated as failed.
    async fn inspect(&self, channel: &MessageChannel, locked: bool) -> Next {
        let reason = match channel.binding_state().await {
            BindingState::Pending if !locked => return Next::Wait,
            BindingState::Pending => {
                let reason = "producer bind was interrupted".to_string();
                channel
                    .set_binding_state(BindingState::Failed {
                        reason: reason.clone(),
                    })
                    .await;
                reason
            }
            BindingState::Failed { reason } => reason,
            _ => return Next::Ready,
        };

        match self.config.rebind_policy {
            RebindPolicy::ReturnUnbound => {
                warn!(
                    channel = %channel.name(),
                    reason = %reason,
                    "Returning channel whose producer bind failed"
                );
                Next::Ready
            }
            RebindPolicy::Retry => Next::Rebind,
        }
    }

    /// Select a binder and bind `channel` as a producer, recording the outcome
    /// on the channel.
    async fn bind_producer(
        &self,
        name: &str,
        channel: &Arc<MessageChannel>,
    ) -> Result<(), ResolutionError> {
        let parsed = ChannelName::parse(name)?;
        let (key, binding_props) = self.binding_properties(name, &parsed);
        let selector = parsed
            .binder()
            .or_else(|| binding_props.and_then(|b| b.binder.as_deref()));
        let destination = binding_props
            .and_then(|b| b.destination.clone())
            .unwrap_or_else(|| parsed.destination().to_string());
        let properties = self.config.producer_properties(key);

        let outcome = async {
            let binder = self.binders.get_binder(selector)?;
            let binding = binder
                .bind_producer(&destination, Arc::clone(channel), &properties)
                .await?;
            Ok::<_, ResolutionError>((binder.name().to_string(), binding))
        }
        .await;

        match outcome {
            Ok((binder, binding)) => {
                info!(
                    channel = %name,
                    binder = %binder,
                    destination = %destination,
                    "Producer channel bound"
                );
                channel
                    .set_binding_state(BindingState::Bound {
                        binder,
                        destination,
                    })
                    .await;
                self.producer_bindings
                    .write()
                    .await
                    .insert(name.to_string(), Arc::new(binding));
                Ok(())
            }
            Err(e) => {
                warn!(channel = %name, error = %e, "Producer bind failed");
                channel
                    .set_binding_state(BindingState::Failed {
                        reason: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Binding properties for a channel: keyed by the full name, else by the
    /// name without its binder prefix.
    fn binding_properties<'n>(
        &self,
        name: &'n str,
        parsed: &ChannelName<'n>,
    ) -> (&'n str, Option<&BindingProperties>) {
        if let Some(props) = self.config.binding(name) {
            return (name, Some(props));
        }
        let key = parsed.destination();
        (key, self.config.binding(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::LocalBinder;
    use crate::channel::ChannelInterceptor;
    use crate::error::ChannelError;
    use crate::message::Message;
    use async_trait::async_trait;
    use serde_json::json;

    #[test]
    fn parses_plain_and_prefixed_names() {
        let plain = ChannelName::parse("output").unwrap();
        assert_eq!(plain.binder(), None);
        assert_eq!(plain.destination(), "output");

        let prefixed = ChannelName::parse("rabbit:foo").unwrap();
        assert_eq!(prefixed.binder(), Some("rabbit"));
        assert_eq!(prefixed.destination(), "foo");
    }

    #[test]
    fn rejects_malformed_names() {
        for bad in ["", "a:b:c", "a::b", ":foo", "foo:", ":"] {
            assert!(
                matches!(
                    ChannelName::parse(bad),
                    Err(ResolutionError::InvalidChannelName { .. })
                ),
                "expected {bad:?} to be rejected"
            );
        }
    }

    struct Tag;

    impl ChannelInterceptor for Tag {
        fn pre_send(&self, _channel: &str, message: Message) -> Result<Message, ChannelError> {
            Ok(message.with_header("tagged", true))
        }
    }

    struct Tagging;

    #[async_trait]
    impl ChannelInitializer for Tagging {
        async fn initialize(&self, channel: &MessageChannel) {
            channel.add_interceptor(Arc::new(Tag)).await;
        }
    }

    fn local_resolver(config: StreamConfig) -> ChannelResolver {
        let binders = BinderRegistry::new().with_binder("local", Arc::new(LocalBinder::new("local")));
        ChannelResolver::new(binders, config)
    }

    #[tokio::test]
    async fn resolve_is_idempotent() {
        let resolver = local_resolver(StreamConfig::default());
        let first = resolver.resolve("orders").await.unwrap();
        let second = resolver.resolve("orders").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(resolver.channel_names().await, vec!["orders".to_string()]);
        assert_eq!(
            first.binding_state().await,
            BindingState::Bound {
                binder: "local".into(),
                destination: "orders".into()
            }
        );
    }

    #[tokio::test]
    async fn initializers_decorate_new_channels() {
        let resolver = local_resolver(StreamConfig::default()).with_initializer(Arc::new(Tagging));
        let (inbound, _binding) = resolver.bind_consumer("orders", None).await.unwrap();
        let (_id, mut rx) = inbound.subscribe_queue(4).await;

        let out = resolver.resolve("orders").await.unwrap();
        out.send(Message::new(json!(1))).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.header("tagged"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn destination_override_and_binding_group() {
        let mut config = StreamConfig::default();
        config.bindings.insert(
            "orders".into(),
            BindingProperties {
                destination: Some("orders-v2".into()),
                group: Some("billing".into()),
                ..Default::default()
            },
        );
        let resolver = local_resolver(config);

        resolver.resolve("orders").await.unwrap();
        let binding = resolver.binding("orders").await.unwrap();
        assert_eq!(binding.destination(), "orders-v2");

        let (_channel, consumer) = resolver.bind_consumer("local:orders", None).await.unwrap();
        assert_eq!(consumer.destination(), "orders-v2");
        assert_eq!(consumer.group(), Some("billing"));
    }

    #[tokio::test]
    async fn unbind_all_releases_bindings() {
        let resolver = local_resolver(StreamConfig::default());
        let out = resolver.resolve("orders").await.unwrap();
        let (_inbound, consumer) = resolver.bind_consumer("orders", Some("g")).await.unwrap();

        resolver.unbind_all().await;

        assert!(resolver.binding("orders").await.is_none());
        assert_eq!(out.binding_state().await, BindingState::Unbound);
        assert!(matches!(
            out.send(Message::new("x")).await,
            Err(ChannelError::NoSubscribers { .. })
        ));
        assert!(!consumer.unbind().await);
        assert!(resolver.lookup("orders").await.is_some());
    }
}
