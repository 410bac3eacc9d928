use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;

use stream_binder::binder::{BinderRegistry, LocalBinder};
use stream_binder::{ChannelResolver, Message, StreamConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = StreamConfig::from_env().context("invalid STREAM_* configuration")?;

    let message_count: usize = std::env::var("STREAM_DEMO_MESSAGES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let mut channels: Vec<String> = std::env::args().skip(1).collect();
    if channels.is_empty() {
        channels.push("orders".to_string());
    }

    eprintln!("stream-binder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Default binder: {}",
        config.default_binder.as_deref().unwrap_or("(none)")
    );
    eprintln!("   Rebind policy: {}", config.rebind_policy);
    eprintln!("   Channels: {}\n", channels.join(", "));

    let binders = BinderRegistry::new().with_binder("local", Arc::new(LocalBinder::new("local")));
    let resolver = Arc::new(ChannelResolver::new(binders, config));

    for name in &channels {
        let (inbound, binding) = resolver
            .bind_consumer(name, None)
            .await
            .with_context(|| format!("failed to bind consumer for {name}"))?;
        let (_subscription, mut rx) = inbound.subscribe_queue(message_count.max(1)).await;
        let destination = binding.destination().to_string();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                tracing::info!(
                    destination = %destination,
                    partition = ?message.partition(),
                    payload = %message.payload,
                    "Received"
                );
            }
        });

        let outbound = resolver
            .resolve(name)
            .await
            .with_context(|| format!("failed to resolve {name}"))?;
        for n in 0..message_count {
            let message = Message::new(json!({ "seq": n, "key": format!("key-{}", n % 4) }))
                .with_header("source", "stream-binder");
            outbound
                .send(message)
                .await
                .with_context(|| format!("send on {name} failed"))?;
        }
    }

    // Let consumers drain before tearing bindings down.
    tokio::time::sleep(Duration::from_millis(200)).await;
    resolver.unbind_all().await;

    Ok(())
}
