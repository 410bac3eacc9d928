//! End-to-end partitioned delivery through the in-process binder.
//!
//! Separate resolvers share one `LocalBinder`, standing in for independently
//! deployed producer and consumer processes attached to the same broker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use stream_binder::binder::{BinderRegistry, LocalBinder};
use stream_binder::config::StreamConfig;
use stream_binder::message::Message;
use stream_binder::partition::{
    DefaultPartitionSelector, PartitionHandler, PartitionSelector, PartitionStrategies,
};
use stream_binder::properties::{
    BindingProperties, ConsumerProperties, ProducerOverrides, ProducerProperties,
};
use stream_binder::ChannelResolver;

const PARTITIONS: i32 = 4;
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn registry(binder: &Arc<LocalBinder>) -> BinderRegistry {
    BinderRegistry::new().with_binder("local", binder.clone())
}

fn producer_config() -> StreamConfig {
    let mut config = StreamConfig::default();
    config.bindings.insert(
        "orders".into(),
        BindingProperties {
            producer: Some(ProducerOverrides {
                partition_key_expression: Some("payload.customer".into()),
                partition_count: Some(PARTITIONS),
                ..Default::default()
            }),
            ..Default::default()
        },
    );
    config
}

fn consumer_config(instance_index: i32, instance_count: i32) -> StreamConfig {
    let mut config = StreamConfig::default();
    config.bindings.insert(
        "orders".into(),
        BindingProperties {
            group: Some("fulfilment".into()),
            consumer: Some(ConsumerProperties {
                partitioned: true,
                instance_index,
                instance_count,
                partition_count: PARTITIONS,
            }),
            ..Default::default()
        },
    );
    config
}

async fn collect(rx: &mut mpsc::Receiver<Message>, expected: usize) -> Vec<Message> {
    let mut out = Vec::new();
    while out.len() < expected {
        match timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(msg)) => out.push(msg),
            _ => break,
        }
    }
    out
}

#[tokio::test]
async fn same_key_always_reaches_same_instance() {
    let broker = Arc::new(LocalBinder::new("local"));

    let mut receivers = Vec::new();
    let mut consumers = Vec::new();
    for index in 0..2 {
        let resolver = ChannelResolver::new(registry(&broker), consumer_config(index, 2));
        let (inbound, binding) = resolver.bind_consumer("orders", None).await.unwrap();
        assert_eq!(binding.group(), Some("fulfilment"));
        let (_id, rx) = inbound.subscribe_queue(256).await;
        receivers.push(rx);
        consumers.push(resolver);
    }

    let producer = ChannelResolver::new(registry(&broker), producer_config());
    let out = producer.resolve("orders").await.unwrap();

    let customers = ["acme", "globex", "initech", "umbrella", "hooli", "stark"];
    for round in 0..5 {
        for customer in customers {
            out.send(Message::new(json!({"customer": customer, "round": round})))
                .await
                .unwrap();
        }
    }

    let total = customers.len() * 5;
    let mut owner: HashMap<String, usize> = HashMap::new();
    let mut received = 0;
    for (instance, rx) in receivers.iter_mut().enumerate() {
        let messages = timeout(TEST_TIMEOUT, collect(rx, total)).await.unwrap();
        received += messages.len();
        for msg in messages {
            let partition = msg.partition().expect("partition header stamped");
            assert_eq!(partition as usize % 2, instance);

            let customer = msg.payload["customer"].as_str().unwrap().to_string();
            let previous = owner.insert(customer.clone(), instance);
            assert!(
                previous.is_none() || previous == Some(instance),
                "{customer} delivered to two instances"
            );
        }
    }
    assert_eq!(received, total);
}

#[tokio::test]
async fn partition_is_a_pure_function_of_key_and_count() {
    // Two handlers built independently agree, as two processes would.
    let props = ProducerProperties {
        partition_key_expression: Some("payload".into()),
        partition_count: 5,
        ..Default::default()
    };
    let a = PartitionHandler::from_properties(&props, &PartitionStrategies::new())
        .unwrap()
        .unwrap();
    let b = PartitionHandler::from_properties(&props, &PartitionStrategies::new())
        .unwrap()
        .unwrap();

    let index = a.determine_partition(&Message::new("abc")).unwrap();
    assert_eq!(index, 4);
    for _ in 0..100 {
        assert_eq!(b.determine_partition(&Message::new("abc")).unwrap(), index);
    }

    let keys: Vec<Value> = (0..500).map(|i| json!(format!("key-{i}"))).collect();
    let mut seen = HashSet::new();
    for key in &keys {
        let p = a.select(key);
        assert!(p < 5);
        assert_eq!(p, b.select(key));
        seen.insert(p);
    }
    // 500 keys spread over every partition
    assert_eq!(seen.len(), 5);

    assert_eq!(
        DefaultPartitionSelector.select_partition(&json!("abc"), 5),
        96354
    );
}

#[tokio::test]
async fn custom_selector_overrides_hashing() {
    struct ByRegion;

    impl PartitionSelector for ByRegion {
        fn select_partition(&self, key: &Value, _partition_count: u32) -> i32 {
            match key.as_str() {
                Some("eu") => 0,
                Some("us") => 1,
                _ => 2,
            }
        }
    }

    let mut strategies = PartitionStrategies::new();
    strategies.register_selector("by-region", Arc::new(ByRegion));
    let broker = Arc::new(LocalBinder::new("local").with_strategies(strategies));

    let consumer = ChannelResolver::new(registry(&broker), StreamConfig::default());
    let (inbound, _binding) = consumer.bind_consumer("events", None).await.unwrap();
    let (_id, mut rx) = inbound.subscribe_queue(16).await;

    let mut config = StreamConfig::default();
    config.producer_defaults = ProducerProperties {
        partition_key_expression: Some("headers.region".into()),
        partition_selector: Some("by-region".into()),
        partition_count: 3,
        ..Default::default()
    };
    let producer = ChannelResolver::new(registry(&broker), config);
    let out = producer.resolve("events").await.unwrap();

    for region in ["eu", "us", "apac"] {
        out.send(Message::new("e").with_header("region", region))
            .await
            .unwrap();
    }

    let partitions: Vec<u32> = timeout(TEST_TIMEOUT, collect(&mut rx, 3))
        .await
        .unwrap()
        .iter()
        .map(|m| m.partition().unwrap())
        .collect();
    assert_eq!(partitions, vec![0, 1, 2]);
}

#[tokio::test]
async fn oversized_consumer_topology_is_rejected() {
    let broker = Arc::new(LocalBinder::new("local"));
    let resolver = ChannelResolver::new(registry(&broker), consumer_config(0, PARTITIONS + 1));
    assert!(resolver.bind_consumer("orders", None).await.is_err());
}
