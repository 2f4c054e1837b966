//! End-to-end tests with Zenoh pub/sub.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses its own key prefix.

use std::time::Duration;

use chrono::Utc;
use fieldgate_common::{
    CanonicalValue, KeyExprBuilder, StatusCode, SystemType, Topic, Variant, encode_value,
};

fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_value_envelope_over_zenoh() {
    let prefix = unique_prefix();
    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let keys = KeyExprBuilder::with_prefix(&prefix, SystemType::Plc, "press");
    let subscriber = session
        .declare_subscriber(keys.driver_wildcard())
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let topic = Topic::parse("plc/press/node:json/holding-register:4").unwrap();
    let now = Utc::now();
    let value = CanonicalValue {
        value: Variant::Int(1200),
        status_code: StatusCode::GOOD,
        source_time: now,
        server_time: now,
    };
    let payload = encode_value(&topic, &value).unwrap().unwrap();

    session
        .put(keys.channel_key(&topic.topic_name), payload)
        .await
        .expect("Failed to publish");

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");

    let json: serde_json::Value = serde_json::from_slice(&sample.payload().to_bytes()).unwrap();
    assert_eq!(json["Value"]["Value"], 1200);
    assert_eq!(json["Topic"]["Address"], "holding-register:4");

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_escaped_wildcard_channel_is_publishable() {
    let prefix = unique_prefix();
    let session = zenoh::open(zenoh::Config::default())
        .await
        .expect("Failed to open Zenoh session");

    let keys = KeyExprBuilder::with_prefix(&prefix, SystemType::OpcUa, "srv");
    let subscriber = session
        .declare_subscriber(keys.driver_wildcard())
        .await
        .expect("Failed to create subscriber");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let key = keys.channel_key("opc/srv/path/Objects/#");
    session.put(&key, "1").await.expect("Failed to publish");

    let sample = tokio::time::timeout(Duration::from_secs(5), subscriber.recv_async())
        .await
        .expect("Timeout waiting for message")
        .expect("Failed to receive message");
    assert_eq!(sample.key_expr().as_str(), key);

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
