//! OPC-UA driver against the simulated server.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use fieldgate_driver_framework::{
    BrowseQuery, ClientError, ClientFactory, Driver, DriverConfig, DriverState, MemoryBus, NodeClass,
    RequestHandler, RequestOp, StatusCode, Topic, Variant,
};
use zenoh_bridge_opcua::{
    AddressSpace, DataType, OpcUaBridgeConfig, OpcUaDriver, SimClient, SimClientFactory,
};

const CONFIG: &str = r#"{
    opcua: {
        id: "line",
        endpoint: "sim://plant",
        retry: { wait_ms: 50, check_interval_ms: 20 },
        write_queue: { block_size: 4, poll_timeout_ms: 50 },
        simulation: {
            variables: [
                { path: "Plant/Line1/Temperature", data_type: "Double", value: 20.5 },
                { path: "Plant/Line1/Speed", data_type: "UInt16", value: 100 },
                { path: "Plant/Line1/Running", data_type: "Boolean", value: true },
                { path: "Plant/Line2/Temperature", data_type: "Double", value: 18 },
                { path: "Plant/Line2/Name", data_type: "String", value: "east", writable: false },
            ],
        },
    },
}"#;

struct Fixture {
    space: Arc<AddressSpace>,
    bus: Arc<MemoryBus>,
    driver: Arc<OpcUaDriver<SimClient>>,
}

fn fixture() -> Fixture {
    let config = OpcUaBridgeConfig::from_json5(CONFIG).unwrap();
    let space = Arc::new(AddressSpace::from_config("plant", &config.opcua.simulation).unwrap());
    let bus = Arc::new(MemoryBus::new());
    let factory: Arc<dyn ClientFactory<SimClient>> =
        Arc::new(SimClientFactory::new(&config.opcua.endpoint, space.clone()));
    let driver = Arc::new(OpcUaDriver::new(&config.opcua, factory, bus.clone()));
    Fixture { space, bus, driver }
}

fn topic(text: &str) -> Topic {
    Topic::parse(text).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_path_topic_publishes_every_match() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let path = topic("opc/line/path/Objects/Plant/+/Temperature");
    assert_eq!(f.driver.subscribe_topics(vec![path.clone()]).await, vec![true]);
    assert_eq!(f.driver.core().registry().len(), 2);

    // Initial values of both matches.
    assert!(f.bus.wait_for(2, Duration::from_secs(2)).await);

    f.space
        .set_value("ns=2;s=Plant.Line2.Temperature", Variant::Float(25.0))
        .unwrap();
    assert!(f.bus.wait_for(3, Duration::from_secs(2)).await);

    let mut texts = f.bus.texts(&path.topic_name);
    assert_eq!(texts.pop().as_deref(), Some("25"));
    texts.sort();
    assert_eq!(texts, vec!["18", "20.5"]);
}

#[tokio::test]
async fn test_invalid_node_id_is_rejected_per_item() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let results = f
        .driver
        .subscribe_topics(vec![
            topic("opc/line/node/ns=2;s=Plant.Line1.Speed"),
            topic("opc/line/node/Speed"),
            topic("opc/line/node/ns=2;s=Plant.Missing"),
        ])
        .await;
    assert_eq!(results, vec![true, false, false]);
}

#[tokio::test]
async fn test_writes_are_coerced_to_the_node_type() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let results = f
        .driver
        .write(vec![
            ("ns=2;s=Plant.Line1.Temperature".into(), Variant::String("22.25".into())),
            ("ns=2;s=Plant.Line1.Speed".into(), Variant::String("1200".into())),
            ("ns=2;s=Plant.Line1.Running".into(), Variant::String("false".into())),
            ("ns=2;s=Plant.Line1.Speed".into(), Variant::Int(70_000)),
            ("ns=2;s=Plant.Line2.Name".into(), Variant::String("west".into())),
            ("not a node".into(), Variant::Int(1)),
        ])
        .await;
    assert_eq!(results, vec![true, true, true, false, false, false]);

    assert_eq!(
        f.space.value("ns=2;s=Plant.Line1.Temperature"),
        Some(Variant::Float(22.25))
    );
    assert_eq!(f.space.value("ns=2;s=Plant.Line1.Speed"), Some(Variant::UInt(1200)));
    assert_eq!(
        f.space.value("ns=2;s=Plant.Line1.Running"),
        Some(Variant::Boolean(false))
    );

    let health = f.driver.core().health().snapshot(f.driver.state());
    assert_eq!(health.writes_succeeded, 3);
    assert_eq!(health.writes_failed, 3);
}

#[tokio::test]
async fn test_publish_on_path_writes_all_matches() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let ok = f
        .driver
        .publish_topic(topic("opc/line/path/Objects/Plant/+/Temperature"), Variant::Int(30))
        .await;
    assert!(ok);
    assert_eq!(
        f.space.value("ns=2;s=Plant.Line1.Temperature"),
        Some(Variant::Float(30.0))
    );
    assert_eq!(
        f.space.value("ns=2;s=Plant.Line2.Temperature"),
        Some(Variant::Float(30.0))
    );

    let ok = f
        .driver
        .publish_topic(
            topic("opc/line/node:json/ns=2;s=Plant.Line1.Speed"),
            Variant::Json(serde_json::json!({"Value": 5})),
        )
        .await;
    assert!(ok);
    assert_eq!(f.space.value("ns=2;s=Plant.Line1.Speed"), Some(Variant::UInt(5)));

    let ok = f
        .driver
        .publish_topic(topic("opc/line/path/Objects/Nowhere/Temperature"), Variant::Int(1))
        .await;
    assert!(!ok);
}

#[tokio::test]
async fn test_read_mixes_good_and_bad_items() {
    let created = Utc::now();
    let f = fixture();
    f.driver.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let results = f
        .driver
        .read(vec![
            "ns=2;s=Plant.Line2.Name".into(),
            "ns=2;s=Plant.Nope".into(),
            "garbage".into(),
        ])
        .await;
    let first = results[0].as_ref().unwrap();
    assert_eq!(first.value, Variant::String("east".into()));
    // Source time is the node's last change, server time the read.
    assert!(first.source_time >= created);
    assert!(first.server_time - first.source_time >= chrono::Duration::milliseconds(30));
    assert_eq!(
        results[1].as_ref().unwrap().status_code,
        StatusCode::BAD_NODE_ID_UNKNOWN
    );
    assert!(matches!(results[2], Err(ClientError::InvalidAddress(_))));
}

#[tokio::test]
async fn test_browse_and_schema() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let top = f.driver.browse(BrowseQuery::default()).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].browse_path, "Objects/Plant");
    assert!(top[0].nodes.is_none());

    let parent = f
        .driver
        .browse(BrowseQuery {
            node: Some("ns=2;s=Plant.Line1".into()),
            reverse: true,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(parent[0].node_id, "ns=2;s=Plant");

    let schema = f
        .driver
        .browse(BrowseQuery {
            full_tree: true,
            flat: true,
            ..Default::default()
        })
        .await
        .unwrap();
    let variables: Vec<_> = schema
        .iter()
        .filter(|e| e.node_class == NodeClass::Variable)
        .map(|e| e.browse_path.as_str())
        .collect();
    assert_eq!(variables.len(), 5);
    assert!(variables.contains(&"Objects/Plant/Line2/Name"));

    let err = f
        .driver
        .browse(BrowseQuery {
            node: Some("nonsense".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidAddress(_)));
}

#[tokio::test]
async fn test_server_restart_restores_monitored_items() {
    let f = fixture();
    f.driver.connect().await.unwrap();

    let speed = topic("opc/line/node/ns=2;s=Plant.Line1.Speed");
    f.driver.subscribe_topics(vec![speed.clone()]).await;
    assert!(f.bus.wait_for(1, Duration::from_secs(2)).await);

    f.space.drop_sessions();
    assert!(wait_until(|| f.space.monitor_count() == 1).await);
    assert_eq!(f.driver.state(), DriverState::Connected);

    f.space
        .set_value("ns=2;s=Plant.Line1.Speed", Variant::UInt(7))
        .unwrap();
    assert!(
        wait_until(|| f.bus.texts(&speed.topic_name).last().map(String::as_str) == Some("7")).await
    );
}

#[tokio::test]
async fn test_requests_through_handler() {
    let f = fixture();
    f.driver.connect().await.unwrap();
    let handler = RequestHandler::new(f.driver.clone());

    let reply = handler
        .handle(
            RequestOp::Write,
            br#"{"NodeId": "ns=2;s=Plant.Line1.Speed", "Value": "42"}"#,
        )
        .await;
    assert_eq!(reply["Ok"], true);

    let reply = handler
        .handle(RequestOp::Read, br#"{"NodeId": "ns=2;s=Plant.Line1.Speed"}"#)
        .await;
    assert_eq!(reply["Ok"], true);
    assert_eq!(reply["Result"]["Value"], 42);

    let reply = handler.handle(RequestOp::Info, b"").await;
    assert_eq!(reply["Result"]["Endpoint"], "sim://plant");
    assert_eq!(reply["Result"]["Server"]["ServerStatus"], "Running");
}

#[tokio::test]
async fn test_unknown_simulated_server_never_connects() {
    let config = OpcUaBridgeConfig::from_json5(CONFIG).unwrap();
    let space = Arc::new(AddressSpace::new("other"));
    let factory: Arc<dyn ClientFactory<SimClient>> =
        Arc::new(SimClientFactory::new(&config.opcua.endpoint, space));
    let driver = OpcUaDriver::new(&config.opcua, factory, Arc::new(MemoryBus::new()));

    assert!(driver.connect().await.is_err());
    assert_ne!(driver.state(), DriverState::Connected);
    assert_eq!(DataType::Double.as_str(), "Double");
}
