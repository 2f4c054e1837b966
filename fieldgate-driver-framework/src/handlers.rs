//! JSON request handling shared by all drivers.
//!
//! Requests are JSON objects; replies always carry an `Ok` field. Single-item
//! requests reply with that item's outcome, list requests with one entry per item.

use std::sync::Arc;

use serde_json::{Map, Value, json};

use fieldgate_common::{CanonicalValue, RequestOp, Topic, Variant, value_json};

use crate::client::{ClientError, ClientResult};
use crate::driver::{BrowseQuery, Driver};

/// One item or a list of items, as sent by the caller.
#[derive(Debug, Clone, PartialEq)]
enum Items<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Items<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Items::One(item) => vec![item],
            Items::Many(items) => items,
        }
    }

    fn is_many(&self) -> bool {
        matches!(self, Items::Many(_))
    }
}

type Reply = std::result::Result<Value, String>;

/// Turns request bodies into driver calls and driver results into replies.
pub struct RequestHandler {
    driver: Arc<dyn Driver>,
}

impl RequestHandler {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self { driver }
    }

    /// Handle one request. Never fails: errors become `{"Ok": false, "Error": ...}`.
    pub async fn handle(&self, op: RequestOp, body: &[u8]) -> Value {
        let request = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            match serde_json::from_slice::<Value>(body) {
                Ok(request) => request,
                Err(e) => return error_reply(format!("invalid request: {e}")),
            }
        };

        let reply = match op {
            RequestOp::Read => self.read(&request).await,
            RequestOp::Write => self.write(&request).await,
            RequestOp::Browse => self.browse(&request, false).await,
            RequestOp::Schema => self.browse(&request, true).await,
            RequestOp::Subscribe => self.subscribe(&request, true).await,
            RequestOp::Unsubscribe => self.subscribe(&request, false).await,
            RequestOp::Publish => self.publish(&request).await,
            RequestOp::Info => Ok(json!({ "Ok": true, "Result": self.driver.info() })),
        };

        reply.unwrap_or_else(|message| {
            tracing::warn!(driver = %self.driver.id(), %op, error = %message, "Request rejected");
            error_reply(message)
        })
    }

    async fn read(&self, request: &Value) -> Reply {
        let addresses = strings(request, "NodeIds", "NodeId")?;
        let many = addresses.is_many();
        let results = self.driver.read(addresses.into_vec()).await;

        if many {
            let items: Vec<Value> = results.iter().map(read_item).collect();
            return Ok(json!({ "Ok": true, "Result": items }));
        }

        match results.into_iter().next() {
            Some(Ok(value)) => Ok(json!({ "Ok": value.is_good(), "Result": value_json(&value) })),
            Some(Err(e)) => Ok(json!({ "Ok": false, "Error": e.to_string(), "Result": failed_value(&e) })),
            None => Err("no result".to_string()),
        }
    }

    async fn write(&self, request: &Value) -> Reply {
        let addresses = strings(request, "NodeIds", "NodeId")?;
        let value = request
            .get("Values")
            .or_else(|| request.get("Value"))
            .ok_or("missing Value")?;

        match addresses {
            Items::One(address) => {
                let results = self
                    .driver
                    .write(vec![(address, Variant::from_json(value.clone()))])
                    .await;
                Ok(json!({ "Ok": results.first().copied().unwrap_or(false) }))
            }
            Items::Many(addresses) => {
                let Value::Array(values) = value else {
                    return Err("Values must be an array for a list of NodeIds".to_string());
                };
                if values.len() != addresses.len() {
                    return Err(format!(
                        "{} addresses but {} values",
                        addresses.len(),
                        values.len()
                    ));
                }
                let items = addresses
                    .into_iter()
                    .zip(values.iter().cloned().map(Variant::from_json))
                    .collect();
                Ok(json!({ "Ok": self.driver.write(items).await }))
            }
        }
    }

    async fn browse(&self, request: &Value, full_tree: bool) -> Reply {
        let node = match request.get("NodeId") {
            None | Some(Value::Null) => None,
            Some(Value::String(node)) => Some(node.clone()),
            Some(_) => return Err("NodeId must be a string".to_string()),
        };
        let query = BrowseQuery {
            node,
            reverse: flag(request, "Reverse"),
            full_tree,
            flat: flag(request, "Flat"),
        };

        match self.driver.browse(query).await {
            Ok(entries) => Ok(json!({ "Ok": true, "Result": entries })),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn subscribe(&self, request: &Value, subscribe: bool) -> Reply {
        let texts = strings(request, "Topics", "Topic")?;
        let many = texts.is_many();
        let texts = texts.into_vec();

        let mut results = vec![false; texts.len()];
        let mut accepted = Vec::new();
        let mut indices = Vec::new();
        for (index, text) in texts.iter().enumerate() {
            match self.topic(text) {
                Ok(topic) => {
                    accepted.push(topic);
                    indices.push(index);
                }
                Err(e) => {
                    tracing::warn!(driver = %self.driver.id(), topic = %text, error = %e, "Invalid topic");
                }
            }
        }

        let outcomes = if subscribe {
            self.driver.subscribe_topics(accepted).await
        } else {
            self.driver.unsubscribe_topics(accepted).await
        };
        for (index, ok) in indices.into_iter().zip(outcomes) {
            results[index] = ok;
        }

        if many {
            Ok(json!({ "Ok": results }))
        } else {
            Ok(json!({ "Ok": results.first().copied().unwrap_or(false) }))
        }
    }

    async fn publish(&self, request: &Value) -> Reply {
        let text = request
            .get("Topic")
            .and_then(Value::as_str)
            .ok_or("missing Topic")?;
        let value = request.get("Value").cloned().ok_or("missing Value")?;
        let topic = self.topic(text)?;

        let ok = self
            .driver
            .publish_topic(topic, Variant::from_json(value))
            .await;
        Ok(json!({ "Ok": ok }))
    }

    fn topic(&self, text: &str) -> std::result::Result<Topic, String> {
        let topic = Topic::parse(text).map_err(|e| e.to_string())?;
        if topic.system_type != self.driver.system_type() {
            return Err(format!(
                "topic system '{}' does not match driver system '{}'",
                topic.system_type,
                self.driver.system_type()
            ));
        }
        Ok(topic)
    }
}

fn error_reply(message: impl Into<String>) -> Value {
    json!({ "Ok": false, "Error": message.into() })
}

fn read_item(result: &ClientResult<CanonicalValue>) -> Value {
    match result {
        Ok(value) => value_json(value),
        Err(e) => {
            let mut failed = failed_value(e);
            failed["Error"] = Value::String(e.to_string());
            failed
        }
    }
}

fn failed_value(error: &ClientError) -> Value {
    json!({ "Value": null, "StatusCode": error.status().0 })
}

fn flag(request: &Value, key: &str) -> bool {
    request.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Read a string or list of strings from the plural or the singular key.
fn strings(request: &Value, plural: &str, singular: &str) -> std::result::Result<Items<String>, String> {
    let field = request
        .get(plural)
        .or_else(|| request.get(singular))
        .ok_or_else(|| format!("missing {singular}"))?;

    match field {
        Value::String(item) => Ok(Items::One(item.clone())),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| format!("{singular} entries must be strings"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Items::Many),
        _ => Err(format!("{singular} must be a string or an array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browse::BrowseEntry;
    use crate::client::NodeClass;
    use crate::error::Result;
    use crate::lifecycle::DriverState;
    use async_trait::async_trait;
    use chrono::Utc;
    use fieldgate_common::{StatusCode, SystemType};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        written: Mutex<Vec<(String, Variant)>>,
        subscribed: Mutex<Vec<Topic>>,
        browsed: Mutex<Vec<BrowseQuery>>,
    }

    #[async_trait]
    impl Driver for Recording {
        fn system_type(&self) -> SystemType {
            SystemType::OpcUa
        }

        fn id(&self) -> &str {
            "test"
        }

        fn state(&self) -> DriverState {
            DriverState::Connected
        }

        async fn connect(&self) -> Result<()> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        async fn subscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool> {
            let results = topics.iter().map(|t| t.address != "i=0").collect();
            self.subscribed.lock().extend(topics);
            results
        }

        async fn unsubscribe_topics(&self, topics: Vec<Topic>) -> Vec<bool> {
            vec![true; topics.len()]
        }

        async fn publish_topic(&self, topic: Topic, value: Variant) -> bool {
            self.written.lock().push((topic.address, value));
            true
        }

        async fn read(&self, addresses: Vec<String>) -> Vec<ClientResult<CanonicalValue>> {
            addresses
                .into_iter()
                .map(|address| match address.as_str() {
                    "missing" => Err(ClientError::UnknownNode(address)),
                    _ => Ok(CanonicalValue {
                        value: Variant::String(address),
                        status_code: StatusCode::GOOD,
                        source_time: Utc::now(),
                        server_time: Utc::now(),
                    }),
                })
                .collect()
        }

        async fn write(&self, items: Vec<(String, Variant)>) -> Vec<bool> {
            let results = items.iter().map(|(address, _)| address != "missing").collect();
            self.written.lock().extend(items);
            results
        }

        async fn browse(&self, query: BrowseQuery) -> ClientResult<Vec<BrowseEntry>> {
            self.browsed.lock().push(query);
            Ok(vec![BrowseEntry {
                browse_name: "Pump".into(),
                browse_path: "Objects/Pump".into(),
                display_name: "Pump".into(),
                node_id: "ns=2;s=Pump".into(),
                node_class: NodeClass::Object,
                nodes: None,
            }])
        }
    }

    fn handler() -> (Arc<Recording>, RequestHandler) {
        let driver = Arc::new(Recording::default());
        (driver.clone(), RequestHandler::new(driver))
    }

    async fn call(handler: &RequestHandler, op: RequestOp, body: Value) -> Value {
        handler.handle(op, body.to_string().as_bytes()).await
    }

    #[tokio::test]
    async fn test_single_read() {
        let (_, handler) = handler();
        let reply = call(&handler, RequestOp::Read, json!({"NodeId": "ns=2;s=A"})).await;
        assert_eq!(reply["Ok"], true);
        assert_eq!(reply["Result"]["Value"], "ns=2;s=A");
    }

    #[tokio::test]
    async fn test_batched_read_isolates_failures() {
        let (_, handler) = handler();
        let reply = call(&handler, RequestOp::Read, json!({"NodeIds": ["a", "missing", "b"]})).await;
        assert_eq!(reply["Ok"], true);
        let items = reply["Result"].as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["Value"], "a");
        assert_eq!(items[1]["Value"], Value::Null);
        assert_eq!(items[1]["StatusCode"], StatusCode::BAD_NODE_ID_UNKNOWN.0);
        assert_eq!(items[2]["Value"], "b");
    }

    #[tokio::test]
    async fn test_single_read_failure() {
        let (_, handler) = handler();
        let reply = call(&handler, RequestOp::Read, json!({"NodeId": "missing"})).await;
        assert_eq!(reply["Ok"], false);
        assert!(reply["Error"].as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_single_write_keeps_array_value() {
        let (driver, handler) = handler();
        let reply = call(&handler, RequestOp::Write, json!({"NodeId": "a", "Value": [1, 2]})).await;
        assert_eq!(reply["Ok"], true);
        let written = driver.written.lock();
        assert_eq!(
            written[0].1,
            Variant::Array(vec![Variant::Int(1), Variant::Int(2)])
        );
    }

    #[tokio::test]
    async fn test_batched_write() {
        let (_, handler) = handler();
        let reply = call(
            &handler,
            RequestOp::Write,
            json!({"NodeIds": ["a", "missing", "b"], "Values": [1, 2, 3]}),
        )
        .await;
        assert_eq!(reply["Ok"], json!([true, false, true]));
    }

    #[tokio::test]
    async fn test_batched_write_length_mismatch() {
        let (driver, handler) = handler();
        let reply = call(
            &handler,
            RequestOp::Write,
            json!({"NodeIds": ["a", "b"], "Values": [1]}),
        )
        .await;
        assert_eq!(reply["Ok"], false);
        assert!(driver.written.lock().is_empty());
    }

    #[tokio::test]
    async fn test_browse_reverse() {
        let (driver, handler) = handler();
        let reply = call(&handler, RequestOp::Browse, json!({"NodeId": "i=85", "Reverse": true})).await;
        assert_eq!(reply["Ok"], true);
        assert_eq!(reply["Result"][0]["BrowsePath"], "Objects/Pump");

        let query = driver.browsed.lock()[0].clone();
        assert_eq!(query.node.as_deref(), Some("i=85"));
        assert!(query.reverse);
        assert!(!query.full_tree);
    }

    #[tokio::test]
    async fn test_schema_without_node() {
        let (driver, handler) = handler();
        let reply = handler.handle(RequestOp::Schema, b"").await;
        assert_eq!(reply["Ok"], true);
        let query = driver.browsed.lock()[0].clone();
        assert_eq!(query.node, None);
        assert!(query.full_tree);
    }

    #[tokio::test]
    async fn test_subscribe_mixed_topics() {
        let (driver, handler) = handler();
        let reply = call(
            &handler,
            RequestOp::Subscribe,
            json!({"Topics": ["opc/test/node/ns=2;s=A", "not a topic", "plc/test/node/coil:1", "opc/test/node/i=0"]}),
        )
        .await;
        assert_eq!(reply["Ok"], json!([true, false, false, false]));
        assert_eq!(driver.subscribed.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_publish() {
        let (driver, handler) = handler();
        let reply = call(
            &handler,
            RequestOp::Publish,
            json!({"Topic": "opc/test/node/ns=2;s=A", "Value": "42"}),
        )
        .await;
        assert_eq!(reply["Ok"], true);
        assert_eq!(driver.written.lock()[0], ("ns=2;s=A".to_string(), Variant::String("42".into())));
    }

    #[tokio::test]
    async fn test_invalid_json() {
        let (_, handler) = handler();
        let reply = handler.handle(RequestOp::Read, b"{not json").await;
        assert_eq!(reply["Ok"], false);
        assert!(reply["Error"].as_str().unwrap().starts_with("invalid request"));
    }

    #[tokio::test]
    async fn test_missing_node_id() {
        let (_, handler) = handler();
        let reply = call(&handler, RequestOp::Read, json!({})).await;
        assert_eq!(reply["Ok"], false);
        assert_eq!(reply["Error"], "missing NodeId");
    }

    #[tokio::test]
    async fn test_info() {
        let (_, handler) = handler();
        let reply = handler.handle(RequestOp::Info, b"").await;
        assert_eq!(reply["Ok"], true);
        assert_eq!(reply["Result"]["Id"], "test");
        assert_eq!(reply["Result"]["System"], "opc");
    }
}
