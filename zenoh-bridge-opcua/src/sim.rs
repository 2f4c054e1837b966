//! In-process OPC-UA server simulation.
//!
//! [`AddressSpace`] holds the nodes of a simulated server; [`SimClient`] talks
//! to it through the same client interface a network client would implement.
//! Endpoints have the form `sim://<server name>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use fieldgate_driver_framework::{
    BrowseDirection, BrowseNode, Capabilities, ClientError, ClientFactory, ClientResult,
    DataValue, ItemHandle, MonitorRequest, NodeClass, ProtocolClient, StatusCode, ValueCallback,
    Variant, WriteValue,
};

use crate::client::OpcUaClient;
use crate::coerce::{DataType, coerce};
use crate::config::SimulationConfig;
use crate::node_id::{NodeId, OBJECTS, ROOT, TYPES, VIEWS, canonical};

#[derive(Debug, Clone)]
struct SimNode {
    browse_name: String,
    display_name: String,
    class: NodeClass,
    parent: Option<String>,
    children: Vec<String>,
    data_type: Option<DataType>,
    value: Variant,
    writable: bool,
    source_time: DateTime<Utc>,
}

impl SimNode {
    fn object(name: &str, parent: Option<&str>) -> Self {
        Self {
            browse_name: name.to_string(),
            display_name: name.to_string(),
            class: NodeClass::Object,
            parent: parent.map(str::to_string),
            children: Vec::new(),
            data_type: None,
            value: Variant::Null,
            writable: false,
            source_time: Utc::now(),
        }
    }
}

struct Monitor {
    address: String,
    session: u64,
    callback: ValueCallback,
}

/// Nodes and monitored items of one simulated server.
pub struct AddressSpace {
    name: String,
    nodes: RwLock<HashMap<String, SimNode>>,
    monitors: Mutex<HashMap<ItemHandle, Monitor>>,
    next_handle: AtomicU64,
    next_session: AtomicU64,
    online: AtomicBool,
    epoch: AtomicU64,
}

impl AddressSpace {
    /// A server with the standard Root, Objects, Types and Views folders.
    pub fn new(name: impl Into<String>) -> Self {
        let mut nodes = HashMap::new();
        let mut root = SimNode::object("Root", None);
        for (id, folder) in [(OBJECTS, "Objects"), (TYPES, "Types"), (VIEWS, "Views")] {
            root.children.push(id.to_string());
            nodes.insert(id.to_string(), SimNode::object(folder, Some(ROOT)));
        }
        nodes.insert(ROOT.to_string(), root);

        Self {
            name: name.into(),
            nodes: RwLock::new(nodes),
            monitors: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            next_session: AtomicU64::new(1),
            online: AtomicBool::new(true),
            epoch: AtomicU64::new(0),
        }
    }

    /// Build a server holding the configured variables.
    pub fn from_config(name: impl Into<String>, config: &SimulationConfig) -> ClientResult<Self> {
        let space = Self::new(name);
        for variable in &config.variables {
            let value = Variant::from_json(variable.value.clone());
            space.add_variable(
                config.namespace,
                &variable.path,
                variable.data_type,
                value,
                variable.writable,
            )?;
        }
        Ok(space)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a variable below Objects, creating the folders on its path.
    ///
    /// Node ids are `ns=<namespace>;s=<path with dots>`. Returns the variable's node id.
    pub fn add_variable(
        &self,
        namespace: u16,
        path: &str,
        data_type: DataType,
        value: Variant,
        writable: bool,
    ) -> ClientResult<String> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((name, folders)) = segments.split_last() else {
            return Err(ClientError::InvalidAddress(path.to_string()));
        };

        let value = if value.is_null() {
            Variant::Null
        } else {
            coerce(&value, data_type)?
        };

        let mut nodes = self.nodes.write();
        let mut parent = OBJECTS.to_string();
        for depth in 0..folders.len() {
            let id = NodeId::string(namespace, folders[..=depth].join(".")).to_string();
            if !nodes.contains_key(&id) {
                nodes.insert(id.clone(), SimNode::object(folders[depth], Some(&parent)));
                if let Some(p) = nodes.get_mut(&parent) {
                    p.children.push(id.clone());
                }
            }
            parent = id;
        }

        let id = NodeId::string(namespace, segments.join(".")).to_string();
        if nodes.contains_key(&id) {
            return Err(ClientError::InvalidAddress(format!("{id} already exists")));
        }
        nodes.insert(
            id.clone(),
            SimNode {
                browse_name: name.to_string(),
                display_name: name.to_string(),
                class: NodeClass::Variable,
                parent: Some(parent.clone()),
                children: Vec::new(),
                data_type: Some(data_type),
                value,
                writable,
                source_time: Utc::now(),
            },
        );
        if let Some(p) = nodes.get_mut(&parent) {
            p.children.push(id.clone());
        }
        Ok(id)
    }

    /// Add a non-hierarchical reference, so `to` is also listed as a child of `from`.
    pub fn add_reference(&self, from: &str, to: &str) -> ClientResult<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(to) {
            return Err(ClientError::UnknownNode(to.to_string()));
        }
        let node = nodes
            .get_mut(from)
            .ok_or_else(|| ClientError::UnknownNode(from.to_string()))?;
        node.children.push(to.to_string());
        Ok(())
    }

    /// Change a value on the server side and notify monitored items.
    pub fn set_value(&self, address: &str, value: Variant) -> ClientResult<()> {
        let address = canonical(address).map_err(|_| ClientError::InvalidAddress(address.to_string()))?;
        let data_value = {
            let mut nodes = self.nodes.write();
            let node = nodes
                .get_mut(&address)
                .filter(|n| n.class == NodeClass::Variable)
                .ok_or_else(|| ClientError::UnknownNode(address.clone()))?;
            node.value = value;
            node.source_time = Utc::now();
            current(node)
        };
        self.notify(&address, data_value);
        Ok(())
    }

    pub fn value(&self, address: &str) -> Option<Variant> {
        let address = canonical(address).ok()?;
        self.nodes.read().get(&address).map(|n| n.value.clone())
    }

    /// Number of live monitored items.
    pub fn monitor_count(&self) -> usize {
        self.monitors.lock().len()
    }

    /// Take the server down. Existing sessions die and connects fail until
    /// [`go_online`](Self::go_online).
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.drop_sessions();
    }

    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    /// Kill every session while staying reachable, as a server restart would.
    pub fn drop_sessions(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.monitors.lock().clear();
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn notify(&self, address: &str, value: DataValue) {
        let callbacks: Vec<ValueCallback> = self
            .monitors
            .lock()
            .values()
            .filter(|m| m.address == address)
            .map(|m| m.callback.clone())
            .collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    fn browse(&self, node: &str, direction: BrowseDirection) -> ClientResult<Vec<BrowseNode>> {
        let nodes = self.nodes.read();
        let start = nodes
            .get(node)
            .ok_or_else(|| ClientError::UnknownNode(node.to_string()))?;

        let targets: Vec<&String> = match direction {
            BrowseDirection::Forward => start.children.iter().collect(),
            BrowseDirection::Inverse => start.parent.iter().collect(),
        };

        Ok(targets
            .into_iter()
            .filter_map(|id| {
                nodes.get(id).map(|n| {
                    BrowseNode::new(id.clone(), n.browse_name.clone(), n.class)
                        .with_display_name(n.display_name.clone())
                })
            })
            .collect())
    }

    fn read(&self, address: &str) -> DataValue {
        let Ok(address) = canonical(address) else {
            return DataValue::bad(StatusCode::BAD_NODE_ID_INVALID);
        };
        match self.nodes.read().get(&address) {
            Some(node) if node.class == NodeClass::Variable => current(node),
            Some(_) => DataValue::bad(StatusCode::BAD_NOT_SUPPORTED),
            None => DataValue::bad(StatusCode::BAD_NODE_ID_UNKNOWN),
        }
    }

    fn write(&self, write: &WriteValue) -> StatusCode {
        let Ok(address) = canonical(&write.address) else {
            return StatusCode::BAD_NODE_ID_INVALID;
        };
        let data_value = {
            let mut nodes = self.nodes.write();
            let Some(node) = nodes.get_mut(&address) else {
                return StatusCode::BAD_NODE_ID_UNKNOWN;
            };
            if node.class != NodeClass::Variable || !node.writable {
                return StatusCode::BAD_NOT_WRITABLE;
            }
            if !node.data_type.is_some_and(|t| t.accepts(&write.value)) {
                return StatusCode::BAD_TYPE_MISMATCH;
            }
            node.value = write.value.clone();
            node.source_time = write.source_time.unwrap_or_else(Utc::now);
            current(node)
        };
        self.notify(&address, data_value);
        StatusCode::GOOD
    }

    fn monitor(&self, session: u64, request: MonitorRequest) -> ClientResult<ItemHandle> {
        let address = canonical(&request.address)
            .map_err(|_| ClientError::InvalidAddress(request.address.clone()))?;
        let initial = match self.nodes.read().get(&address) {
            Some(node) if node.class == NodeClass::Variable => current(node),
            Some(_) => return Err(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED)),
            None => return Err(ClientError::UnknownNode(address)),
        };

        let handle = ItemHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let callback = request.on_change.clone();
        self.monitors.lock().insert(
            handle,
            Monitor {
                address,
                session,
                callback: request.on_change,
            },
        );
        callback(initial);
        Ok(handle)
    }

    fn data_type(&self, address: &str) -> ClientResult<DataType> {
        let address = canonical(address).map_err(|_| ClientError::InvalidAddress(address.to_string()))?;
        let nodes = self.nodes.read();
        let node = nodes
            .get(&address)
            .ok_or_else(|| ClientError::UnknownNode(address.clone()))?;
        node.data_type
            .ok_or(ClientError::Status(StatusCode::BAD_NOT_SUPPORTED))
    }
}

fn current(node: &SimNode) -> DataValue {
    DataValue::good(node.value.clone())
        .with_source_time(node.source_time)
        .with_server_time(Utc::now())
}

/// A session with an [`AddressSpace`].
pub struct SimClient {
    space: Arc<AddressSpace>,
    session: u64,
    epoch: AtomicU64,
    connected: AtomicBool,
}

impl SimClient {
    pub fn new(space: Arc<AddressSpace>) -> Self {
        let session = space.next_session.fetch_add(1, Ordering::SeqCst);
        Self {
            space,
            session,
            epoch: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    fn node(address: &str) -> ClientResult<String> {
        canonical(address).map_err(|_| ClientError::InvalidAddress(address.to_string()))
    }
}

#[async_trait]
impl ProtocolClient for SimClient {
    async fn connect(&self) -> ClientResult<()> {
        if !self.space.is_online() {
            return Err(ClientError::Connect(format!(
                "server '{}' is not reachable",
                self.space.name
            )));
        }
        self.epoch.store(self.space.epoch(), Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.space
            .monitors
            .lock()
            .retain(|_, m| m.session != self.session);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.space.is_online()
            && self.epoch.load(Ordering::SeqCst) == self.space.epoch()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            browse: true,
            read: true,
            write: true,
            subscribe: true,
        }
    }

    async fn browse_children(
        &self,
        node: &str,
        direction: BrowseDirection,
    ) -> ClientResult<Vec<BrowseNode>> {
        self.ensure_connected()?;
        self.space.browse(&Self::node(node)?, direction)
    }

    async fn read_values(&self, addresses: &[String]) -> ClientResult<Vec<DataValue>> {
        self.ensure_connected()?;
        Ok(addresses.iter().map(|a| self.space.read(a)).collect())
    }

    async fn write_values(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        self.ensure_connected()?;
        Ok(values.iter().map(|v| self.space.write(v)).collect())
    }

    async fn subscribe(
        &self,
        requests: Vec<MonitorRequest>,
    ) -> ClientResult<Vec<ClientResult<ItemHandle>>> {
        self.ensure_connected()?;
        Ok(requests
            .into_iter()
            .map(|r| self.space.monitor(self.session, r))
            .collect())
    }

    async fn unsubscribe(&self, handles: &[ItemHandle]) -> ClientResult<()> {
        self.ensure_connected()?;
        let mut monitors = self.space.monitors.lock();
        for handle in handles {
            monitors.remove(handle);
        }
        Ok(())
    }
}

#[async_trait]
impl OpcUaClient for SimClient {
    async fn data_type(&self, address: &str) -> ClientResult<DataType> {
        self.ensure_connected()?;
        self.space.data_type(address)
    }

    fn server_info(&self) -> serde_json::Value {
        serde_json::json!({
            "Server": [format!("sim://{}", self.space.name)],
            "Session": self.session,
            "ServerStatus": if self.is_connected() { "Running" } else { "Unknown" },
        })
    }
}

/// Creates sessions on a simulated server.
pub struct SimClientFactory {
    endpoint: String,
    space: Arc<AddressSpace>,
}

impl SimClientFactory {
    pub fn new(endpoint: impl Into<String>, space: Arc<AddressSpace>) -> Self {
        Self {
            endpoint: endpoint.into(),
            space,
        }
    }
}

#[async_trait]
impl ClientFactory<SimClient> for SimClientFactory {
    async fn create(&self) -> ClientResult<Arc<SimClient>> {
        match self.endpoint.strip_prefix("sim://") {
            Some(name) if name == self.space.name => Ok(Arc::new(SimClient::new(self.space.clone()))),
            Some(name) => Err(ClientError::InvalidEndpoint(format!(
                "no simulated server named '{name}'"
            ))),
            None => Err(ClientError::InvalidEndpoint(format!(
                "unsupported endpoint '{}'",
                self.endpoint
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plant() -> Arc<AddressSpace> {
        let space = AddressSpace::new("plant");
        space
            .add_variable(2, "Line1/Temperature", DataType::Double, Variant::Float(20.0), true)
            .unwrap();
        space
            .add_variable(2, "Line1/Running", DataType::Boolean, Variant::Boolean(true), false)
            .unwrap();
        Arc::new(space)
    }

    async fn connected(space: &Arc<AddressSpace>) -> SimClient {
        let client = SimClient::new(space.clone());
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_folders_created_on_path() {
        let space = plant();
        let client = connected(&space).await;

        let objects = client
            .browse_children(OBJECTS, BrowseDirection::Forward)
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].address, "ns=2;s=Line1");
        assert_eq!(objects[0].class, NodeClass::Object);

        let line = client
            .browse_children("ns=2;s=Line1", BrowseDirection::Forward)
            .await
            .unwrap();
        let names: Vec<_> = line.iter().map(|n| n.browse_name.as_str()).collect();
        assert_eq!(names, vec!["Temperature", "Running"]);

        let parent = client
            .browse_children("ns=2;s=Line1", BrowseDirection::Inverse)
            .await
            .unwrap();
        assert_eq!(parent[0].address, OBJECTS);
    }

    #[tokio::test]
    async fn test_write_status_codes() {
        let space = plant();
        let client = connected(&space).await;

        let statuses = client
            .write_values(&[
                WriteValue::new("ns=2;s=Line1.Temperature", Variant::Float(21.5)),
                WriteValue::new("ns=2;s=Line1.Running", Variant::Boolean(false)),
                WriteValue::new("ns=2;s=Line1.Temperature", Variant::String("hot".into())),
                WriteValue::new("ns=2;s=Nope", Variant::Int(1)),
                WriteValue::new("bogus", Variant::Int(1)),
            ])
            .await
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                StatusCode::GOOD,
                StatusCode::BAD_NOT_WRITABLE,
                StatusCode::BAD_TYPE_MISMATCH,
                StatusCode::BAD_NODE_ID_UNKNOWN,
                StatusCode::BAD_NODE_ID_INVALID,
            ]
        );
        assert_eq!(space.value("ns=2;s=Line1.Temperature"), Some(Variant::Float(21.5)));
    }

    #[tokio::test]
    async fn test_monitor_sends_initial_and_changes() {
        let space = plant();
        let client = connected(&space).await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let handles = client
            .subscribe(vec![MonitorRequest {
                address: "ns=2;s=Line1.Temperature".into(),
                parameters: Default::default(),
                on_change: Arc::new(move |v: DataValue| sink.lock().push(v.value)),
            }])
            .await
            .unwrap();
        assert!(handles[0].is_ok());

        space
            .set_value("ns=2;s=Line1.Temperature", Variant::Float(30.0))
            .unwrap();
        assert_eq!(*seen.lock(), vec![Variant::Float(20.0), Variant::Float(30.0)]);

        client.disconnect().await.unwrap();
        assert_eq!(space.monitor_count(), 0);
    }

    #[tokio::test]
    async fn test_session_loss() {
        let space = plant();
        let client = connected(&space).await;
        assert!(client.is_connected());

        space.drop_sessions();
        assert!(!client.is_connected());
        assert_eq!(
            client.read_values(&["i=85".into()]).await.unwrap_err(),
            ClientError::NotConnected
        );

        space.go_offline();
        let fresh = SimClient::new(space.clone());
        assert!(matches!(fresh.connect().await, Err(ClientError::Connect(_))));
        space.go_online();
        fresh.connect().await.unwrap();
    }

    #[tokio::test]
    async fn test_factory_endpoints() {
        let space = plant();
        assert!(SimClientFactory::new("sim://plant", space.clone()).create().await.is_ok());
        assert!(matches!(
            SimClientFactory::new("sim://other", space.clone()).create().await,
            Err(ClientError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            SimClientFactory::new("opc.tcp://localhost:4840", space).create().await,
            Err(ClientError::InvalidEndpoint(_))
        ));
    }
}
