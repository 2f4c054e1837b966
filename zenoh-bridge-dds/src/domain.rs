//! DDS domain participation.
//!
//! [`LoopbackDomain`] is an in-process domain: samples written to a topic are
//! delivered to every reader of that topic, including the writer's own.
//! [`DdsParticipant`] joins a domain through the common client interface, with
//! addresses of the form `<type id>/<topic name>`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use fieldgate_driver_framework::{
    Capabilities, ClientError, ClientFactory, ClientResult, DataValue, ItemHandle, MonitorRequest,
    ProtocolClient, StatusCode, Variant, WriteValue,
};

use crate::types::TypeRegistry;

/// A topic address: the configured type id and the DDS topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAddress {
    pub type_id: String,
    pub topic_name: String,
}

impl TopicAddress {
    pub fn parse(address: &str) -> ClientResult<Self> {
        match address.split_once('/') {
            Some((type_id, topic_name)) if !type_id.is_empty() && !topic_name.is_empty() => {
                Ok(Self {
                    type_id: type_id.to_string(),
                    topic_name: topic_name.to_string(),
                })
            }
            _ => Err(ClientError::InvalidAddress(format!(
                "{}: expected <type id>/<topic name>",
                address
            ))),
        }
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_id, self.topic_name)
    }
}

/// One received sample.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Vec<u8>,
    pub source_time: DateTime<Utc>,
}

type SampleListener = Arc<dyn Fn(&Sample) + Send + Sync>;

struct DomainTopic {
    type_name: String,
    readers: HashMap<u64, SampleListener>,
}

pub struct LoopbackDomain {
    id: u32,
    topics: RwLock<HashMap<String, DomainTopic>>,
    next_reader: AtomicU64,
    online: AtomicBool,
    /// Bumped when the domain restarts; participants of an older generation are gone.
    generation: AtomicU64,
}

impl LoopbackDomain {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            topics: RwLock::new(HashMap::new()),
            next_reader: AtomicU64::new(1),
            online: AtomicBool::new(true),
            generation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Create a topic, or check the type of an existing one.
    pub fn create_topic(&self, name: &str, type_name: &str) -> ClientResult<()> {
        let mut topics = self.topics.write();
        match topics.get(name) {
            Some(topic) if topic.type_name != type_name => Err(ClientError::TypeMismatch(format!(
                "topic '{}' has type '{}', not '{}'",
                name, topic.type_name, type_name
            ))),
            Some(_) => Ok(()),
            None => {
                topics.insert(
                    name.to_string(),
                    DomainTopic {
                        type_name: type_name.to_string(),
                        readers: HashMap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    fn add_reader(&self, topic: &str, listener: SampleListener) -> ClientResult<u64> {
        let mut topics = self.topics.write();
        let topic = topics
            .get_mut(topic)
            .ok_or_else(|| ClientError::UnknownNode(topic.to_string()))?;
        let id = self.next_reader.fetch_add(1, Ordering::SeqCst);
        topic.readers.insert(id, listener);
        Ok(id)
    }

    fn remove_readers(&self, ids: &HashSet<u64>) {
        for topic in self.topics.write().values_mut() {
            topic.readers.retain(|id, _| !ids.contains(id));
        }
    }

    /// Write a sample; returns the number of readers it reached.
    pub fn write(
        &self,
        topic: &str,
        type_name: &str,
        data: Vec<u8>,
        source_time: DateTime<Utc>,
    ) -> ClientResult<usize> {
        if !self.is_online() {
            return Err(ClientError::Communication("domain offline".to_string()));
        }
        self.create_topic(topic, type_name)?;

        let listeners: Vec<SampleListener> = self
            .topics
            .read()
            .get(topic)
            .map(|t| t.readers.values().cloned().collect())
            .unwrap_or_default();

        let sample = Sample { data, source_time };
        for listener in &listeners {
            listener(&sample);
        }
        Ok(listeners.len())
    }

    pub fn reader_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, |t| t.readers.len())
    }

    /// Simulate a network partition: all readers are lost.
    pub fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        for topic in self.topics.write().values_mut() {
            topic.readers.clear();
        }
    }

    pub fn go_online(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// A participant in a [`LoopbackDomain`].
pub struct DdsParticipant {
    domain: Arc<LoopbackDomain>,
    types: Arc<TypeRegistry>,
    connected: AtomicBool,
    generation: AtomicU64,
    registered: RwLock<HashSet<String>>,
    readers: Mutex<HashSet<u64>>,
}

impl DdsParticipant {
    pub fn new(domain: Arc<LoopbackDomain>, types: Arc<TypeRegistry>) -> Self {
        Self {
            domain,
            types,
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            registered: RwLock::new(HashSet::new()),
            readers: Mutex::new(HashSet::new()),
        }
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Type name for an address, if its type id is configured and registered.
    fn type_name(&self, address: &TopicAddress) -> ClientResult<String> {
        let support = self
            .types
            .get(&address.type_id)
            .ok_or_else(|| ClientError::InvalidAddress(format!("unknown type id '{}'", address.type_id)))?;
        let type_name = support.type_name().to_string();
        if !self.registered.read().contains(&type_name) {
            return Err(ClientError::TypeMismatch(format!("type '{}' not registered", type_name)));
        }
        Ok(type_name)
    }

    fn create_reader(&self, request: MonitorRequest) -> ClientResult<ItemHandle> {
        let address = TopicAddress::parse(&request.address)?;
        let type_name = self.type_name(&address)?;
        self.domain.create_topic(&address.topic_name, &type_name)?;

        let on_change = request.on_change;
        let listener: SampleListener = Arc::new(move |sample: &Sample| {
            on_change(DataValue::good(Variant::Bytes(sample.data.clone())).with_source_time(sample.source_time));
        });
        let id = self.domain.add_reader(&address.topic_name, listener)?;
        self.readers.lock().insert(id);
        tracing::debug!(topic = %address.topic_name, type_name = %type_name, reader = id, "Data reader created");
        Ok(ItemHandle(id))
    }

    fn write_sample(&self, write: &WriteValue) -> ClientResult<()> {
        let address = TopicAddress::parse(&write.address)?;
        let type_name = self.type_name(&address)?;
        let Variant::Bytes(data) = &write.value else {
            return Err(ClientError::TypeMismatch("samples are written encoded".to_string()));
        };
        let source_time = write.source_time.unwrap_or_else(Utc::now);
        let delivered = self
            .domain
            .write(&address.topic_name, &type_name, data.clone(), source_time)?;
        tracing::trace!(topic = %address.topic_name, delivered, "Sample written");
        Ok(())
    }
}

#[async_trait]
impl ProtocolClient for DdsParticipant {
    async fn connect(&self) -> ClientResult<()> {
        if !self.domain.is_online() {
            return Err(ClientError::Connect(format!("domain {} unreachable", self.domain.id())));
        }

        let mut registered = self.registered.write();
        for type_name in self.types.type_names() {
            tracing::info!(domain = self.domain.id(), type_name = %type_name, "Registered type");
            registered.insert(type_name);
        }
        drop(registered);

        self.generation.store(self.domain.generation(), Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> ClientResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        let readers = std::mem::take(&mut *self.readers.lock());
        self.domain.remove_readers(&readers);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
            && self.domain.is_online()
            && self.generation.load(Ordering::SeqCst) == self.domain.generation()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            browse: false,
            read: false,
            write: true,
            subscribe: true,
        }
    }

    async fn write_values(&self, values: &[WriteValue]) -> ClientResult<Vec<StatusCode>> {
        self.ensure_connected()?;
        let mut statuses = Vec::with_capacity(values.len());
        for write in values {
            match self.write_sample(write) {
                Ok(()) => statuses.push(StatusCode::GOOD),
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => {
                    tracing::debug!(address = %write.address, error = %e, "Sample rejected");
                    statuses.push(e.status());
                }
            }
        }
        Ok(statuses)
    }

    async fn subscribe(
        &self,
        requests: Vec<MonitorRequest>,
    ) -> ClientResult<Vec<ClientResult<ItemHandle>>> {
        self.ensure_connected()?;
        Ok(requests
            .into_iter()
            .map(|request| self.create_reader(request))
            .collect())
    }

    async fn unsubscribe(&self, handles: &[ItemHandle]) -> ClientResult<()> {
        let ids: HashSet<u64> = handles.iter().map(|h| h.0).collect();
        self.readers.lock().retain(|id| !ids.contains(id));
        self.domain.remove_readers(&ids);
        Ok(())
    }
}

/// Creates participants of one domain.
pub struct DdsParticipantFactory {
    domain: Arc<LoopbackDomain>,
    types: Arc<TypeRegistry>,
}

impl DdsParticipantFactory {
    pub fn new(domain: Arc<LoopbackDomain>, types: Arc<TypeRegistry>) -> Self {
        Self { domain, types }
    }
}

#[async_trait]
impl ClientFactory<DdsParticipant> for DdsParticipantFactory {
    async fn create(&self) -> ClientResult<Arc<DdsParticipant>> {
        Ok(Arc::new(DdsParticipant::new(self.domain.clone(), self.types.clone())))
    }
}
