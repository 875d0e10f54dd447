// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process cluster implementing every collaborator trait.
//!
//! Used for tests, dry runs, and embedding the orchestrator without a broker.
//! One [`InMemoryCluster`] plays both the admin and the data-plane role for a
//! cluster; [`InMemoryConnector`] maps `broker_host` to a cluster so the normal
//! [`SyncOrchestrator::connect`](crate::SyncOrchestrator::connect) path works.
//!
//! Message ids are the decimal index of the message in its topic log.
//!
//! # Fault Injection
//!
//! [`Faults`] toggles listing failures, write outages, write latency, and
//! open failures at runtime so chaos tests can break a cluster mid-flight.

use crate::client::{
    AdminClient, BoxFuture, ClientError, ClientErrorKind, ClientResult, ClusterConnection,
    ClusterConnector, DataClient, Message, MessageId, MessageReader, MessageWriter, StartPosition,
};
use crate::config::ClusterConfig;
use crate::entity::PARTITION_MARKER;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Split `persistent://t1/ns1/topicA` into `("t1/ns1", "topicA")`.
fn split_topic(topic: &str) -> Option<(&str, &str)> {
    let (_, rest) = topic.split_once("://")?;
    rest.rsplit_once('/')
}

/// Runtime-adjustable failure modes.
#[derive(Debug, Default)]
pub struct Faults {
    fail_listings: AtomicBool,
    fail_creates: AtomicBool,
    write_outage: AtomicBool,
    fail_next_writes: AtomicUsize,
    fail_next_opens: AtomicUsize,
    stall_next_opens: AtomicUsize,
    write_delay_ms: AtomicU64,
}

impl Faults {
    /// Every `list_*` call fails with `Unavailable` while set.
    pub fn set_fail_listings(&self, on: bool) {
        self.fail_listings.store(on, Ordering::SeqCst);
    }

    /// Every `create_*` call fails with `Unavailable` while set.
    pub fn set_fail_creates(&self, on: bool) {
        self.fail_creates.store(on, Ordering::SeqCst);
    }

    /// Every write fails with `Unavailable` while set.
    pub fn set_write_outage(&self, on: bool) {
        self.write_outage.store(on, Ordering::SeqCst);
    }

    /// The next `n` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next_writes.store(n, Ordering::SeqCst);
    }

    /// The next `n` reader / writer opens fail with `Unavailable`.
    pub fn fail_next_opens(&self, n: usize) {
        self.fail_next_opens.store(n, Ordering::SeqCst);
    }

    /// The next `n` reader or writer opens never complete.
    pub fn stall_next_opens(&self, n: usize) {
        self.stall_next_opens.store(n, Ordering::SeqCst);
    }

    /// Delay every write by `delay` before it is applied.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct TopicLog {
    messages: Mutex<Vec<Message>>,
    partitions: u32,
    version: watch::Sender<u64>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            messages: Mutex::new(Vec::new()),
            partitions,
            version,
        }
    }

    fn append(&self, mut message: Message) -> MessageId {
        let id = {
            let mut messages = lock(&self.messages);
            let id = MessageId::new(messages.len().to_string());
            message.id = id.clone();
            messages.push(message);
            id
        };
        self.version.send_modify(|v| *v += 1);
        id
    }

    fn get(&self, index: usize) -> Option<Message> {
        lock(&self.messages).get(index).cloned()
    }

    fn len(&self) -> usize {
        lock(&self.messages).len()
    }
}

struct ClusterState {
    name: String,
    tenants: Mutex<BTreeSet<String>>,
    namespaces: Mutex<BTreeSet<String>>,
    topics: Mutex<BTreeMap<String, Arc<TopicLog>>>,
    acked: Mutex<HashMap<String, Vec<MessageId>>>,
    faults: Faults,
    open_readers: AtomicUsize,
    open_writers: AtomicUsize,
    opened_readers: AtomicUsize,
    opened_writers: AtomicUsize,
    listing_calls: AtomicUsize,
}

/// An in-memory cluster. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct InMemoryCluster {
    state: Arc<ClusterState>,
}

impl InMemoryCluster {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(ClusterState {
                name: name.into(),
                tenants: Mutex::new(BTreeSet::new()),
                namespaces: Mutex::new(BTreeSet::new()),
                topics: Mutex::new(BTreeMap::new()),
                acked: Mutex::new(HashMap::new()),
                faults: Faults::default(),
                open_readers: AtomicUsize::new(0),
                open_writers: AtomicUsize::new(0),
                opened_readers: AtomicUsize::new(0),
                opened_writers: AtomicUsize::new(0),
                listing_calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn faults(&self) -> &Faults {
        &self.state.faults
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    pub fn add_tenant(&self, tenant: &str) {
        lock(&self.state.tenants).insert(tenant.to_string());
    }

    /// Add `tenant/namespace`, creating the tenant if needed.
    pub fn add_namespace(&self, namespace: &str) {
        if let Some((tenant, _)) = namespace.split_once('/') {
            self.add_tenant(tenant);
        }
        lock(&self.state.namespaces).insert(namespace.to_string());
    }

    /// Add a non-partitioned topic by full name, creating its namespace if needed.
    pub fn add_topic(&self, topic: &str) {
        self.add_partitioned_topic(topic, 0);
    }

    /// Add a logical topic with `partitions` shards. Listings report the
    /// logical name and one `-partition-N` name per shard.
    pub fn add_partitioned_topic(&self, topic: &str, partitions: u32) {
        if let Some((namespace, _)) = split_topic(topic) {
            self.add_namespace(namespace);
        }
        lock(&self.state.topics)
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(TopicLog::new(partitions)));
    }

    /// Remove a topic from listings. Open handles keep working.
    pub fn remove_topic(&self, topic: &str) {
        lock(&self.state.topics).remove(topic);
    }

    /// Append a message to `topic`, creating the topic if needed.
    pub fn publish(&self, topic: &str, payload: impl Into<Vec<u8>>) -> MessageId {
        self.publish_message(topic, Message::new(MessageId::new(""), payload))
    }

    pub fn publish_message(&self, topic: &str, message: Message) -> MessageId {
        self.add_topic(topic);
        self.topic_log(topic)
            .map(|log| log.append(message))
            .unwrap_or_else(|| MessageId::new(""))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    pub fn has_tenant(&self, tenant: &str) -> bool {
        lock(&self.state.tenants).contains(tenant)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        lock(&self.state.namespaces).contains(namespace)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        lock(&self.state.topics).contains_key(topic)
    }

    pub fn topic_partitions(&self, topic: &str) -> Option<u32> {
        self.topic_log(topic).map(|log| log.partitions)
    }

    /// Every message currently in `topic`, in log order.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.topic_log(topic)
            .map(|log| lock(&log.messages).clone())
            .unwrap_or_default()
    }

    pub fn payloads(&self, topic: &str) -> Vec<Vec<u8>> {
        self.messages(topic).into_iter().map(|m| m.payload).collect()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        self.topic_log(topic).map(|log| log.len()).unwrap_or(0)
    }

    /// Ids acknowledged on `topic`, in acknowledgement order.
    pub fn acked(&self, topic: &str) -> Vec<MessageId> {
        lock(&self.state.acked).get(topic).cloned().unwrap_or_default()
    }

    /// Readers opened and not yet closed.
    pub fn open_readers(&self) -> usize {
        self.state.open_readers.load(Ordering::SeqCst)
    }

    /// Writers opened and not yet closed.
    pub fn open_writers(&self) -> usize {
        self.state.open_writers.load(Ordering::SeqCst)
    }

    /// Readers ever opened.
    pub fn readers_opened(&self) -> usize {
        self.state.opened_readers.load(Ordering::SeqCst)
    }

    /// Writers ever opened.
    pub fn writers_opened(&self) -> usize {
        self.state.opened_writers.load(Ordering::SeqCst)
    }

    /// `list_*` calls served, failed ones included.
    pub fn listing_calls(&self) -> usize {
        self.state.listing_calls.load(Ordering::SeqCst)
    }

    fn topic_log(&self, topic: &str) -> Option<Arc<TopicLog>> {
        lock(&self.state.topics).get(topic).cloned()
    }

    fn check_listing(&self) -> ClientResult<()> {
        self.state.listing_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.faults.fail_listings.load(Ordering::SeqCst) {
            return Err(ClientError::unavailable(format!("{}: admin unavailable", self.state.name)));
        }
        Ok(())
    }

    fn check_create(&self) -> ClientResult<()> {
        if self.state.faults.fail_creates.load(Ordering::SeqCst) {
            return Err(ClientError::unavailable(format!("{}: admin unavailable", self.state.name)));
        }
        Ok(())
    }

    async fn check_open(&self) -> ClientResult<()> {
        if Faults::take_one(&self.state.faults.stall_next_opens) {
            std::future::pending::<()>().await;
        }
        if Faults::take_one(&self.state.faults.fail_next_opens) {
            return Err(ClientError::unavailable(format!("{}: broker unavailable", self.state.name)));
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCluster").field("name", &self.state.name).finish()
    }
}

impl AdminClient for InMemoryCluster {
    fn list_tenants(&self) -> BoxFuture<'_, Vec<String>> {
        Box::pin(async move {
            self.check_listing()?;
            Ok(lock(&self.state.tenants).iter().cloned().collect())
        })
    }

    fn list_namespaces(&self, tenant: &str) -> BoxFuture<'_, Vec<String>> {
        let tenant = tenant.to_string();
        Box::pin(async move {
            self.check_listing()?;
            if !self.has_tenant(&tenant) {
                return Err(ClientError::new(ClientErrorKind::NotFound, format!("tenant {}", tenant)));
            }
            let prefix = format!("{}/", tenant);
            Ok(lock(&self.state.namespaces)
                .iter()
                .filter(|ns| ns.starts_with(&prefix))
                .cloned()
                .collect())
        })
    }

    fn list_topics(&self, namespace: &str) -> BoxFuture<'_, Vec<String>> {
        let namespace = namespace.to_string();
        Box::pin(async move {
            self.check_listing()?;
            if !self.has_namespace(&namespace) {
                return Err(ClientError::new(
                    ClientErrorKind::NotFound,
                    format!("namespace {}", namespace),
                ));
            }
            let topics = lock(&self.state.topics);
            let mut listed = Vec::new();
            for (name, log) in topics.iter() {
                if split_topic(name).map(|(ns, _)| ns) != Some(namespace.as_str()) {
                    continue;
                }
                listed.push(name.clone());
                for partition in 0..log.partitions {
                    listed.push(format!("{}{}{}", name, PARTITION_MARKER, partition));
                }
            }
            Ok(listed)
        })
    }

    fn create_tenant(&self, tenant: &str) -> BoxFuture<'_, ()> {
        let tenant = tenant.to_string();
        Box::pin(async move {
            self.check_create()?;
            if !lock(&self.state.tenants).insert(tenant.clone()) {
                return Err(ClientError::new(ClientErrorKind::AlreadyExists, format!("tenant {}", tenant)));
            }
            Ok(())
        })
    }

    fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, ()> {
        let namespace = namespace.to_string();
        Box::pin(async move {
            self.check_create()?;
            let tenant = namespace.split_once('/').map(|(t, _)| t).unwrap_or_default();
            if !self.has_tenant(tenant) {
                return Err(ClientError::new(ClientErrorKind::NotFound, format!("tenant {}", tenant)));
            }
            if !lock(&self.state.namespaces).insert(namespace.clone()) {
                return Err(ClientError::new(
                    ClientErrorKind::AlreadyExists,
                    format!("namespace {}", namespace),
                ));
            }
            Ok(())
        })
    }

    fn partition_count(&self, topic: &str) -> BoxFuture<'_, u32> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.topic_partitions(&topic)
                .ok_or_else(|| ClientError::new(ClientErrorKind::NotFound, format!("topic {}", topic)))
        })
    }

    fn create_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, ()> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.check_create()?;
            if self.has_topic(&topic) {
                return Err(ClientError::new(ClientErrorKind::AlreadyExists, format!("topic {}", topic)));
            }
            self.add_partitioned_topic(&topic, partitions);
            Ok(())
        })
    }
}

impl DataClient for InMemoryCluster {
    fn open_reader(&self, topic: &str, start: StartPosition) -> BoxFuture<'_, Arc<dyn MessageReader>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.check_open().await?;
            let log = self
                .topic_log(&topic)
                .ok_or_else(|| ClientError::new(ClientErrorKind::NotFound, format!("topic {}", topic)))?;

            let position = match start {
                StartPosition::Earliest => 0,
                StartPosition::Latest => log.len(),
                StartPosition::After(id) => id.as_str().parse::<usize>().map(|i| i + 1).unwrap_or(0),
            };

            self.state.open_readers.fetch_add(1, Ordering::SeqCst);
            self.state.opened_readers.fetch_add(1, Ordering::SeqCst);
            let reader: Arc<dyn MessageReader> = Arc::new(MemoryReader {
                cluster: self.clone(),
                topic,
                log,
                position: AtomicUsize::new(position),
                closed: AtomicBool::new(false),
            });
            Ok(reader)
        })
    }

    fn open_writer(&self, topic: &str) -> BoxFuture<'_, Arc<dyn MessageWriter>> {
        let topic = topic.to_string();
        Box::pin(async move {
            self.check_open().await?;
            // Topic auto-creation, as brokers do by default
            self.add_topic(&topic);
            let log = self
                .topic_log(&topic)
                .ok_or_else(|| ClientError::new(ClientErrorKind::NotFound, format!("topic {}", topic)))?;

            self.state.open_writers.fetch_add(1, Ordering::SeqCst);
            self.state.opened_writers.fetch_add(1, Ordering::SeqCst);
            let writer: Arc<dyn MessageWriter> = Arc::new(MemoryWriter {
                cluster: self.clone(),
                log,
                closed: AtomicBool::new(false),
            });
            Ok(writer)
        })
    }
}

struct MemoryReader {
    cluster: InMemoryCluster,
    topic: String,
    log: Arc<TopicLog>,
    position: AtomicUsize,
    closed: AtomicBool,
}

impl MessageReader for MemoryReader {
    fn read_next(&self) -> BoxFuture<'_, Message> {
        Box::pin(async move {
            let mut version = self.log.version.subscribe();
            loop {
                if self.closed.load(Ordering::SeqCst) {
                    return Err(ClientError::closed(format!("reader on {}", self.topic)));
                }
                let position = self.position.load(Ordering::SeqCst);
                if let Some(message) = self.log.get(position) {
                    self.position.store(position + 1, Ordering::SeqCst);
                    return Ok(message);
                }
                if version.changed().await.is_err() {
                    return Err(ClientError::closed(format!("topic {} dropped", self.topic)));
                }
            }
        })
    }

    fn acknowledge(&self, id: &MessageId) -> BoxFuture<'_, ()> {
        let id = id.clone();
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::closed(format!("reader on {}", self.topic)));
            }
            lock(&self.cluster.state.acked)
                .entry(self.topic.clone())
                .or_default()
                .push(id);
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.cluster.state.open_readers.fetch_sub(1, Ordering::SeqCst);
                // Wake a pending read_next so it observes the close
                self.log.version.send_modify(|v| *v += 1);
            }
            Ok(())
        })
    }
}

struct MemoryWriter {
    cluster: InMemoryCluster,
    log: Arc<TopicLog>,
    closed: AtomicBool,
}

impl MessageWriter for MemoryWriter {
    fn write<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, MessageId> {
        Box::pin(async move {
            let faults = &self.cluster.state.faults;
            let delay_ms = faults.write_delay_ms.load(Ordering::SeqCst);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(ClientError::closed("writer closed"));
            }
            if faults.write_outage.load(Ordering::SeqCst) || Faults::take_one(&faults.fail_next_writes) {
                return Err(ClientError::unavailable(format!(
                    "{}: write rejected",
                    self.cluster.state.name
                )));
            }
            Ok(self.log.append(message.clone()))
        })
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.cluster.state.open_writers.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        })
    }
}

/// Resolves `broker_host` to a registered [`InMemoryCluster`].
#[derive(Default)]
pub struct InMemoryConnector {
    clusters: DashMap<String, InMemoryCluster>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `cluster` for configs whose `broker_host` is `host`.
    pub fn register(&self, host: impl Into<String>, cluster: InMemoryCluster) {
        self.clusters.insert(host.into(), cluster);
    }
}

impl ClusterConnector for InMemoryConnector {
    fn connect<'a>(&'a self, config: &'a ClusterConfig) -> BoxFuture<'a, ClusterConnection> {
        Box::pin(async move {
            let cluster = self
                .clusters
                .get(&config.broker_host)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    ClientError::unavailable(format!("no cluster reachable at {}", config.admin_url()))
                })?;
            let cluster = Arc::new(cluster);
            Ok(ClusterConnection {
                admin: cluster.clone(),
                client: cluster,
            })
        })
    }
}
