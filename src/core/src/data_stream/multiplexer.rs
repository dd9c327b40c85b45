use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::record::{LineBuffer, RecordLayout};
use super::resource_gate::{GateHandle, ResourceGate};
use super::serial_port::OpenPort;
use crate::dispatch::envelope::ResponseEnvelope;
use crate::error_handling::types::ResourceError;
use crate::session_management::session::{Outbound, Session};

struct Subscriber {
    outbound: Outbound,
    command_uid: Option<Value>,
}

struct Feed {
    generation: u64,
    subscribers: HashMap<Uuid, Subscriber>,
    task: JoinHandle<()>,
}

type FeedTable = Arc<Mutex<HashMap<String, Feed>>>;

fn lock_feeds(feeds: &FeedTable) -> MutexGuard<'_, HashMap<String, Feed>> {
    feeds.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct LayoutTable {
    default: RecordLayout,
    per_port: HashMap<String, RecordLayout>,
}

impl LayoutTable {
    fn layout_for(&self, key: &str) -> RecordLayout {
        self.per_port
            .get(key)
            .unwrap_or(&self.default)
            .clone()
    }
}

/// Shares one reader per open port among every session streaming from it.
///
/// A producer task exists for a port exactly while its subscriber set is non-empty; both are
/// only changed together under the feed table lock. Lock order is feeds, then the port gate.
pub struct StreamMultiplexer {
    feeds: FeedTable,
    ports: Arc<ResourceGate<OpenPort>>,
    layouts: Arc<RwLock<LayoutTable>>,
    poll_interval: Duration,
    next_generation: AtomicU64,
    started_producers: AtomicUsize,
}

impl StreamMultiplexer {
    pub fn new(
        ports: Arc<ResourceGate<OpenPort>>,
        default_layout: RecordLayout,
        poll_interval: Duration,
    ) -> Self {
        Self {
            feeds: Arc::new(Mutex::new(HashMap::new())),
            ports,
            layouts: Arc::new(RwLock::new(LayoutTable {
                default: default_layout,
                per_port: HashMap::new(),
            })),
            poll_interval,
            next_generation: AtomicU64::new(1),
            started_producers: AtomicUsize::new(0),
        }
    }

    pub fn ports(&self) -> &Arc<ResourceGate<OpenPort>> {
        &self.ports
    }

    /// Adds `session` to the feed for `key`, starting the producer if it is the first.
    ///
    /// Data pushes echo `command_uid`. Returns the subscriber count after the call. A closed
    /// session is refused under the feed lock, so it cannot rejoin after `release_session`.
    pub fn subscribe(
        &self,
        session: &Session,
        key: &str,
        command_uid: Option<Value>,
    ) -> Result<usize, ResourceError> {
        let mut feeds = lock_feeds(&self.feeds);
        if !session.is_open() {
            return Err(ResourceError::SubscriberClosed(session.id));
        }
        let subscriber = Subscriber {
            outbound: session.outbound(),
            command_uid,
        };
        let session = session.id;

        match feeds.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let feed = entry.get_mut();
                feed.subscribers.insert(session, subscriber);
                debug!(
                    "Session {} joined stream on {} ({} subscribers)",
                    session,
                    key,
                    feed.subscribers.len()
                );
                Ok(feed.subscribers.len())
            }
            Entry::Vacant(entry) => {
                let port = self
                    .ports
                    .get(key)
                    .ok_or_else(|| ResourceError::NotOpen(key.to_string()))?;
                let handle = self
                    .ports
                    .handle_for(key)
                    .ok_or_else(|| ResourceError::NotOpen(key.to_string()))?;

                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let producer = Producer {
                    key: key.to_string(),
                    generation,
                    port,
                    handle,
                    feeds: Arc::clone(&self.feeds),
                    ports: Arc::clone(&self.ports),
                    layouts: Arc::clone(&self.layouts),
                    poll_interval: self.poll_interval,
                };
                let task = tokio::spawn(producer.run());
                self.started_producers.fetch_add(1, Ordering::Relaxed);
                info!("Started data stream on {} for session {}", key, session);

                let mut subscribers = HashMap::new();
                subscribers.insert(session, subscriber);
                entry.insert(Feed {
                    generation,
                    subscribers,
                    task,
                });
                Ok(1)
            }
        }
    }

    /// Removes `session` from the feed for `key`, stopping the producer when it was the last.
    /// Returns whether the session was subscribed.
    pub fn unsubscribe(&self, session: Uuid, key: &str) -> bool {
        let mut feeds = lock_feeds(&self.feeds);
        let Some(feed) = feeds.get_mut(key) else {
            return false;
        };
        if feed.subscribers.remove(&session).is_none() {
            return false;
        }
        if feed.subscribers.is_empty() {
            if let Some(feed) = feeds.remove(key) {
                feed.task.abort();
                info!("Stopped data stream on {}", key);
            }
        }
        true
    }

    /// Drops every subscription held by `session`. Returns the keys it was removed from.
    pub fn release_session(&self, session: Uuid) -> Vec<String> {
        let mut feeds = lock_feeds(&self.feeds);
        let mut released = Vec::new();

        feeds.retain(|key, feed| {
            if feed.subscribers.remove(&session).is_some() {
                released.push(key.clone());
            }
            if feed.subscribers.is_empty() {
                feed.task.abort();
                info!("Stopped data stream on {}", key);
                false
            } else {
                true
            }
        });
        released.sort();
        released
    }

    /// Stops the feed for `key`, releases the port and tells its subscribers why.
    pub fn close_key(&self, key: &str, reason: &str) -> Result<(), ResourceError> {
        let subscribers = {
            let mut feeds = lock_feeds(&self.feeds);
            let handle = self
                .ports
                .handle_for(key)
                .ok_or_else(|| ResourceError::NotOpen(key.to_string()))?;
            let feed = feeds.remove(key);
            self.ports.release(&handle);
            match feed {
                Some(feed) => {
                    feed.task.abort();
                    feed.subscribers
                }
                None => HashMap::new(),
            }
        };

        info!("Closed port {} ({} subscribers notified)", key, subscribers.len());
        notify(&subscribers, reason);
        Ok(())
    }

    pub fn is_running(&self, key: &str) -> bool {
        lock_feeds(&self.feeds)
            .get(key)
            .map(|feed| !feed.task.is_finished())
            .unwrap_or(false)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        lock_feeds(&self.feeds)
            .get(key)
            .map(|feed| feed.subscribers.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, session: Uuid, key: &str) -> bool {
        lock_feeds(&self.feeds)
            .get(key)
            .map(|feed| feed.subscribers.contains_key(&session))
            .unwrap_or(false)
    }

    /// Producers ever started, for tests and diagnostics.
    pub fn started_producers(&self) -> usize {
        self.started_producers.load(Ordering::Relaxed)
    }

    /// Sets the layout for one port, or the default layout when `key` is `None`.
    pub fn set_layout(&self, key: Option<&str>, layout: RecordLayout) {
        let mut layouts = self.layouts.write().unwrap_or_else(PoisonError::into_inner);
        match key {
            Some(key) => {
                layouts.per_port.insert(key.to_string(), layout);
            }
            None => layouts.default = layout,
        }
    }

    pub fn layout_for(&self, key: &str) -> RecordLayout {
        self.layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .layout_for(key)
    }

    pub fn default_layout(&self) -> RecordLayout {
        self.layouts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .default
            .clone()
    }
}

fn notify(subscribers: &HashMap<Uuid, Subscriber>, message: &str) {
    for (session, subscriber) in subscribers {
        let envelope =
            ResponseEnvelope::error(subscriber.command_uid.clone(), Some(*session), message);
        let _ = subscriber.outbound.send(envelope);
    }
}

struct Producer {
    key: String,
    generation: u64,
    port: Arc<OpenPort>,
    handle: GateHandle,
    feeds: FeedTable,
    ports: Arc<ResourceGate<OpenPort>>,
    layouts: Arc<RwLock<LayoutTable>>,
    poll_interval: Duration,
}

impl Producer {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut lines = LineBuffer::default();

        loop {
            ticker.tick().await;

            let port = Arc::clone(&self.port);
            let chunk = match tokio::task::spawn_blocking(move || port.read_chunk()).await {
                Ok(Ok(chunk)) => chunk,
                Ok(Err(e)) => return self.fail(&e.to_string()),
                Err(e) => return self.fail(&format!("reader task failed: {}", e)),
            };
            if chunk.is_empty() {
                continue;
            }

            let layout = self
                .layouts
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .layout_for(&self.key);

            for line in lines.push(&chunk) {
                match line.and_then(|raw| layout.parse(&raw).map(|record| (raw, record))) {
                    Ok((raw, record)) => self.broadcast_record(raw, record),
                    Err(e) => {
                        debug!("Unparseable data on {}: {}", self.key, e);
                        self.broadcast_error(&format!(
                            "Failed to parse data from {}: {}",
                            self.key, e
                        ));
                    }
                }
            }
        }
    }

    fn broadcast_record(&self, raw: String, record: Map<String, Value>) {
        let mut data = Map::new();
        data.insert("port".to_string(), Value::String(self.key.clone()));
        data.insert("record".to_string(), Value::Object(record));
        data.insert("raw".to_string(), Value::String(raw));
        data.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));

        let feeds = lock_feeds(&self.feeds);
        let Some(feed) = feeds.get(&self.key).filter(|f| f.generation == self.generation) else {
            return;
        };
        for (session, subscriber) in &feed.subscribers {
            let envelope = ResponseEnvelope::success(
                subscriber.command_uid.clone(),
                Some(*session),
                "Data received",
                Some(data.clone()),
            );
            let _ = subscriber.outbound.send(envelope);
        }
    }

    fn broadcast_error(&self, message: &str) {
        let feeds = lock_feeds(&self.feeds);
        if let Some(feed) = feeds.get(&self.key).filter(|f| f.generation == self.generation) {
            notify(&feed.subscribers, message);
        }
    }

    /// Detaches this feed after an unrecoverable read error and releases the port.
    fn fail(&self, reason: &str) {
        warn!("Data stream on {} stopped: {}", self.key, reason);
        let subscribers = {
            let mut feeds = lock_feeds(&self.feeds);
            let ours = feeds
                .get(&self.key)
                .map(|f| f.generation == self.generation)
                .unwrap_or(false);
            if !ours {
                return;
            }
            let feed = feeds.remove(&self.key);
            self.ports.release(&self.handle);
            feed.map(|f| f.subscribers).unwrap_or_default()
        };
        notify(
            &subscribers,
            &format!("Port {} disconnected: {}", self.key, reason),
        );
    }
}
