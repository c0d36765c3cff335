//! In-process implementation of [`EventBus`].
//!
//! Records are appended to a per-topic log split into a fixed number of
//! partitions. The partition of a record is a hash of its key, so every
//! record for one flight lands in one partition and is delivered in publish
//! order. Each consumer group spreads the partitions across its live members.
//!
//! A group that subscribes for the first time replays the retained log
//! (`auto.offset.reset = earliest`). Later members of the same group only see
//! new records.
//!
//! Each partition keeps at most its retention limit of records; the oldest
//! are dropped first, like a size-based log retention policy.

use flightfeed_core::event::SerializedEvent;
use flightfeed_core::event_bus::{BusFuture, EventBus, EventBusError, EventStream};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Default partition count, matching the `flight-events` topic in production.
pub const DEFAULT_PARTITIONS: usize = 6;

/// Default number of records retained per partition.
pub const DEFAULT_RETENTION: usize = 10_000;

type Member = mpsc::UnboundedSender<SerializedEvent>;

#[derive(Default)]
struct Topic {
    partitions: Vec<VecDeque<SerializedEvent>>,
    groups: HashMap<String, Vec<Member>>,
}

impl Topic {
    fn with_partitions(count: usize) -> Self {
        Self {
            partitions: vec![VecDeque::new(); count],
            groups: HashMap::new(),
        }
    }
}

/// In-memory event bus with partitions, consumer groups and optional
/// duplicate delivery.
///
/// # Example
///
/// ```
/// use flightfeed_testing::InMemoryEventBus;
/// use flightfeed_core::event_bus::EventBus;
/// use flightfeed_core::event::SerializedEvent;
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["flight-events"], "applier").await?;
///
/// let event = SerializedEvent::new("DELAY".to_string(), b"{}".to_vec());
/// bus.publish("flight-events", "FF101", &event).await?;
///
/// let delivered = stream.next().await.unwrap()?;
/// assert_eq!(delivered.key.as_deref(), Some("FF101"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    partitions: usize,
    retention: usize,
    duplicate_delivery: bool,
    fail_publishes: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Create a bus with [`DEFAULT_PARTITIONS`] partitions per topic.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Create a bus with `partitions` partitions per topic (at least one).
    #[must_use]
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            partitions: partitions.max(1),
            retention: DEFAULT_RETENTION,
            duplicate_delivery: false,
            fail_publishes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Keep at most `records` per partition (at least one).
    #[must_use]
    pub fn with_retention(mut self, records: usize) -> Self {
        self.retention = records.max(1);
        self
    }

    /// Deliver every record twice, to exercise consumer idempotency.
    #[must_use]
    pub const fn with_duplicate_delivery(mut self) -> Self {
        self.duplicate_delivery = true;
        self
    }

    /// Make every subsequent publish fail until switched back off.
    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Partition a key maps to.
    #[must_use]
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // Modulo keeps the value below `partitions`, which is a usize.
        #[allow(clippy::cast_possible_truncation)]
        let partition = (hasher.finish() % self.partitions as u64) as usize;
        partition
    }

    /// Every record retained on `topic`, partition by partition.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.topics
            .lock()
            .get(topic)
            .map(|t| t.partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records retained on `topic`.
    #[must_use]
    pub fn published_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map_or(0, |t| t.partitions.iter().map(VecDeque::len).sum())
    }

    /// Number of live members in `consumer_group` on `topic`.
    #[must_use]
    pub fn member_count(&self, topic: &str, consumer_group: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .and_then(|t| t.groups.get(consumer_group))
            .map_or(0, |members| members.iter().filter(|m| !m.is_closed()).count())
    }

    fn deliver(&self, member: &Member, record: &SerializedEvent) {
        let copies = if self.duplicate_delivery { 2 } else { 1 };
        for _ in 0..copies {
            if member.send(record.clone()).is_err() {
                tracing::trace!("In-memory subscriber went away during delivery");
            }
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("partitions", &self.partitions)
            .field("retention", &self.retention)
            .field("duplicate_delivery", &self.duplicate_delivery)
            .finish_non_exhaustive()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        event: &'a SerializedEvent,
    ) -> BusFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_publishes.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "publishing disabled".to_string(),
                });
            }

            let partition = self.partition_for(key);
            let record = event.clone().with_key(key);

            let mut topics = self.topics.lock();
            let entry = topics
                .entry(topic.to_string())
                .or_insert_with(|| Topic::with_partitions(self.partitions));
            let log = &mut entry.partitions[partition];
            log.push_back(record.clone());
            while log.len() > self.retention {
                log.pop_front();
            }

            for members in entry.groups.values_mut() {
                members.retain(|m| !m.is_closed());
                if members.is_empty() {
                    continue;
                }
                let member = &members[partition % members.len()];
                self.deliver(member, &record);
            }

            tracing::trace!(topic, key, partition, "Published to in-memory bus");
            Ok(())
        })
    }

    fn subscribe<'a>(
        &'a self,
        topics: &'a [&'a str],
        consumer_group: &'a str,
    ) -> BusFuture<'a, EventStream> {
        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics: Vec::new(),
                    reason: "no topics given".to_string(),
                });
            }

            let (sender, mut receiver) = mpsc::unbounded_channel();
            {
                let mut state = self.topics.lock();
                for topic in topics {
                    let entry = state
                        .entry((*topic).to_string())
                        .or_insert_with(|| Topic::with_partitions(self.partitions));
                    let new_group = !entry.groups.contains_key(consumer_group);
                    if new_group {
                        for record in entry.partitions.iter().flatten() {
                            self.deliver(&sender, record);
                        }
                    }
                    entry
                        .groups
                        .entry(consumer_group.to_string())
                        .or_default()
                        .push(sender.clone());
                }
            }

            tracing::debug!(?topics, consumer_group, "Subscribed to in-memory bus");

            let stream = async_stream::stream! {
                while let Some(event) = receiver.recv().await {
                    yield Ok(event);
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
