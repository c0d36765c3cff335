//! Keyed, concurrent event bus consumer with automatic reconnection.
//!
//! # Pattern: Subscribe-Dispatch-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe(topics, group)
//!         for each record:
//!             worker = hash(record.key) % workers
//!             queue[worker].send(record)      ──► worker runs handler serially
//!         stream ended / subscribe failed:
//!             sleep(retry_delay)
//! } until stop()
//! ```
//!
//! Every record with the same key goes to the same worker, and each worker
//! handles its queue one record at a time. Records for one flight are
//! therefore processed in delivery order, while different flights are
//! processed in parallel.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = EventConsumer::builder()
//!     .name("flight-event-applier")
//!     .topics(vec![FLIGHT_EVENTS_TOPIC.to_string()])
//!     .consumer_group("flight-event-applier")
//!     .event_bus(event_bus)
//!     .handler(applier)
//!     .workers(4)
//!     .build()?
//!     .start();
//!
//! // Later
//! handle.stop().await;
//! ```

use crate::error::PipelineError;
use crate::handler::EventHandler;
use flightfeed_core::event::SerializedEvent;
use flightfeed_core::event_bus::EventBus;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_WORKERS: usize = 4;
const WORKER_QUEUE: usize = 256;

/// Event bus consumer.
///
/// Built with [`EventConsumer::builder`] and started with
/// [`start`](Self::start), which hands back a [`ConsumerHandle`].
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    consumer_group: String,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    workers: usize,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Start consuming in the background.
    #[must_use]
    pub fn start(self) -> ConsumerHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let running = Arc::new(AtomicBool::new(true));
        let name = self.name.clone();

        let flag = Arc::clone(&running);
        let task = tokio::spawn(async move {
            self.run(stop_rx).await;
            flag.store(false, Ordering::SeqCst);
        });

        ConsumerHandle {
            name,
            stop_tx,
            running,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(self, mut stop: watch::Receiver<bool>) {
        info!(consumer = %self.name, workers = self.workers, "Event consumer started");

        let (queues, worker_tasks): (Vec<_>, Vec<_>) = (0..self.workers)
            .map(|worker| self.spawn_worker(worker))
            .unzip();
        let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

        'outer: loop {
            let subscribed = tokio::select! {
                _ = stop.changed() => break 'outer,
                result = self.event_bus.subscribe(&topics, &self.consumer_group) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(
                        consumer = %self.name,
                        topics = ?self.topics,
                        group = %self.consumer_group,
                        "Subscribed to event bus"
                    );
                    loop {
                        let next = tokio::select! {
                            _ = stop.changed() => break 'outer,
                            next = stream.next() => next,
                        };
                        match next {
                            Some(Ok(record)) => {
                                let queue = &queues[self.worker_for(&record)];
                                // A full queue must not hold up stop().
                                let sent = tokio::select! {
                                    _ = stop.changed() => break 'outer,
                                    sent = queue.send(record) => sent,
                                };
                                if sent.is_err() {
                                    error!(consumer = %self.name, "Worker queue closed");
                                }
                            }
                            Some(Err(e)) => {
                                error!(
                                    consumer = %self.name,
                                    error = %e,
                                    "Error receiving event from stream"
                                );
                            }
                            None => break,
                        }
                    }
                    warn!(
                        consumer = %self.name,
                        "Event stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                }
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to event bus, retrying in {:?}",
                        self.retry_delay
                    );
                }
            }

            tokio::select! {
                _ = stop.changed() => break 'outer,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        // Closing the queues lets workers drain what they already hold.
        drop(queues);
        for task in worker_tasks {
            if let Err(e) = task.await {
                warn!(consumer = %self.name, error = %e, "Worker task failed");
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    fn spawn_worker(&self, worker: usize) -> (mpsc::Sender<SerializedEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SerializedEvent>(WORKER_QUEUE);
        let handler = Arc::clone(&self.handler);
        let name = self.name.clone();

        let task = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = handler.handle(&record.data).await {
                    error!(
                        consumer = %name,
                        worker,
                        key = record.key.as_deref().unwrap_or("-"),
                        event_type = %record.event_type,
                        error = %e,
                        "Failed to handle event"
                    );
                }
            }
        });
        (tx, task)
    }

    fn worker_for(&self, record: &SerializedEvent) -> usize {
        let Some(key) = record.key.as_deref() else {
            return 0;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)] // result is below `workers`
        let worker = (hasher.finish() % self.workers as u64) as usize;
        worker
    }
}

impl std::fmt::Debug for EventConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventConsumer")
            .field("name", &self.name)
            .field("topics", &self.topics)
            .field("consumer_group", &self.consumer_group)
            .field("workers", &self.workers)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// Control handle for a started [`EventConsumer`].
pub struct ConsumerHandle {
    name: String,
    stop_tx: watch::Sender<bool>,
    running: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConsumerHandle {
    /// Whether the consumer loop is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop consuming and wait for in-flight records to finish.
    ///
    /// Calling it again, or after the loop has ended, returns immediately.
    pub async fn stop(&self) {
        self.stop_tx.send_replace(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(consumer = %self.name, error = %e, "Consumer task failed");
            }
        }
    }
}

impl std::fmt::Debug for ConsumerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerHandle")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Builder for configuring an [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    consumer_group: Option<String>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    workers: Option<usize>,
    retry_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name (used in logs).
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set the consumer group. Defaults to the consumer name.
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set the number of parallel workers (default: 4, minimum 1).
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set the delay before reconnecting (default: 5 seconds).
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the [`EventConsumer`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] if the name, topics, event bus
    /// or handler is missing, or the topic list is empty.
    pub fn build(self) -> Result<EventConsumer, PipelineError> {
        let name = self.name.ok_or(PipelineError::Configuration("consumer name is required"))?;
        let topics = self
            .topics
            .filter(|t| !t.is_empty())
            .ok_or(PipelineError::Configuration("at least one topic is required"))?;
        let event_bus = self
            .event_bus
            .ok_or(PipelineError::Configuration("event bus is required"))?;
        let handler = self.handler.ok_or(PipelineError::Configuration("handler is required"))?;

        Ok(EventConsumer {
            consumer_group: self.consumer_group.unwrap_or_else(|| name.clone()),
            name,
            topics,
            event_bus,
            handler,
            workers: self.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use async_trait::async_trait;
    use flightfeed_core::event_bus::{BusFuture, EventBusError, EventStream};
    use flightfeed_testing::InMemoryEventBus;
    use std::sync::atomic::AtomicUsize;

    const TOPIC: &str = "flight-events";

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, data: &[u8]) -> Result<(), HandlerError> {
            let text = std::str::from_utf8(data)?;
            let (key, n) = text.split_once(':').ok_or("bad record")?;
            tokio::task::yield_now().await;
            self.seen.lock().push((key.to_string(), n.parse()?));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _data: &[u8]) -> Result<(), HandlerError> {
            Err("storage unavailable".into())
        }
    }

    /// Blocks every record until the test hands out permits.
    struct Gated {
        gate: tokio::sync::Semaphore,
        started: AtomicUsize,
        handled: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Gated {
        async fn handle(&self, _data: &[u8]) -> Result<(), HandlerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.gate.acquire().await?.forget();
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Gated {
        fn closed() -> Self {
            Self {
                gate: tokio::sync::Semaphore::new(0),
                started: AtomicUsize::new(0),
                handled: AtomicUsize::new(0),
            }
        }
    }

    /// Bus whose subscriptions always fail, counting attempts.
    #[derive(Default)]
    struct DownBus {
        attempts: AtomicUsize,
    }

    impl EventBus for DownBus {
        fn publish<'a>(
            &'a self,
            _: &'a str,
            _: &'a str,
            _: &'a SerializedEvent,
        ) -> BusFuture<'a, ()> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe<'a>(
            &'a self,
            topics: &'a [&'a str],
            _: &'a str,
        ) -> BusFuture<'a, EventStream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                Err(EventBusError::SubscriptionFailed {
                    topics: topics.iter().map(ToString::to_string).collect(),
                    reason: "broker down".to_string(),
                })
            })
        }
    }

    fn record(key: &str, n: u32) -> SerializedEvent {
        SerializedEvent::new("DELAY".to_string(), format!("{key}:{n}").into_bytes()).with_key(key)
    }

    fn consumer(bus: Arc<dyn EventBus>, handler: Arc<dyn EventHandler>) -> EventConsumer {
        EventConsumer::builder()
            .name("test")
            .topics(vec![TOPIC.to_string()])
            .event_bus(bus)
            .handler(handler)
            .workers(3)
            .retry_delay(Duration::from_millis(10))
            .build()
            .unwrap()
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn preserves_order_per_key() {
        let bus = Arc::new(InMemoryEventBus::new());
        let recorder = Arc::new(Recorder::default());
        let handle = consumer(bus.clone(), recorder.clone()).start();

        wait_for(|| bus.member_count(TOPIC, "test") == 1).await;
        for n in 0..50 {
            for key in ["FF1", "FF2", "FF3", "FF4"] {
                bus.publish(TOPIC, key, &record(key, n)).await.unwrap();
            }
        }
        wait_for(|| recorder.seen.lock().len() == 200).await;
        handle.stop().await;

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 200);
        for key in ["FF1", "FF2", "FF3", "FF4"] {
            let order: Vec<u32> = seen.iter().filter(|(k, _)| k == key).map(|(_, n)| *n).collect();
            assert_eq!(order, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_consumption() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.publish(TOPIC, "FF1", &record("FF1", 1)).await.unwrap();
        let handle = consumer(bus.clone(), Arc::new(Failing)).start();

        bus.publish(TOPIC, "FF1", &record("FF1", 2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(handle.is_running());
        handle.stop().await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn keeps_retrying_failed_subscriptions() {
        let bus = Arc::new(DownBus::default());
        let handle = consumer(bus.clone(), Arc::new(Recorder::default())).start();

        wait_for(|| bus.attempts.load(Ordering::SeqCst) >= 3).await;
        assert!(handle.is_running());

        handle.stop().await;
        assert!(bus.attempts.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn stop_does_not_wait_on_a_full_worker_queue() {
        let bus = Arc::new(InMemoryEventBus::new());
        let gated = Arc::new(Gated::closed());
        let handle = EventConsumer::builder()
            .name("test")
            .topics(vec![TOPIC.to_string()])
            .event_bus(bus.clone())
            .handler(gated.clone())
            .workers(1)
            .build()
            .unwrap()
            .start();

        wait_for(|| bus.member_count(TOPIC, "test") == 1).await;
        let total = WORKER_QUEUE + 50;
        for n in 0..u32::try_from(total).unwrap() {
            bus.publish(TOPIC, "FF1", &record("FF1", n)).await.unwrap();
        }
        wait_for(|| gated.started.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = Arc::new(handle);
        let stopping = tokio::spawn({
            let handle = Arc::clone(&handle);
            async move { handle.stop().await }
        });

        // The subscription is released while the handler is still blocked.
        wait_for(|| bus.member_count(TOPIC, "test") == 0).await;
        assert_eq!(bus.member_count(TOPIC, "test"), 0);
        assert_eq!(gated.handled.load(Ordering::SeqCst), 0);

        gated.gate.add_permits(total);
        tokio::time::timeout(Duration::from_secs(5), stopping)
            .await
            .expect("stop within timeout")
            .unwrap();

        assert!(!handle.is_running());
        assert!(gated.handled.load(Ordering::SeqCst) < total);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let bus = Arc::new(InMemoryEventBus::new());
        let handle = consumer(bus, Arc::new(Recorder::default())).start();

        handle.stop().await;
        handle.stop().await;
        assert!(!handle.is_running());
    }

    #[test]
    fn build_requires_handler_and_topics() {
        let missing_handler = EventConsumer::builder()
            .name("test")
            .topics(vec![TOPIC.to_string()])
            .event_bus(Arc::new(InMemoryEventBus::new()))
            .build();
        assert!(matches!(missing_handler, Err(PipelineError::Configuration(_))));

        let no_topics = EventConsumer::builder()
            .name("test")
            .topics(Vec::new())
            .event_bus(Arc::new(InMemoryEventBus::new()))
            .handler(Arc::new(Failing))
            .build();
        assert!(matches!(no_topics, Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn group_defaults_to_name() {
        let consumer = consumer(Arc::new(InMemoryEventBus::new()), Arc::new(Failing));
        assert_eq!(consumer.consumer_group, "test");
        assert_eq!(consumer.worker_for(&record("FF1", 0)), consumer.worker_for(&record("FF1", 9)));
    }
}
