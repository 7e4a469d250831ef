//! Mutation Consumer Background Task
//!
//! One long-lived task per mutation kind. Each task subscribes to its
//! topic under its consumer group and, for every delivery:
//!
//! 1. Decodes the event. Undecodable payloads are committed and dropped so a
//!    single bad record cannot stall its partition.
//! 2. Applies the mutation to the store.
//! 3. Commits the delivery.
//! 4. Refreshes or invalidates the entity's cache entry, best effort.
//!
//! When the store fails transiently the delivery is left uncommitted, the
//! session is dropped, and after a fixed backoff the task resubscribes. The
//! broker then redelivers from the last committed offset.
//!
//! Redelivery makes creates non-idempotent: a create that reached the store
//! but was not committed is applied again and produces a second product.
//!
//! # Configuration
//!
//! ```rust
//! use warehouse_api::consumer::ConsumerConfig;
//! use std::time::Duration;
//!
//! let config = ConsumerConfig {
//!     reconnect_backoff: Duration::from_secs(3), // Pause before resubscribing
//! };
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use warehouse_core::{BrokerError, StoreError, WarehouseConfig};
use warehouse_events::{decode, Broker, Delivery, Mutation, MutationKind, Subscription};
use warehouse_storage::OpContext;

use crate::apply::{Applied, ApplyError, MutationApplier};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the mutation consumer tasks.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Pause between losing a session and resubscribing (default: 3 seconds)
    pub reconnect_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self::from_config(&WarehouseConfig::default())
    }
}

impl ConsumerConfig {
    pub fn from_config(config: &WarehouseConfig) -> Self {
        Self {
            reconnect_backoff: config.reconnect_backoff,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one consumer task.
#[derive(Debug, Default)]
pub struct ConsumerMetrics {
    /// Deliveries pulled from the broker, redeliveries included
    pub received: AtomicU64,

    /// Mutations applied and committed
    pub applied: AtomicU64,

    /// Deliveries committed without being applied
    pub dropped: AtomicU64,

    /// Deliveries left uncommitted after a transient apply failure
    pub redelivered: AtomicU64,

    /// Sessions lost and reopened
    pub reconnects: AtomicU64,

    /// Cache refreshes that failed after a commit
    pub cache_failures: AtomicU64,
}

impl ConsumerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConsumerMetricsSnapshot {
        ConsumerMetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            cache_failures: self.cache_failures.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of consumer metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerMetricsSnapshot {
    pub received: u64,
    pub applied: u64,
    pub dropped: u64,
    pub redelivered: u64,
    pub reconnects: u64,
    pub cache_failures: u64,
}

// ============================================================================
// CONSUMER
// ============================================================================

/// What to do with a delivery after handling it.
enum Disposition {
    /// Applied; commit, then refresh the cache.
    Apply(Applied),
    /// Permanently unusable; commit without applying.
    Drop,
    /// Transient failure; leave uncommitted and reconnect.
    Retry,
}

/// Why a subscription session ended.
enum SessionEnd {
    Shutdown,
    Closed,
    Reconnect,
}

/// Applies one mutation kind from the broker to the store.
pub struct MutationConsumer {
    kind: MutationKind,
    broker: Arc<dyn Broker>,
    applier: Arc<MutationApplier>,
    config: ConsumerConfig,
    metrics: Arc<ConsumerMetrics>,
}

impl MutationConsumer {
    pub fn new(
        kind: MutationKind,
        broker: Arc<dyn Broker>,
        applier: Arc<MutationApplier>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            kind,
            broker,
            applier,
            config,
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Live counters, readable while the task runs.
    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Consume until `shutdown` flips to true, its sender is dropped, or the
    /// broker closes.
    ///
    /// A delivery already being applied finishes, including its commit and
    /// cache refresh, before the task stops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> ConsumerMetricsSnapshot {
        let topic = self.kind.topic();
        let group = self.kind.group_id();

        tracing::info!(topic, group, "Mutation consumer started");

        loop {
            let session = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => break,
                session = self.broker.subscribe(topic, group) => session,
            };

            let end = match session {
                Ok(subscription) => self.consume(subscription, &mut shutdown).await,
                Err(BrokerError::Closed) => SessionEnd::Closed,
                Err(e) => {
                    tracing::warn!(topic, group, error = %e, "Subscribe failed");
                    SessionEnd::Reconnect
                }
            };

            match end {
                SessionEnd::Shutdown => break,
                SessionEnd::Closed => {
                    tracing::info!(topic, group, "Broker closed");
                    break;
                }
                SessionEnd::Reconnect => {
                    self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        topic,
                        group,
                        backoff_ms = self.config.reconnect_backoff.as_millis() as u64,
                        "Reconnecting after backoff"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_requested(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                    }
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            topic,
            received = snapshot.received,
            applied = snapshot.applied,
            dropped = snapshot.dropped,
            redelivered = snapshot.redelivered,
            reconnects = snapshot.reconnects,
            "Mutation consumer stopped"
        );
        snapshot
    }

    /// Pull and handle deliveries until the session has to end.
    async fn consume(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return SessionEnd::Shutdown,
                next = subscription.next() => match next {
                    Ok(delivery) => delivery,
                    Err(BrokerError::Closed) => return SessionEnd::Closed,
                    Err(e) => {
                        tracing::warn!(topic = self.kind.topic(), error = %e, "Receive failed");
                        return SessionEnd::Reconnect;
                    }
                },
            };
            self.metrics.received.fetch_add(1, Ordering::Relaxed);

            let applied = match self.handle(&delivery).await {
                Disposition::Apply(applied) => Some(applied),
                Disposition::Drop => None,
                Disposition::Retry => return SessionEnd::Reconnect,
            };

            if let Err(e) = subscription.commit(&delivery).await {
                tracing::warn!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Commit failed"
                );
                return SessionEnd::Reconnect;
            }

            if let Some(applied) = applied {
                self.metrics.applied.fetch_add(1, Ordering::Relaxed);
                if !self.applier.refresh_cache(&OpContext::background(), &applied).await {
                    self.metrics.cache_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event = match decode(&delivery.topic, &delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    topic = %delivery.topic,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Dropping undecodable message"
                );
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                return Disposition::Drop;
            }
        };

        let event_id = event.event_id();
        let trace_id = event.metadata.trace_id;

        match self.applier.apply(&OpContext::background(), &event.mutation).await {
            Ok(applied) => {
                tracing::info!(
                    %event_id,
                    %trace_id,
                    product_id = %applied.product_id(),
                    kind = %event.kind(),
                    "Mutation applied"
                );
                Disposition::Apply(applied)
            }
            Err(ApplyError::Store(StoreError::NotFound { id }))
                if matches!(event.mutation, Mutation::Delete { .. }) =>
            {
                tracing::debug!(%event_id, product_id = %id, "Product already deleted");
                Disposition::Apply(Applied::Deleted(id))
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    %event_id,
                    %trace_id,
                    partition = delivery.partition,
                    offset = delivery.offset,
                    error = %e,
                    "Apply failed, leaving message for redelivery"
                );
                self.metrics.redelivered.fetch_add(1, Ordering::Relaxed);
                Disposition::Retry
            }
            Err(e) => {
                tracing::warn!(
                    %event_id,
                    %trace_id,
                    kind = %event.kind(),
                    error = %e,
                    "Dropping mutation rejected by store"
                );
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                Disposition::Drop
            }
        }
    }
}

/// Resolve once shutdown is signalled or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// SPAWNING
// ============================================================================

struct RunningConsumer {
    kind: MutationKind,
    metrics: Arc<ConsumerMetrics>,
    handle: JoinHandle<ConsumerMetricsSnapshot>,
}

/// Handles to the per-kind consumer tasks.
pub struct ConsumerSet {
    consumers: Vec<RunningConsumer>,
}

impl ConsumerSet {
    /// Spawn one consumer per mutation kind.
    pub fn spawn(
        broker: Arc<dyn Broker>,
        applier: Arc<MutationApplier>,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let consumers = MutationKind::ALL
            .into_iter()
            .map(|kind| {
                let consumer = MutationConsumer::new(
                    kind,
                    Arc::clone(&broker),
                    Arc::clone(&applier),
                    config.clone(),
                );
                let metrics = consumer.metrics();
                let handle = tokio::spawn(consumer.run(shutdown.clone()));
                RunningConsumer {
                    kind,
                    metrics,
                    handle,
                }
            })
            .collect();
        Self { consumers }
    }

    /// Current counters for the consumer of `kind`.
    pub fn metrics(&self, kind: MutationKind) -> Option<ConsumerMetricsSnapshot> {
        self.consumers
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.metrics.snapshot())
    }

    /// Counters summed over all consumers.
    pub fn totals(&self) -> ConsumerMetricsSnapshot {
        self.consumers
            .iter()
            .map(|c| c.metrics.snapshot())
            .fold(ConsumerMetricsSnapshot::default(), |acc, s| ConsumerMetricsSnapshot {
                received: acc.received + s.received,
                applied: acc.applied + s.applied,
                dropped: acc.dropped + s.dropped,
                redelivered: acc.redelivered + s.redelivered,
                reconnects: acc.reconnects + s.reconnects,
                cache_failures: acc.cache_failures + s.cache_failures,
            })
    }

    /// Wait for every task to stop and collect its final counters.
    ///
    /// Signal shutdown first. A task that panicked reports the counters it
    /// had reached.
    pub async fn join(self) -> Vec<(MutationKind, ConsumerMetricsSnapshot)> {
        let mut results = Vec::with_capacity(self.consumers.len());
        for consumer in self.consumers {
            let snapshot = match consumer.handle.await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::error!(kind = %consumer.kind, error = %e, "Consumer task failed");
                    consumer.metrics.snapshot()
                }
            };
            results.push((consumer.kind, snapshot));
        }
        results
    }

    /// Abort every task without waiting for in-flight deliveries.
    pub fn abort(&self) {
        for consumer in &self.consumers {
            consumer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warehouse_core::{Product, ProductId};
    use warehouse_events::{encode, InMemoryBroker, MutationEvent, CREATE_GROUP, CREATE_TOPIC};
    use warehouse_storage::{CacheAside, ConcurrencyGuardedStore, InMemoryCacheBackend, ProductStore};

    fn applier(store: Arc<ConcurrencyGuardedStore>) -> Arc<MutationApplier> {
        let cache = Arc::new(CacheAside::with_defaults(Arc::new(InMemoryCacheBackend::new())));
        Arc::new(MutationApplier::new(store, cache, Duration::from_secs(2)))
    }

    async fn publish(broker: &InMemoryBroker, mutation: Mutation) {
        let event = MutationEvent::new(mutation);
        broker
            .publish(event.topic(), &event.partition_key(), encode(&event).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_poison_message_is_committed_and_dropped() {
        let broker = InMemoryBroker::new(1);
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let consumer = MutationConsumer::new(
            MutationKind::Create,
            Arc::new(broker.clone()),
            applier(store.clone()),
            ConsumerConfig::default(),
        );
        let metrics = consumer.metrics();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(rx));

        broker.publish(CREATE_TOPIC, "k", b"not an event".to_vec()).await.unwrap();
        publish(&broker, Mutation::create("good", 1, 1).unwrap()).await;

        while metrics.snapshot().applied < 1 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        let snapshot = task.await.unwrap();

        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.applied, 1);
        assert_eq!(broker.lag(CREATE_TOPIC, CREATE_GROUP).unwrap(), 0);
        assert_eq!(store.len(&OpContext::background()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_of_missing_product_counts_as_applied() {
        let broker = InMemoryBroker::new(1);
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let consumer = MutationConsumer::new(
            MutationKind::Delete,
            Arc::new(broker.clone()),
            applier(store),
            ConsumerConfig::default(),
        );
        let metrics = consumer.metrics();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(rx));

        publish(&broker, Mutation::delete(ProductId::new(77))).await;
        while metrics.snapshot().applied < 1 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        let snapshot = task.await.unwrap();
        assert_eq!(snapshot.dropped, 0);
        assert_eq!(snapshot.redelivered, 0);
    }

    #[tokio::test]
    async fn test_update_of_missing_product_is_dropped() {
        let broker = InMemoryBroker::new(1);
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let consumer = MutationConsumer::new(
            MutationKind::Update,
            Arc::new(broker.clone()),
            applier(store.clone()),
            ConsumerConfig::default(),
        );
        let metrics = consumer.metrics();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(rx));

        publish(&broker, Mutation::update(ProductId::new(3), "x", 1, 1).unwrap()).await;
        while metrics.snapshot().dropped < 1 {
            tokio::task::yield_now().await;
        }
        tx.send(true).unwrap();
        task.await.unwrap();

        let err = store
            .get_product_by_id(&OpContext::background(), ProductId::new(3))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound { id: ProductId::new(3) });
    }

    #[tokio::test]
    async fn test_closed_broker_stops_all_consumers() {
        let broker = InMemoryBroker::new(2);
        let store = Arc::new(ConcurrencyGuardedStore::new());
        let (_tx, rx) = watch::channel(false);
        let set = ConsumerSet::spawn(
            Arc::new(broker.clone()),
            applier(store.clone()),
            ConsumerConfig::default(),
            rx,
        );

        publish(&broker, Mutation::create("a", 1, 1).unwrap()).await;
        while set.metrics(MutationKind::Create).map(|m| m.applied) != Some(1) {
            tokio::task::yield_now().await;
        }
        broker.close();

        let results = set.join().await;
        assert_eq!(results.len(), 3);
        let created = store
            .get_product_by_id(&OpContext::background(), ProductId::new(1))
            .await
            .unwrap();
        assert_eq!(created, Product::with_id(ProductId::new(1), "a", 1, 1).unwrap());
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_consumer() {
        let broker = InMemoryBroker::new(1);
        let consumer = MutationConsumer::new(
            MutationKind::Create,
            Arc::new(broker),
            applier(Arc::new(ConcurrencyGuardedStore::new())),
            ConsumerConfig::default(),
        );
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(rx));
        drop(tx);
        assert_eq!(task.await.unwrap(), ConsumerMetricsSnapshot::default());
    }
}
