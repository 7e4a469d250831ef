//! In-memory broker for tests and single-process deployments.
//!
//! Each topic is a fixed number of append-only partitions. Committed
//! offsets are tracked per (group, topic, partition). A subscription reads
//! every partition of its topic, starting from the group's committed
//! offsets at the moment it was opened. A group may hold one live
//! subscription per topic; a second is refused until the first is dropped.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;
use warehouse_core::BrokerError;

use crate::broker::{Broker, Delivery, PublishAck, Subscription};
use crate::event::MutationKind;

#[derive(Debug, Clone)]
struct Record {
    key: String,
    payload: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<Record>>>,
    committed: HashMap<(String, String, usize), u64>,
    /// (group, topic) pairs with a live subscription.
    sessions: HashSet<(String, String)>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    partitions: usize,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, BrokerState>, BrokerError> {
        self.state.lock().map_err(|_| BrokerError::Unavailable {
            reason: "Lock poisoned: broker state".to_string(),
        })
    }
}

/// Partitioned in-memory [`Broker`].
///
/// Clones share the same log.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// A broker with the three mutation topics, each with `partitions` partitions.
    pub fn new(partitions: usize) -> Self {
        let broker = Self::empty(partitions);
        for kind in MutationKind::ALL {
            broker.create_topic(kind.topic());
        }
        broker
    }

    /// A broker with no topics.
    pub fn empty(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                partitions: partitions.max(1),
            }),
        }
    }

    /// Create `topic` if it does not exist yet.
    pub fn create_topic(&self, topic: &str) {
        if let Ok(mut state) = self.shared.lock() {
            state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.shared.partitions]);
        }
    }

    pub fn partitions(&self) -> usize {
        self.shared.partitions
    }

    /// Stop the broker. Publishes fail and every subscription's `next`
    /// returns [`BrokerError::Closed`].
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.closed = true;
        }
        self.shared.notify.notify_waiters();
    }

    /// Total records ever published to `topic`.
    pub fn published(&self, topic: &str) -> Result<u64, BrokerError> {
        let state = self.shared.lock()?;
        let partitions = state.topics.get(topic).ok_or_else(|| unknown(topic))?;
        Ok(partitions.iter().map(|p| p.len() as u64).sum())
    }

    /// Every record in `topic`, partition by partition.
    pub fn records(&self, topic: &str) -> Result<Vec<Delivery>, BrokerError> {
        let state = self.shared.lock()?;
        let partitions = state.topics.get(topic).ok_or_else(|| unknown(topic))?;
        Ok(partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records.iter().enumerate().map(move |(offset, record)| Delivery {
                    topic: topic.to_string(),
                    partition,
                    offset: offset as u64,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                })
            })
            .collect())
    }

    /// Committed offset of `group` on one partition of `topic`.
    pub fn committed_offset(&self, topic: &str, group: &str, partition: usize) -> Result<u64, BrokerError> {
        let state = self.shared.lock()?;
        Ok(committed(&state, topic, group, partition))
    }

    /// Records in `topic` not yet committed by `group`.
    pub fn lag(&self, topic: &str, group: &str) -> Result<u64, BrokerError> {
        let state = self.shared.lock()?;
        let partitions = state.topics.get(topic).ok_or_else(|| unknown(topic))?;
        Ok(partitions
            .iter()
            .enumerate()
            .map(|(p, records)| (records.len() as u64).saturating_sub(committed(&state, topic, group, p)))
            .sum())
    }
}

fn unknown(topic: &str) -> BrokerError {
    BrokerError::UnknownTopic {
        topic: topic.to_string(),
    }
}

fn committed(state: &BrokerState, topic: &str, group: &str, partition: usize) -> u64 {
    state
        .committed
        .get(&(group.to_string(), topic.to_string(), partition))
        .copied()
        .unwrap_or(0)
}

/// FNV-1a; stable across processes so a key always maps to one partition.
fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    (hash % partitions as u64) as usize
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<PublishAck, BrokerError> {
        let ack = {
            let mut state = self.shared.lock()?;
            if state.closed {
                return Err(BrokerError::Closed);
            }
            let partitions = state.topics.get_mut(topic).ok_or_else(|| unknown(topic))?;
            let partition = partition_for(key, partitions.len());
            let log = &mut partitions[partition];
            log.push(Record {
                key: key.to_string(),
                payload,
            });
            PublishAck {
                partition,
                offset: (log.len() - 1) as u64,
            }
        };
        debug!(topic, key, partition = ack.partition, offset = ack.offset, "Record published");
        self.shared.notify.notify_waiters();
        Ok(ack)
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError> {
        let mut state = self.shared.lock()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let partitions = state.topics.get(topic).ok_or_else(|| unknown(topic))?.len();
        if !state.sessions.insert((group.to_string(), topic.to_string())) {
            return Err(BrokerError::GroupBusy {
                topic: topic.to_string(),
                group: group.to_string(),
            });
        }
        let positions = (0..partitions)
            .map(|p| committed(&state, topic, group, p))
            .collect();
        drop(state);

        Ok(Box::new(InMemorySubscription {
            shared: Arc::clone(&self.shared),
            topic: topic.to_string(),
            group: group.to_string(),
            positions,
            cursor: 0,
        }))
    }
}

/// Subscription over an [`InMemoryBroker`] topic.
struct InMemorySubscription {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    /// Next offset to read, per partition.
    positions: Vec<u64>,
    /// Partition to try first on the next read.
    cursor: usize,
}

impl InMemorySubscription {
    fn try_next(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let state = self.shared.lock()?;
        if state.closed {
            return Err(BrokerError::Closed);
        }
        let partitions = state
            .topics
            .get(&self.topic)
            .ok_or_else(|| unknown(&self.topic))?;

        let count = partitions.len();
        for step in 0..count {
            let partition = (self.cursor + step) % count;
            let position = self.positions[partition];
            if let Some(record) = partitions[partition].get(position as usize) {
                self.positions[partition] = position + 1;
                self.cursor = (partition + 1) % count;
                return Ok(Some(Delivery {
                    topic: self.topic.clone(),
                    partition,
                    offset: position,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                }));
            }
        }
        Ok(None)
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        if let Ok(mut state) = self.shared.lock() {
            state.sessions.remove(&(self.group.clone(), self.topic.clone()));
        }
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Delivery, BrokerError> {
        let shared = Arc::clone(&self.shared);
        loop {
            let notified = shared.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a publish between the check and
            // the await is not missed.
            notified.as_mut().enable();

            if let Some(delivery) = self.try_next()? {
                return Ok(delivery);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError> {
        let mut state = self.shared.lock()?;
        let slot = state
            .committed
            .entry((self.group.clone(), delivery.topic.clone(), delivery.partition))
            .or_insert(0);
        *slot = (*slot).max(delivery.offset + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const TOPIC: &str = "productUpdate";
    const GROUP: &str = "productUpdateConsuming";

    #[tokio::test]
    async fn test_publish_then_consume() {
        let broker = InMemoryBroker::new(3);
        let ack = broker.publish(TOPIC, "7", b"a".to_vec()).await.unwrap();
        assert!(ack.partition < 3);
        assert_eq!(ack.offset, 0);

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload, b"a");
        assert_eq!(delivery.key, "7");
        assert_eq!(delivery.partition, ack.partition);
    }

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = InMemoryBroker::new(4);
        let a = broker.publish(TOPIC, "42", b"1".to_vec()).await.unwrap();
        let b = broker.publish(TOPIC, "42", b"2".to_vec()).await.unwrap();
        assert_eq!(a.partition, b.partition);
        assert_eq!(b.offset, a.offset + 1);

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        assert_eq!(sub.next().await.unwrap().payload, b"1");
        assert_eq!(sub.next().await.unwrap().payload, b"2");
    }

    #[tokio::test]
    async fn test_uncommitted_delivery_is_redelivered() {
        let broker = InMemoryBroker::new(1);
        broker.publish(TOPIC, "1", b"first".to_vec()).await.unwrap();
        broker.publish(TOPIC, "1", b"second".to_vec()).await.unwrap();

        {
            let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
            let first = sub.next().await.unwrap();
            sub.commit(&first).await.unwrap();
            let _second = sub.next().await.unwrap();
            // Dropped without commit.
        }

        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();
        assert_eq!(sub.next().await.unwrap().payload, b"second");
        assert_eq!(broker.lag(TOPIC, GROUP).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_second_live_subscription_in_group_is_refused() {
        let broker = InMemoryBroker::new(1);
        let first = broker.subscribe(TOPIC, GROUP).await.unwrap();

        assert!(matches!(
            broker.subscribe(TOPIC, GROUP).await,
            Err(BrokerError::GroupBusy { .. })
        ));
        // Other groups and other topics are unaffected.
        assert!(broker.subscribe(TOPIC, "other").await.is_ok());
        assert!(broker.subscribe("productCreate", GROUP).await.is_ok());

        drop(first);
        assert!(broker.subscribe(TOPIC, GROUP).await.is_ok());
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let broker = InMemoryBroker::new(2);
        broker.publish(TOPIC, "1", b"x".to_vec()).await.unwrap();

        let mut a = broker.subscribe(TOPIC, "a").await.unwrap();
        let delivery = a.next().await.unwrap();
        a.commit(&delivery).await.unwrap();

        assert_eq!(broker.lag(TOPIC, "a").unwrap(), 0);
        assert_eq!(broker.lag(TOPIC, "b").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_next_waits_for_publish() {
        let broker = InMemoryBroker::new(2);
        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.publish(TOPIC, "5", b"late".to_vec()).await.unwrap();
        });

        let delivery = tokio::time::timeout(Duration::from_secs(5), sub.next())
            .await
            .expect("delivery should arrive")
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_wakes_subscribers() {
        let broker = InMemoryBroker::new(1);
        let mut sub = broker.subscribe(TOPIC, GROUP).await.unwrap();

        let closer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        assert_eq!(sub.next().await.unwrap_err(), BrokerError::Closed);
        assert_eq!(
            broker.publish(TOPIC, "1", Vec::new()).await.unwrap_err(),
            BrokerError::Closed
        );
    }

    #[tokio::test]
    async fn test_unknown_topic() {
        let broker = InMemoryBroker::empty(1);
        assert!(matches!(
            broker.publish("orders", "1", Vec::new()).await,
            Err(BrokerError::UnknownTopic { .. })
        ));
        assert!(broker.subscribe("orders", GROUP).await.is_err());

        broker.create_topic("orders");
        assert!(broker.publish("orders", "1", Vec::new()).await.is_ok());
        assert_eq!(broker.published("orders").unwrap(), 1);
    }

    #[test]
    fn test_partition_for_is_stable() {
        assert_eq!(partition_for("abc", 7), partition_for("abc", 7));
        for key in ["1", "2", "3", "long-key-value"] {
            assert!(partition_for(key, 3) < 3);
        }
    }
}
