//! Broker abstraction.
//!
//! At-least-once, partitioned transport. Producers get a synchronous ack
//! with the record's partition and offset. Consumers open a
//! [`Subscription`] for a (topic, group) pair, pull deliveries, and commit
//! each one only after it has been handled. A subscription dropped with
//! uncommitted deliveries causes those deliveries, and everything after
//! them in the same partition, to be redelivered to the group's next
//! subscription.

use async_trait::async_trait;
use warehouse_core::BrokerError;

/// Where a published record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    pub partition: usize,
    pub offset: u64,
}

/// A record handed to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a record to `topic`, partitioned by `key`.
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<PublishAck, BrokerError>;

    /// Open a subscription that resumes from `group`'s committed offsets.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn Subscription>, BrokerError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next record. Fails with [`BrokerError::Closed`] once the
    /// broker shuts down.
    async fn next(&mut self) -> Result<Delivery, BrokerError>;

    /// Mark `delivery` and everything before it in its partition as handled.
    async fn commit(&mut self, delivery: &Delivery) -> Result<(), BrokerError>;
}
