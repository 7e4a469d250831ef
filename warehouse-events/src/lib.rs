//! Warehouse Events - Mutation Events and Broker Abstraction
//!
//! Mutations leave the command gateway as events on a partitioned,
//! at-least-once broker and reach the store through consumers.
//!
//! ```text
//! CommandGateway ── publish ──► productCreate ──► productCreateConsuming ──► Store
//!                               productUpdate ──► productUpdateConsuming ──►  + Cache
//!                               productDelete ──► productDeleteConsuming ──►
//! ```
//!
//! # Key Types
//!
//! - `Mutation`: Create / Update / Delete with validated fields
//! - `MutationEvent`: a mutation plus event id, trace id and publish time
//! - `Broker` / `Subscription`: producer and pull-based consumer traits
//! - `InMemoryBroker`: partitioned log with per-group committed offsets

pub mod broker;
pub mod codec;
pub mod event;
pub mod in_memory;

pub use broker::{Broker, Delivery, PublishAck, Subscription};
pub use codec::{decode, encode};
pub use event::{
    EventMetadata, Mutation, MutationEvent, MutationKind, CREATE_GROUP, CREATE_TOPIC,
    DELETE_GROUP, DELETE_TOPIC, UPDATE_GROUP, UPDATE_TOPIC,
};
pub use in_memory::InMemoryBroker;
