//! Mutation events.
//!
//! Each mutation kind travels on its own topic and is consumed by its own
//! consumer group. Ordering holds within a kind (per partition) but not
//! across kinds, so an Update and a Delete for the same id may be applied
//! in either order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use warehouse_core::{validate_product_fields, Product, ProductId, ValidationError};

// ============================================================================
// TOPICS AND GROUPS
// ============================================================================

pub const CREATE_TOPIC: &str = "productCreate";
pub const UPDATE_TOPIC: &str = "productUpdate";
pub const DELETE_TOPIC: &str = "productDelete";

pub const CREATE_GROUP: &str = "productCreateConsuming";
pub const UPDATE_GROUP: &str = "productUpdateConsuming";
pub const DELETE_GROUP: &str = "productDeleteConsuming";

/// Mutation discriminator. Selects topic and consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [MutationKind::Create, MutationKind::Update, MutationKind::Delete];

    pub fn topic(&self) -> &'static str {
        match self {
            MutationKind::Create => CREATE_TOPIC,
            MutationKind::Update => UPDATE_TOPIC,
            MutationKind::Delete => DELETE_TOPIC,
        }
    }

    pub fn group_id(&self) -> &'static str {
        match self {
            MutationKind::Create => CREATE_GROUP,
            MutationKind::Update => UPDATE_GROUP,
            MutationKind::Delete => DELETE_GROUP,
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.topic() == topic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MUTATION
// ============================================================================

/// A requested change to the catalog.
///
/// Build through [`Mutation::create`], [`Mutation::update`] and
/// [`Mutation::delete`], which validate fields up front. Decoding
/// re-validates, so an invalid mutation is never applied even if one is
/// put on the wire by another producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Create {
        name: String,
        price: u64,
        quantity: u64,
    },
    Update {
        id: ProductId,
        name: String,
        price: u64,
        quantity: u64,
    },
    Delete {
        id: ProductId,
    },
}

impl Mutation {
    pub fn create(name: impl Into<String>, price: u64, quantity: u64) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_product_fields(&name, price, quantity)?;
        Ok(Mutation::Create {
            name,
            price,
            quantity,
        })
    }

    pub fn update(
        id: ProductId,
        name: impl Into<String>,
        price: u64,
        quantity: u64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_product_fields(&name, price, quantity)?;
        Ok(Mutation::Update {
            id,
            name,
            price,
            quantity,
        })
    }

    pub fn delete(id: ProductId) -> Self {
        Mutation::Delete { id }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::Create { .. } => MutationKind::Create,
            Mutation::Update { .. } => MutationKind::Update,
            Mutation::Delete { .. } => MutationKind::Delete,
        }
    }

    /// The targeted product, if it already has an id.
    pub fn product_id(&self) -> Option<ProductId> {
        match self {
            Mutation::Create { .. } => None,
            Mutation::Update { id, .. } | Mutation::Delete { id } => Some(*id),
        }
    }

    /// Re-check field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Mutation::Create {
                name,
                price,
                quantity,
            }
            | Mutation::Update {
                name,
                price,
                quantity,
                ..
            } => validate_product_fields(name, *price, *quantity),
            Mutation::Delete { .. } => Ok(()),
        }
    }

    /// The product this mutation writes, for Create and Update.
    ///
    /// Create yields an unassigned product; the store assigns the id.
    pub fn to_product(&self) -> Option<Result<Product, ValidationError>> {
        match self {
            Mutation::Create {
                name,
                price,
                quantity,
            } => Some(Product::new(name.clone(), *price, *quantity)),
            Mutation::Update {
                id,
                name,
                price,
                quantity,
            } => Some(Product::with_id(*id, name.clone(), *price, *quantity)),
            Mutation::Delete { .. } => None,
        }
    }
}

// ============================================================================
// EVENT ENVELOPE
// ============================================================================

/// Identity and trace context attached to every published mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique per publish. Redeliveries of one publish share it.
    pub event_id: Uuid,
    /// Correlates the event with the request that produced it.
    pub trace_id: Uuid,
    pub published_at: DateTime<Utc>,
}

impl EventMetadata {
    pub fn new() -> Self {
        Self::with_trace(Uuid::now_v7())
    }

    pub fn with_trace(trace_id: Uuid) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            trace_id,
            published_at: Utc::now(),
        }
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// A mutation plus its metadata, as published to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub metadata: EventMetadata,
    pub mutation: Mutation,
}

impl MutationEvent {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            metadata: EventMetadata::new(),
            mutation,
        }
    }

    pub fn with_metadata(mutation: Mutation, metadata: EventMetadata) -> Self {
        Self { metadata, mutation }
    }

    pub fn kind(&self) -> MutationKind {
        self.mutation.kind()
    }

    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    pub fn event_id(&self) -> Uuid {
        self.metadata.event_id
    }

    /// Broker key used to pick a partition.
    ///
    /// Events about one product share a key and so a partition, which keeps
    /// them ordered within their kind. Creates have no id yet and spread by
    /// event id.
    pub fn partition_key(&self) -> String {
        match self.mutation.product_id() {
            Some(id) => id.to_string(),
            None => self.metadata.event_id.to_string(),
        }
    }
}
