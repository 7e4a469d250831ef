//! Error types for warehouse operations

use crate::ProductId;
use std::fmt;
use thiserror::Error;

/// A single violated product field constraint.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FieldViolation {
    #[error("name length must be greater than 0")]
    EmptyName,

    #[error("price must be greater than 0")]
    ZeroPrice,

    #[error("quantity must be greater than 0")]
    ZeroQuantity,
}

impl FieldViolation {
    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            FieldViolation::EmptyName => "name",
            FieldViolation::ZeroPrice => "price",
            FieldViolation::ZeroQuantity => "quantity",
        }
    }
}

/// Every field constraint a request violated, in field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn single(violation: FieldViolation) -> Self {
        Self {
            violations: vec![violation],
        }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

impl std::error::Error for ValidationError {}

/// Why an operation gave up before completing.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CancelReason {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Store layer errors.
///
/// `NotFound`, `AlreadyExists` and `IdAlreadySet` are domain outcomes callers
/// branch on. `Cancelled` is kept distinct from them: it says nothing about
/// the entity, only that the caller stopped waiting.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("product does not exist: {id}")]
    NotFound { id: ProductId },

    #[error("product already exists: {id}")]
    AlreadyExists { id: ProductId },

    #[error("product id already set: {id}")]
    IdAlreadySet { id: ProductId },

    #[error("store operation aborted: {0}")]
    Cancelled(CancelReason),

    #[error("store internal error: {reason}")]
    Internal { reason: String },
}

impl StoreError {
    pub fn internal(reason: impl Into<String>) -> Self {
        StoreError::Internal {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Cancelled(_) | StoreError::Internal { .. })
    }
}

impl From<CancelReason> for StoreError {
    fn from(reason: CancelReason) -> Self {
        StoreError::Cancelled(reason)
    }
}

/// Cache backend errors. These never fail a read; callers fall back to the store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("cache serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("cache backend error: {reason}")]
    Backend { reason: String },

    #[error("cache operation aborted: {0}")]
    Cancelled(CancelReason),
}

impl From<CancelReason> for CacheError {
    fn from(reason: CancelReason) -> Self {
        CacheError::Cancelled(reason)
    }
}

/// Message broker errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("broker closed")]
    Closed,

    #[error("unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("group {group} already has a live subscription to {topic}")]
    GroupBusy { topic: String, group: String },
}

/// Event wire encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("failed to encode event: {reason}")]
    Encode { reason: String },

    #[error("failed to decode event: {reason}")]
    Decode { reason: String },

    #[error("event kind {found} delivered on topic {topic}")]
    TopicMismatch { topic: String, found: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all warehouse errors.
#[derive(Debug, Clone, Error)]
pub enum WarehouseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for warehouse operations.
pub type WarehouseResult<T> = Result<T, WarehouseError>;

// =============================================================================
// TESTS
// =============================================================================
