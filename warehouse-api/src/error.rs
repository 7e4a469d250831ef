//! Error Types for the Warehouse API
//!
//! This module defines error handling for the gateway layer, including:
//! - ApiError struct for structured error results
//! - ErrorCode enum for categorizing errors
//! - Conversions from every lower-layer error type
//!
//! Domain errors (validation, not found, already exists, cancelled) keep
//! their message verbatim. Internal failures are logged where they are
//! converted and callers only see a generic message.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use warehouse_core::{
    BrokerError, CodecError, ConfigError, StoreError, ValidationError, WarehouseError,
};

use crate::constants::{INTERNAL_ERROR_MESSAGE, UNAVAILABLE_MESSAGE};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for gateway results.
///
/// Callers branch on the code; the message is for humans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// One or more product fields failed validation
    InvalidArgument,

    /// Requested product does not exist
    NotFound,

    /// Product with the same identifier already exists
    AlreadyExists,

    /// The caller's deadline passed or it cancelled the operation
    Cancelled,

    /// Transient failure; the caller may retry
    Unavailable,

    /// Unrecoverable failure
    Internal,
}

impl ErrorCode {
    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "Invalid argument",
            ErrorCode::NotFound => "Product not found",
            ErrorCode::AlreadyExists => "Product already exists",
            ErrorCode::Cancelled => "Operation cancelled",
            ErrorCode::Unavailable => UNAVAILABLE_MESSAGE,
            ErrorCode::Internal => INTERNAL_ERROR_MESSAGE,
        }
    }

    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::Cancelled | ErrorCode::Unavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::Unavailable => "UNAVAILABLE",
            ErrorCode::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

// ============================================================================
// API ERROR
// ============================================================================

/// Error returned by the command and query gateways.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

/// Result type for gateway operations.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AlreadyExists, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Transient failure. The cause is logged, not returned.
    pub fn unavailable(cause: impl fmt::Display) -> Self {
        tracing::warn!(error = %cause, "Request failed with transient error");
        Self::from_code(ErrorCode::Unavailable)
    }

    /// Unrecoverable failure. The cause is logged, not returned.
    pub fn internal_error(cause: impl fmt::Display) -> Self {
        tracing::error!(error = %cause, "Request failed with internal error");
        Self::from_code(ErrorCode::Internal)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::invalid_argument(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::not_found(err.to_string()),
            StoreError::AlreadyExists { .. } => ApiError::already_exists(err.to_string()),
            StoreError::IdAlreadySet { .. } => ApiError::invalid_argument(err.to_string()),
            StoreError::Cancelled(_) => ApiError::cancelled(err.to_string()),
            StoreError::Internal { .. } => ApiError::unavailable(err),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        ApiError::unavailable(err)
    }
}

impl From<CodecError> for ApiError {
    fn from(err: CodecError) -> Self {
        ApiError::internal_error(err)
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(err)
    }
}

impl From<WarehouseError> for ApiError {
    fn from(err: WarehouseError) -> Self {
        match err {
            WarehouseError::Validation(e) => e.into(),
            WarehouseError::Store(e) => e.into(),
            WarehouseError::Broker(e) => e.into(),
            WarehouseError::Codec(e) => e.into(),
            WarehouseError::Config(e) => e.into(),
            WarehouseError::Cache(e) => ApiError::unavailable(e),
        }
    }
}
