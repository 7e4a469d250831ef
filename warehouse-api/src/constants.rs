//! Constants for the Warehouse API
//!
//! Tunables shared by the store, cache and broker live on
//! `warehouse_core::WarehouseConfig`. This module holds the values that only
//! the service layer cares about.

// ============================================================================
// SERVICE
// ============================================================================

/// Service name reported in logs
pub const DEFAULT_SERVICE_NAME: &str = "warehouse-api";

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";

/// How long shutdown waits for consumers to stop (seconds)
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

// ============================================================================
// CACHE
// ============================================================================

/// LMDB map size when the persistent cache backend is selected (MB)
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;

// ============================================================================
// ERROR MESSAGES
// ============================================================================

/// Message returned for unrecoverable failures
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

/// Message returned for transient failures
pub const UNAVAILABLE_MESSAGE: &str = "service temporarily unavailable";
