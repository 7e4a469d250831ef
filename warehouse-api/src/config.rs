//! Service configuration.

use std::path::PathBuf;
use std::time::Duration;

use warehouse_core::WarehouseConfig;

use crate::constants::{DEFAULT_LMDB_MAP_SIZE_MB, DEFAULT_SHUTDOWN_GRACE_SECS};
use crate::error::ApiResult;
use crate::telemetry::TelemetryConfig;

/// Where cached values live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendConfig {
    /// Process-local map. Lost on restart.
    InMemory,
    /// LMDB environment at `path`.
    Lmdb { path: PathBuf, map_size_mb: usize },
}

/// Everything the `warehouse-api` binary needs to start.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub warehouse: WarehouseConfig,
    pub telemetry: TelemetryConfig,
    pub cache_backend: CacheBackendConfig,
    /// How long shutdown waits for consumer tasks before giving up.
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            warehouse: WarehouseConfig::default(),
            telemetry: TelemetryConfig::default(),
            cache_backend: CacheBackendConfig::InMemory,
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        }
    }
}

impl ServiceConfig {
    /// Create ServiceConfig from environment variables.
    ///
    /// Warehouse tunables are read by [`WarehouseConfig::from_env`] and
    /// telemetry settings by [`TelemetryConfig::from_env`]. In addition:
    ///
    /// # Environment Variables
    /// - `WAREHOUSE_CACHE_PATH`: LMDB directory; unset selects the in-memory cache
    /// - `WAREHOUSE_CACHE_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `WAREHOUSE_SHUTDOWN_GRACE_SECS`: Consumer drain timeout (default: 10)
    pub fn from_env() -> ApiResult<Self> {
        let warehouse = WarehouseConfig::from_env()?;

        let cache_backend = match std::env::var("WAREHOUSE_CACHE_PATH") {
            Ok(path) if !path.trim().is_empty() => CacheBackendConfig::Lmdb {
                path: PathBuf::from(path),
                map_size_mb: std::env::var("WAREHOUSE_CACHE_MAP_SIZE_MB")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|mb: &usize| *mb > 0)
                    .unwrap_or(DEFAULT_LMDB_MAP_SIZE_MB),
            },
            _ => CacheBackendConfig::InMemory,
        };

        let shutdown_grace = Duration::from_secs(
            std::env::var("WAREHOUSE_SHUTDOWN_GRACE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SHUTDOWN_GRACE_SECS),
        );

        Ok(Self {
            warehouse,
            telemetry: TelemetryConfig::from_env(),
            cache_backend,
            shutdown_grace,
        })
    }
}
