//! Configuration types

use crate::{ConfigError, WarehouseError, WarehouseResult, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the command gateway turns a validated request into a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GatewayStrategy {
    /// Publish an event and acknowledge without waiting for persistence.
    #[default]
    Async,
    /// Call the store inline and return the authoritative product.
    Sync,
}

impl FromStr for GatewayStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "async" => Ok(GatewayStrategy::Async),
            "sync" => Ok(GatewayStrategy::Sync),
            other => Err(ConfigError::InvalidValue {
                field: "gateway_strategy".to_string(),
                value: other.to_string(),
                reason: "expected \"async\" or \"sync\"".to_string(),
            }),
        }
    }
}

impl fmt::Display for GatewayStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayStrategy::Async => f.write_str("async"),
            GatewayStrategy::Sync => f.write_str("sync"),
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    // Store admission control
    /// Maximum callers concurrently waiting on or holding the store lock.
    pub admission_capacity: usize,
    /// Page size used when a list request asks for size 0.
    pub default_page_size: u64,

    // Cache
    /// TTL for single-product cache entries.
    pub entity_ttl: Duration,
    /// TTL for list-page cache entries.
    pub page_ttl: Duration,

    // Timeouts
    /// Deadline for store calls made on behalf of a gateway request.
    pub operation_timeout: Duration,
    /// Deadline for one cache call. A read whose cache lookup runs out of
    /// time still gets a full `operation_timeout` for the store.
    pub cache_timeout: Duration,
    /// Deadline for a single store apply made by a consumer.
    pub apply_timeout: Duration,
    /// Pause between a failed consumer session and its reconnect.
    pub reconnect_backoff: Duration,

    // Broker
    /// Partitions per mutation topic.
    pub broker_partitions: usize,

    /// Command gateway strategy.
    pub gateway_strategy: GatewayStrategy,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            admission_capacity: 10,
            default_page_size: DEFAULT_PAGE_SIZE,
            entity_ttl: Duration::from_secs(600),
            page_ttl: Duration::from_secs(60),
            operation_timeout: Duration::from_millis(27),
            cache_timeout: Duration::from_millis(10),
            apply_timeout: Duration::from_secs(2),
            reconnect_backoff: Duration::from_secs(3),
            broker_partitions: 3,
            gateway_strategy: GatewayStrategy::Async,
        }
    }
}

impl WarehouseConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `WAREHOUSE_ADMISSION_CAPACITY`: Store admission slots (default: 10)
    /// - `WAREHOUSE_DEFAULT_PAGE_SIZE`: Page size for size 0 (default: 20)
    /// - `WAREHOUSE_ENTITY_TTL_SECS`: Product cache TTL (default: 600)
    /// - `WAREHOUSE_PAGE_TTL_SECS`: List page cache TTL (default: 60)
    /// - `WAREHOUSE_OPERATION_TIMEOUT_MS`: Gateway call deadline (default: 27)
    /// - `WAREHOUSE_CACHE_TIMEOUT_MS`: Per cache call deadline (default: 10)
    /// - `WAREHOUSE_APPLY_TIMEOUT_MS`: Consumer apply deadline (default: 2000)
    /// - `WAREHOUSE_RECONNECT_BACKOFF_MS`: Consumer reconnect pause (default: 3000)
    /// - `WAREHOUSE_BROKER_PARTITIONS`: Partitions per topic (default: 3)
    /// - `WAREHOUSE_GATEWAY_STRATEGY`: "async" or "sync" (default: async)
    ///
    /// Unparseable values fall back to the default, except the gateway
    /// strategy which is rejected so a typo cannot silently flip the write path.
    pub fn from_env() -> WarehouseResult<Self> {
        let defaults = Self::default();

        let gateway_strategy = match std::env::var("WAREHOUSE_GATEWAY_STRATEGY") {
            Ok(raw) => raw.parse()?,
            Err(_) => defaults.gateway_strategy,
        };

        let config = Self {
            admission_capacity: env_parse("WAREHOUSE_ADMISSION_CAPACITY")
                .unwrap_or(defaults.admission_capacity),
            default_page_size: env_parse("WAREHOUSE_DEFAULT_PAGE_SIZE")
                .unwrap_or(defaults.default_page_size),
            entity_ttl: env_parse("WAREHOUSE_ENTITY_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.entity_ttl),
            page_ttl: env_parse("WAREHOUSE_PAGE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.page_ttl),
            operation_timeout: env_parse("WAREHOUSE_OPERATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.operation_timeout),
            cache_timeout: env_parse("WAREHOUSE_CACHE_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.cache_timeout),
            apply_timeout: env_parse("WAREHOUSE_APPLY_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.apply_timeout),
            reconnect_backoff: env_parse("WAREHOUSE_RECONNECT_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_backoff),
            broker_partitions: env_parse("WAREHOUSE_BROKER_PARTITIONS")
                .unwrap_or(defaults.broker_partitions),
            gateway_strategy,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - admission_capacity > 0
    /// - default_page_size > 0
    /// - broker_partitions > 0
    /// - All duration values are positive
    pub fn validate(&self) -> WarehouseResult<()> {
        if self.admission_capacity == 0 {
            return Err(invalid(
                "admission_capacity",
                self.admission_capacity.to_string(),
                "admission_capacity must be greater than 0",
            ));
        }

        if self.default_page_size == 0 {
            return Err(invalid(
                "default_page_size",
                self.default_page_size.to_string(),
                "default_page_size must be greater than 0",
            ));
        }

        if self.broker_partitions == 0 {
            return Err(invalid(
                "broker_partitions",
                self.broker_partitions.to_string(),
                "broker_partitions must be greater than 0",
            ));
        }

        let durations = [
            ("entity_ttl", self.entity_ttl),
            ("page_ttl", self.page_ttl),
            ("operation_timeout", self.operation_timeout),
            ("cache_timeout", self.cache_timeout),
            ("apply_timeout", self.apply_timeout),
            ("reconnect_backoff", self.reconnect_backoff),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    format!("{:?}", value),
                    &format!("{} must be positive", field),
                ));
            }
        }

        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

fn invalid(field: &str, value: String, reason: &str) -> WarehouseError {
    WarehouseError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        reason: reason.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
