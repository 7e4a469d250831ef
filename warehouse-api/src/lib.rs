//! Warehouse API - Command/Query Gateways and Mutation Consumers
//!
//! Writes enter through a [`CommandGateway`], either published as events
//! for the [`MutationConsumer`]s to apply or applied inline. Reads go
//! through the [`QueryGateway`], which serves from the cache and falls back
//! to the store.
//!
//! ```text
//! client ─► CommandGateway ─► Broker ─► MutationConsumer ─► Store ─► Cache
//! client ─► QueryGateway ─► Cache ─(miss)─► Store ─► Cache
//! ```

pub mod apply;
pub mod command;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod query;
pub mod service;
pub mod telemetry;

pub use apply::{Applied, ApplyError, MutationApplier};
pub use command::{
    AsyncCommandGateway, CommandAck, CommandGateway, CreateProductRequest, GatewayMetrics,
    GatewayMetricsSnapshot, PublishReceipt, SyncCommandGateway, UpdateProductRequest,
};
pub use config::{CacheBackendConfig, ServiceConfig};
pub use consumer::{
    ConsumerConfig, ConsumerMetrics, ConsumerMetricsSnapshot, ConsumerSet, MutationConsumer,
};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use query::QueryGateway;
pub use service::WarehouseService;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
