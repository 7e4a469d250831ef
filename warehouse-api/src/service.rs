//! Service wiring.
//!
//! [`WarehouseService`] owns one instance of every collaborator and hands
//! out the gateways built on top of them. Nothing here is global: tests build
//! as many isolated services as they like.

use std::sync::Arc;

use tokio::sync::watch;
use warehouse_core::{GatewayStrategy, WarehouseConfig};
use warehouse_events::{Broker, InMemoryBroker};
use warehouse_storage::{
    CacheAside, CacheBackend, CacheConfig, ConcurrencyGuardedStore, InMemoryCacheBackend,
    LmdbCacheBackend, ProductStore,
};

use crate::apply::MutationApplier;
use crate::command::{AsyncCommandGateway, CommandGateway, SyncCommandGateway};
use crate::config::{CacheBackendConfig, ServiceConfig};
use crate::consumer::{ConsumerConfig, ConsumerSet};
use crate::error::{ApiError, ApiResult};
use crate::query::QueryGateway;

/// Store, cache and broker plus the gateways that use them.
#[derive(Clone)]
pub struct WarehouseService {
    config: WarehouseConfig,
    store: Arc<dyn ProductStore>,
    cache: Arc<CacheAside>,
    broker: Arc<dyn Broker>,
    applier: Arc<MutationApplier>,
    commands: Arc<dyn CommandGateway>,
    queries: Arc<QueryGateway>,
}

impl WarehouseService {
    pub fn new(
        config: WarehouseConfig,
        store: Arc<dyn ProductStore>,
        cache_backend: Arc<dyn CacheBackend>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let cache = Arc::new(CacheAside::new(cache_backend, CacheConfig::from_config(&config)));
        let applier = Arc::new(MutationApplier::from_config(
            Arc::clone(&store),
            Arc::clone(&cache),
            &config,
        ));

        let commands: Arc<dyn CommandGateway> = match config.gateway_strategy {
            GatewayStrategy::Async => Arc::new(AsyncCommandGateway::from_config(Arc::clone(&broker), &config)),
            GatewayStrategy::Sync => Arc::new(SyncCommandGateway::from_config(Arc::clone(&applier), &config)),
        };
        let queries = Arc::new(QueryGateway::from_config(
            Arc::clone(&store),
            Arc::clone(&cache),
            &config,
        ));

        Self {
            config,
            store,
            cache,
            broker,
            applier,
            commands,
            queries,
        }
    }

    /// Guarded in-memory store, in-memory cache and in-memory broker.
    pub fn in_memory(config: WarehouseConfig) -> Self {
        let store = Arc::new(ConcurrencyGuardedStore::from_config(&config));
        let broker = Arc::new(InMemoryBroker::new(config.broker_partitions));
        Self::new(config, store, Arc::new(InMemoryCacheBackend::new()), broker)
    }

    /// Build the service the binary runs, choosing the cache backend from
    /// `config`.
    pub fn from_service_config(config: &ServiceConfig) -> ApiResult<Self> {
        let warehouse = config.warehouse.clone();
        let cache_backend: Arc<dyn CacheBackend> = match &config.cache_backend {
            CacheBackendConfig::InMemory => Arc::new(InMemoryCacheBackend::new()),
            CacheBackendConfig::Lmdb { path, map_size_mb } => Arc::new(
                LmdbCacheBackend::new(path, *map_size_mb).map_err(|e| {
                    ApiError::internal_error(format!(
                        "Failed to open cache at {}: {}",
                        path.display(),
                        e
                    ))
                })?,
            ),
        };
        let store = Arc::new(ConcurrencyGuardedStore::from_config(&warehouse));
        let broker = Arc::new(InMemoryBroker::new(warehouse.broker_partitions));
        Ok(Self::new(warehouse, store, cache_backend, broker))
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    pub fn strategy(&self) -> GatewayStrategy {
        self.config.gateway_strategy
    }

    pub fn commands(&self) -> &Arc<dyn CommandGateway> {
        &self.commands
    }

    pub fn queries(&self) -> &Arc<QueryGateway> {
        &self.queries
    }

    pub fn applier(&self) -> &Arc<MutationApplier> {
        &self.applier
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheAside> {
        &self.cache
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Start the per-kind mutation consumers.
    pub fn spawn_consumers(&self, shutdown: watch::Receiver<bool>) -> ConsumerSet {
        ConsumerSet::spawn(
            Arc::clone(&self.broker),
            Arc::clone(&self.applier),
            ConsumerConfig::from_config(&self.config),
            shutdown,
        )
    }
}
