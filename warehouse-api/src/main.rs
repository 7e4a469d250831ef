//! Warehouse API Service Entry Point
//!
//! Loads configuration, initializes tracing, wires the store, cache and
//! broker, and runs the mutation consumers until interrupted.

use tokio::sync::watch;
use warehouse_api::{init_tracing, ApiResult, ServiceConfig, WarehouseService};
use warehouse_core::GatewayStrategy;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let config = ServiceConfig::from_env()?;
    init_tracing(&config.telemetry)?;

    let service = WarehouseService::from_service_config(&config)?;
    tracing::info!(
        strategy = %service.strategy(),
        admission_capacity = config.warehouse.admission_capacity,
        partitions = config.warehouse.broker_partitions,
        cache = ?config.cache_backend,
        "Starting warehouse service"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumers = match service.strategy() {
        GatewayStrategy::Async => Some(service.spawn_consumers(shutdown_rx)),
        GatewayStrategy::Sync => None,
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    if let Some(consumers) = consumers {
        tokio::select! {
            results = consumers.join() => {
                for (kind, snapshot) in results {
                    tracing::info!(%kind, applied = snapshot.applied, dropped = snapshot.dropped, "Consumer drained");
                }
            }
            _ = tokio::time::sleep(config.shutdown_grace) => {
                tracing::warn!(grace_secs = config.shutdown_grace.as_secs(), "Consumers did not stop in time");
            }
        }
    }

    let stats = service.queries().cache_stats().await;
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        errors = stats.errors,
        hit_rate = stats.hit_rate(),
        "Warehouse service stopped"
    );
    Ok(())
}
