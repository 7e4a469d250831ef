//! Command gateway.
//!
//! One [`CommandGateway`] interface with two strategies:
//!
//! - [`AsyncCommandGateway`] validates, publishes a [`MutationEvent`] and
//!   returns as soon as the broker acknowledges. Persistence happens later in
//!   a consumer.
//! - [`SyncCommandGateway`] validates and applies to the store inline,
//!   returning the authoritative product.
//!
//! Both validate every field and report all violations together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use warehouse_core::{Product, ProductId, ValidationError, WarehouseConfig};
use warehouse_events::{encode, Broker, EventMetadata, Mutation, MutationEvent};
use warehouse_storage::OpContext;

use crate::apply::MutationApplier;
use crate::error::{ApiError, ApiResult, ErrorCode};

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub price: u64,
    pub quantity: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateProductRequest {
    pub id: ProductId,
    pub name: String,
    pub price: u64,
    pub quantity: u64,
}

impl TryFrom<CreateProductRequest> for Mutation {
    type Error = ValidationError;

    fn try_from(req: CreateProductRequest) -> Result<Self, Self::Error> {
        Mutation::create(req.name, req.price, req.quantity)
    }
}

impl TryFrom<UpdateProductRequest> for Mutation {
    type Error = ValidationError;

    fn try_from(req: UpdateProductRequest) -> Result<Self, Self::Error> {
        Mutation::update(req.id, req.name, req.price, req.quantity)
    }
}

// ============================================================================
// ACKNOWLEDGMENT
// ============================================================================

/// Where an accepted mutation was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub event_id: Uuid,
    pub trace_id: Uuid,
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAck {
    /// Published; the store has not necessarily seen it yet.
    Accepted(PublishReceipt),
    /// Applied to the store. Deletes carry no product.
    Applied(Option<Product>),
}

impl CommandAck {
    pub fn is_applied(&self) -> bool {
        matches!(self, CommandAck::Applied(_))
    }

    pub fn receipt(&self) -> Option<&PublishReceipt> {
        match self {
            CommandAck::Accepted(receipt) => Some(receipt),
            CommandAck::Applied(_) => None,
        }
    }

    pub fn product(&self) -> Option<&Product> {
        match self {
            CommandAck::Applied(product) => product.as_ref(),
            CommandAck::Accepted(_) => None,
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Request counters for a gateway.
///
/// `unsuccessful` counts requests rejected with a domain error the caller
/// caused; `failed` counts requests the service could not complete.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    pub incoming: AtomicU64,
    pub successful: AtomicU64,
    pub unsuccessful: AtomicU64,
    pub failed: AtomicU64,
    pub outgoing: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GatewayMetricsSnapshot {
        GatewayMetricsSnapshot {
            incoming: self.incoming.load(Ordering::Relaxed),
            successful: self.successful.load(Ordering::Relaxed),
            unsuccessful: self.unsuccessful.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            outgoing: self.outgoing.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record<T>(&self, result: &ApiResult<T>) {
        match result {
            Ok(_) => self.successful.fetch_add(1, Ordering::Relaxed),
            Err(e) if matches!(e.code, ErrorCode::Unavailable | ErrorCode::Internal) => {
                self.failed.fetch_add(1, Ordering::Relaxed)
            }
            Err(_) => self.unsuccessful.fetch_add(1, Ordering::Relaxed),
        };
        self.outgoing.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of gateway counters at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    pub incoming: u64,
    pub successful: u64,
    pub unsuccessful: u64,
    pub failed: u64,
    pub outgoing: u64,
}

// ============================================================================
// GATEWAY TRAIT
// ============================================================================

#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn create_product(&self, ctx: &OpContext, req: CreateProductRequest) -> ApiResult<CommandAck>;

    async fn update_product(&self, ctx: &OpContext, req: UpdateProductRequest) -> ApiResult<CommandAck>;

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> ApiResult<CommandAck>;

    fn metrics(&self) -> GatewayMetricsSnapshot;
}

// ============================================================================
// ASYNC STRATEGY
// ============================================================================

/// Publishes mutations to the broker.
pub struct AsyncCommandGateway {
    broker: Arc<dyn Broker>,
    publish_timeout: Duration,
    metrics: GatewayMetrics,
}

impl AsyncCommandGateway {
    pub fn new(broker: Arc<dyn Broker>, publish_timeout: Duration) -> Self {
        Self {
            broker,
            publish_timeout,
            metrics: GatewayMetrics::new(),
        }
    }

    pub fn from_config(broker: Arc<dyn Broker>, config: &WarehouseConfig) -> Self {
        Self::new(broker, config.operation_timeout)
    }

    /// Publish with a fresh trace id.
    pub async fn submit(&self, ctx: &OpContext, mutation: Mutation) -> ApiResult<CommandAck> {
        self.submit_traced(ctx, mutation, Uuid::now_v7()).await
    }

    /// Publish under a caller-supplied trace id.
    pub async fn submit_traced(
        &self,
        ctx: &OpContext,
        mutation: Mutation,
        trace_id: Uuid,
    ) -> ApiResult<CommandAck> {
        let event = MutationEvent::with_metadata(mutation, EventMetadata::with_trace(trace_id));
        let payload = encode(&event)?;
        let topic = event.topic();
        let key = event.partition_key();

        let publish_ctx = ctx.child_with_timeout(self.publish_timeout);
        let ack = publish_ctx
            .run(self.broker.publish(topic, &key, payload))
            .await
            .map_err(|reason| ApiError::unavailable(format!("publish to {topic} aborted: {reason}")))??;

        info!(
            event_id = %event.event_id(),
            trace_id = %event.metadata.trace_id,
            topic,
            partition = ack.partition,
            offset = ack.offset,
            "Mutation published"
        );

        Ok(CommandAck::Accepted(PublishReceipt {
            event_id: event.event_id(),
            trace_id: event.metadata.trace_id,
            topic: topic.to_string(),
            partition: ack.partition,
            offset: ack.offset,
        }))
    }

    async fn handle(&self, ctx: &OpContext, mutation: Result<Mutation, ValidationError>) -> ApiResult<CommandAck> {
        self.metrics.incoming.fetch_add(1, Ordering::Relaxed);
        let result = match mutation {
            Ok(mutation) => self.submit(ctx, mutation).await,
            Err(e) => Err(e.into()),
        };
        self.metrics.record(&result);
        result
    }
}

#[async_trait]
impl CommandGateway for AsyncCommandGateway {
    async fn create_product(&self, ctx: &OpContext, req: CreateProductRequest) -> ApiResult<CommandAck> {
        self.handle(ctx, req.try_into()).await
    }

    async fn update_product(&self, ctx: &OpContext, req: UpdateProductRequest) -> ApiResult<CommandAck> {
        self.handle(ctx, req.try_into()).await
    }

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> ApiResult<CommandAck> {
        self.handle(ctx, Ok(Mutation::delete(id))).await
    }

    fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }
}

// ============================================================================
// SYNC STRATEGY
// ============================================================================

/// Applies mutations to the store before returning.
///
/// The store call is a gateway call, so it is bounded by the operation
/// timeout rather than the consumers' longer apply timeout.
pub struct SyncCommandGateway {
    applier: Arc<MutationApplier>,
    operation_timeout: Duration,
    metrics: GatewayMetrics,
}

impl SyncCommandGateway {
    pub fn new(applier: Arc<MutationApplier>, operation_timeout: Duration) -> Self {
        Self {
            applier,
            operation_timeout,
            metrics: GatewayMetrics::new(),
        }
    }

    pub fn from_config(applier: Arc<MutationApplier>, config: &WarehouseConfig) -> Self {
        Self::new(applier, config.operation_timeout)
    }

    async fn handle(&self, ctx: &OpContext, mutation: Result<Mutation, ValidationError>) -> ApiResult<CommandAck> {
        self.metrics.incoming.fetch_add(1, Ordering::Relaxed);
        let result = match mutation {
            Ok(mutation) => self.apply(ctx, &mutation).await,
            Err(e) => Err(e.into()),
        };
        self.metrics.record(&result);
        result
    }

    async fn apply(&self, ctx: &OpContext, mutation: &Mutation) -> ApiResult<CommandAck> {
        let applied = self
            .applier
            .apply(&ctx.child_with_timeout(self.operation_timeout), mutation)
            .await?;
        self.applier.refresh_cache(ctx, &applied).await;
        debug!(product_id = %applied.product_id(), kind = %mutation.kind(), "Mutation applied inline");
        Ok(CommandAck::Applied(applied.into_product()))
    }
}

#[async_trait]
impl CommandGateway for SyncCommandGateway {
    async fn create_product(&self, ctx: &OpContext, req: CreateProductRequest) -> ApiResult<CommandAck> {
        self.handle(ctx, req.try_into()).await
    }

    async fn update_product(&self, ctx: &OpContext, req: UpdateProductRequest) -> ApiResult<CommandAck> {
        self.handle(ctx, req.try_into()).await
    }

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> ApiResult<CommandAck> {
        self.handle(ctx, Ok(Mutation::delete(id))).await
    }

    fn metrics(&self) -> GatewayMetricsSnapshot {
        self.metrics.snapshot()
    }
}
