//! Applying mutations to the store and refreshing the cache.
//!
//! Shared by the synchronous command gateway, which applies inline, and by
//! the mutation consumers, which apply what they receive from the broker.
//! Store writes and cache writes are separate steps so a consumer can commit
//! its offset in between.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use warehouse_core::{Product, ProductId, StoreError, ValidationError, WarehouseConfig};
use warehouse_events::Mutation;
use warehouse_storage::{CacheAside, CacheKey, OpContext, ProductStore};

use crate::error::ApiError;

/// Why a mutation could not be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    /// Whether applying the same mutation again may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ApplyError::Invalid(_) => false,
            ApplyError::Store(e) => e.is_transient(),
        }
    }
}

impl From<ApplyError> for ApiError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Invalid(e) => e.into(),
            ApplyError::Store(e) => e.into(),
        }
    }
}

/// What a successful apply changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Created(Product),
    Updated(Product),
    Deleted(ProductId),
}

impl Applied {
    pub fn product_id(&self) -> ProductId {
        match self {
            Applied::Created(p) | Applied::Updated(p) => p.id(),
            Applied::Deleted(id) => *id,
        }
    }

    pub fn product(&self) -> Option<&Product> {
        match self {
            Applied::Created(p) | Applied::Updated(p) => Some(p),
            Applied::Deleted(_) => None,
        }
    }

    pub fn into_product(self) -> Option<Product> {
        match self {
            Applied::Created(p) | Applied::Updated(p) => Some(p),
            Applied::Deleted(_) => None,
        }
    }
}

/// Writes mutations to a [`ProductStore`] and mirrors them into the cache.
pub struct MutationApplier {
    store: Arc<dyn ProductStore>,
    cache: Arc<CacheAside>,
    apply_timeout: Duration,
}

impl MutationApplier {
    pub fn new(store: Arc<dyn ProductStore>, cache: Arc<CacheAside>, apply_timeout: Duration) -> Self {
        Self {
            store,
            cache,
            apply_timeout,
        }
    }

    pub fn from_config(
        store: Arc<dyn ProductStore>,
        cache: Arc<CacheAside>,
        config: &WarehouseConfig,
    ) -> Self {
        Self::new(store, cache, config.apply_timeout)
    }

    pub fn store(&self) -> &Arc<dyn ProductStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheAside> {
        &self.cache
    }

    pub fn apply_timeout(&self) -> Duration {
        self.apply_timeout
    }

    /// Write `mutation` to the store.
    ///
    /// The store call runs under a child of `ctx` bounded by the apply
    /// timeout. The cache is not touched; see [`refresh_cache`](Self::refresh_cache).
    pub async fn apply(&self, ctx: &OpContext, mutation: &Mutation) -> Result<Applied, ApplyError> {
        let ctx = ctx.child_with_timeout(self.apply_timeout);

        let applied = match mutation {
            Mutation::Create {
                name,
                price,
                quantity,
            } => {
                let product = Product::new(name.clone(), *price, *quantity)?;
                Applied::Created(self.store.create_product(&ctx, product).await?)
            }
            Mutation::Update {
                id,
                name,
                price,
                quantity,
            } => {
                let product = Product::with_id(*id, name.clone(), *price, *quantity)?;
                Applied::Updated(self.store.update_product(&ctx, product).await?)
            }
            Mutation::Delete { id } => {
                self.store.delete_product(&ctx, *id).await?;
                Applied::Deleted(*id)
            }
        };

        debug!(product_id = %applied.product_id(), kind = %mutation.kind(), "Mutation applied to store");
        Ok(applied)
    }

    /// Mirror an applied mutation into the cache.
    ///
    /// Creates and updates overwrite the entity entry; deletes remove it.
    /// List pages are left to expire. Failures are logged and reported by
    /// the return value but never retried.
    pub async fn refresh_cache(&self, ctx: &OpContext, applied: &Applied) -> bool {
        let ctx = ctx.child_with_timeout(self.apply_timeout);
        let key = CacheKey::entity(applied.product_id());

        let result = match applied {
            Applied::Created(product) | Applied::Updated(product) => {
                self.cache.put(&ctx, &key, product).await
            }
            Applied::Deleted(_) => self.cache.invalidate(&ctx, &key).await,
        };

        match result {
            Ok(()) => true,
            Err(err) => {
                warn!(cache_key = %key, error = %err, "Cache refresh after apply failed");
                false
            }
        }
    }
}
