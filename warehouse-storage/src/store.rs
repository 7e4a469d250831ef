//! Async product store trait.
//!
//! Every operation takes an [`OpContext`] and must stop waiting, without
//! side effects, once that context is cancelled or past its deadline.
//! Returned products are always independent copies of stored state.

use std::sync::Arc;

use ::async_trait::async_trait;
use warehouse_core::{Product, ProductId, StoreError};

use crate::context::OpContext;

/// Keyed product storage.
#[async_trait]
pub trait ProductStore: Send + Sync {
    // ========================================================================
    // READS
    // ========================================================================

    /// Get a product by id.
    async fn get_product_by_id(&self, ctx: &OpContext, id: ProductId) -> Result<Product, StoreError>;

    /// List one page of products ordered by ascending id.
    ///
    /// `page` and `size` are raw request values; zero means first page and
    /// default size respectively. A page past the end is empty, not an error.
    async fn get_all_products(
        &self,
        ctx: &OpContext,
        page: u64,
        size: u64,
    ) -> Result<Vec<Product>, StoreError>;

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store a new product and return it with its assigned id.
    ///
    /// Fails with [`StoreError::IdAlreadySet`] if the product already
    /// carries an id.
    async fn create_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError>;

    /// Replace an existing product wholesale.
    async fn update_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError>;

    /// Remove a product.
    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: ProductStore + ?Sized> ProductStore for Arc<S> {
    async fn get_product_by_id(&self, ctx: &OpContext, id: ProductId) -> Result<Product, StoreError> {
        (**self).get_product_by_id(ctx, id).await
    }

    async fn get_all_products(
        &self,
        ctx: &OpContext,
        page: u64,
        size: u64,
    ) -> Result<Vec<Product>, StoreError> {
        (**self).get_all_products(ctx, page, size).await
    }

    async fn create_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        (**self).create_product(ctx, product).await
    }

    async fn update_product(&self, ctx: &OpContext, product: Product) -> Result<Product, StoreError> {
        (**self).update_product(ctx, product).await
    }

    async fn delete_product(&self, ctx: &OpContext, id: ProductId) -> Result<(), StoreError> {
        (**self).delete_product(ctx, id).await
    }
}

/// Point-in-time store diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatistics {
    pub product_count: usize,
    /// Highest id handed out so far; zero if none.
    pub last_assigned_id: ProductId,
    pub admission_capacity: usize,
    pub available_slots: usize,
}
