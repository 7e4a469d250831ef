//! Warehouse Core - Entity Types
//!
//! Pure data structures and validation with no I/O. All other crates depend
//! on this one.

pub mod config;
pub mod error;
pub mod lock;
pub mod pagination;
pub mod product;

pub use config::{GatewayStrategy, WarehouseConfig};
pub use error::{
    BrokerError, CacheError, CancelReason, CodecError, ConfigError, FieldViolation, StoreError,
    ValidationError, WarehouseError, WarehouseResult,
};
pub use lock::LockMode;
pub use pagination::{PageRequest, DEFAULT_PAGE_SIZE};
pub use product::{
    validate_name, validate_price, validate_product_fields, validate_quantity, Product, ProductId,
};
