//! Product entity and field validation.
//!
//! A `Product` can only be built through validating constructors, so an
//! instance that violates a field constraint cannot exist in memory, on the
//! wire, or in a store. Deserialization goes through the same checks.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FieldViolation, ValidationError};

// ============================================================================
// PRODUCT ID
// ============================================================================

/// Identifier assigned by a store on creation.
///
/// Zero means "not yet assigned". Stores hand out ids from a monotonic
/// counter and never reuse one, even after the product is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(u64);

impl ProductId {
    /// The sentinel for a product that has not been persisted yet.
    pub const UNASSIGNED: ProductId = ProductId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns true if a store has assigned this id.
    pub const fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ProductId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// ============================================================================
// FIELD VALIDATION
// ============================================================================

/// Check a product name.
pub fn validate_name(name: &str) -> Result<(), FieldViolation> {
    if name.is_empty() {
        return Err(FieldViolation::EmptyName);
    }
    Ok(())
}

/// Check a product price.
pub fn validate_price(price: u64) -> Result<(), FieldViolation> {
    if price == 0 {
        return Err(FieldViolation::ZeroPrice);
    }
    Ok(())
}

/// Check a product quantity.
pub fn validate_quantity(quantity: u64) -> Result<(), FieldViolation> {
    if quantity == 0 {
        return Err(FieldViolation::ZeroQuantity);
    }
    Ok(())
}

/// Check all product fields, collecting every violation.
///
/// Violations are reported in the fixed order name, price, quantity so the
/// combined diagnostic is deterministic.
pub fn validate_product_fields(name: &str, price: u64, quantity: u64) -> Result<(), ValidationError> {
    let violations: Vec<FieldViolation> = [
        validate_name(name),
        validate_price(price),
        validate_quantity(quantity),
    ]
    .into_iter()
    .filter_map(Result::err)
    .collect();

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(violations))
    }
}

// ============================================================================
// PRODUCT
// ============================================================================

/// A named, priced, counted catalog entry.
///
/// Fields are private; getters return copies or borrows, and setters
/// validate before mutating so a rejected value leaves the product
/// unchanged. Stores keep their own instances and only ever hand out
/// clones, so mutating a returned product cannot reach stored state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ProductFields")]
pub struct Product {
    id: ProductId,
    name: String,
    price: u64,
    quantity: u64,
}

/// Unvalidated mirror of `Product` used for deserialization.
#[derive(Deserialize)]
struct ProductFields {
    #[serde(default)]
    id: ProductId,
    name: String,
    price: u64,
    quantity: u64,
}

impl TryFrom<ProductFields> for Product {
    type Error = ValidationError;

    fn try_from(fields: ProductFields) -> Result<Self, Self::Error> {
        Product::with_id(fields.id, fields.name, fields.price, fields.quantity)
    }
}

impl Product {
    /// Build a product that has not been assigned an id yet.
    pub fn new(name: impl Into<String>, price: u64, quantity: u64) -> Result<Self, ValidationError> {
        Self::with_id(ProductId::UNASSIGNED, name, price, quantity)
    }

    /// Build a product carrying an explicit id.
    pub fn with_id(
        id: ProductId,
        name: impl Into<String>,
        price: u64,
        quantity: u64,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        validate_product_fields(&name, price, quantity)?;
        Ok(Self {
            id,
            name,
            price,
            quantity,
        })
    }

    pub fn id(&self) -> ProductId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> u64 {
        self.price
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// Return a copy of this product carrying `id`.
    ///
    /// Used by stores when assigning an id on creation.
    pub fn assigned(&self, id: ProductId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), ValidationError> {
        let name = name.into();
        validate_name(&name).map_err(ValidationError::single)?;
        self.name = name;
        Ok(())
    }

    pub fn set_price(&mut self, price: u64) -> Result<(), ValidationError> {
        validate_price(price).map_err(ValidationError::single)?;
        self.price = price;
        Ok(())
    }

    pub fn set_quantity(&mut self, quantity: u64) -> Result<(), ValidationError> {
        validate_quantity(quantity).map_err(ValidationError::single)?;
        self.quantity = quantity;
        Ok(())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] name:{} price:{} quantity:{}",
            self.id, self.name, self.price, self.quantity
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
