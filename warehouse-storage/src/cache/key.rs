//! Typed cache keys.
//!
//! `CacheKey` can only be built from a product id or a normalized page
//! request, so every key in the cache has one of two known shapes and a
//! writer can never produce a key a reader would not recognize.
//!
//! # Text Format
//!
//! - `entity:<id>` for a single product
//! - `query:<page>:<size>` for a list page
//!
//! Page keys are built from a [`PageRequest`], which is already
//! normalized, so `(0, 0)` and `(1, default)` share one key.

use std::fmt;

use warehouse_core::{PageRequest, ProductId};

const ENTITY_PREFIX: &str = "entity";
const QUERY_PREFIX: &str = "query";
const SEPARATOR: char = ':';

/// What a key caches. Selects the TTL class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKeyKind {
    Entity,
    Page,
}

/// A cache key for a product or a product page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
    rendered: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKeyInner {
    Entity(ProductId),
    Page(PageRequest),
}

impl CacheKey {
    /// Key for a single product.
    pub fn entity(id: ProductId) -> Self {
        Self {
            inner: CacheKeyInner::Entity(id),
            rendered: format!("{ENTITY_PREFIX}{SEPARATOR}{id}"),
        }
    }

    /// Key for one page of the product list.
    pub fn page(request: PageRequest) -> Self {
        Self {
            inner: CacheKeyInner::Page(request),
            rendered: format!(
                "{QUERY_PREFIX}{SEPARATOR}{}{SEPARATOR}{}",
                request.page(),
                request.size()
            ),
        }
    }

    pub fn kind(&self) -> CacheKeyKind {
        match self.inner {
            CacheKeyInner::Entity(_) => CacheKeyKind::Entity,
            CacheKeyInner::Page(_) => CacheKeyKind::Page,
        }
    }

    /// The product id, for entity keys.
    pub fn product_id(&self) -> Option<ProductId> {
        match self.inner {
            CacheKeyInner::Entity(id) => Some(id),
            CacheKeyInner::Page(_) => None,
        }
    }

    /// The page request, for page keys.
    pub fn page_request(&self) -> Option<PageRequest> {
        match self.inner {
            CacheKeyInner::Page(request) => Some(request),
            CacheKeyInner::Entity(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.rendered.as_bytes()
    }

    /// Parse a key from its text form.
    ///
    /// Returns `None` for anything that is not exactly one of the two
    /// shapes, including page keys with a zero page or size.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split(SEPARATOR);
        let key = match (parts.next()?, parts.next(), parts.next()) {
            (ENTITY_PREFIX, Some(id), None) => Self::entity(ProductId::new(id.parse().ok()?)),
            (QUERY_PREFIX, Some(page), Some(size)) => {
                let page: u64 = page.parse().ok()?;
                let size: u64 = size.parse().ok()?;
                if page == 0 || size == 0 {
                    return None;
                }
                Self::page(PageRequest::new(page, size))
            }
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_entity_key_format() {
        let key = CacheKey::entity(ProductId::new(42));
        assert_eq!(key.as_str(), "entity:42");
        assert_eq!(key.kind(), CacheKeyKind::Entity);
        assert_eq!(key.product_id(), Some(ProductId::new(42)));
        assert_eq!(key.page_request(), None);
    }

    #[test]
    fn test_page_key_uses_normalized_request() {
        let key = CacheKey::page(PageRequest::new(0, 0));
        assert_eq!(key.as_str(), "query:1:20");
        assert_eq!(key, CacheKey::page(PageRequest::new(1, 20)));
        assert_eq!(key.kind(), CacheKeyKind::Page);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in [
            "",
            "entity",
            "entity:",
            "entity:x",
            "entity:1:2",
            "query:1",
            "query:0:5",
            "query:1:0",
            "query:1:2:3",
            "product:1",
        ] {
            assert!(CacheKey::parse(text).is_none(), "accepted {text:?}");
        }
    }

    #[test]
    fn test_parse_accepts_rendered_keys() {
        assert_eq!(
            CacheKey::parse("entity:7"),
            Some(CacheKey::entity(ProductId::new(7)))
        );
        assert_eq!(
            CacheKey::parse("query:3:10"),
            Some(CacheKey::page(PageRequest::new(3, 10)))
        );
    }

    #[test]
    fn test_entity_and_page_keys_never_collide() {
        let entity = CacheKey::entity(ProductId::new(1));
        let page = CacheKey::page(PageRequest::new(1, 1));
        assert_ne!(entity.as_str(), page.as_str());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Every rendered key parses back to itself.
        #[test]
        fn prop_rendered_key_parses(id in any::<u64>(), page in 0u64..1000, size in 0u64..1000) {
            let entity = CacheKey::entity(ProductId::new(id));
            prop_assert_eq!(CacheKey::parse(entity.as_str()), Some(entity.clone()));

            let paged = CacheKey::page(PageRequest::new(page, size));
            prop_assert_eq!(CacheKey::parse(paged.as_str()), Some(paged.clone()));
        }
    }
}
