//! Content store access.
//!
//! The store is the host's post/product repository. Every call takes the
//! [`SiteContext`] of the site being queried, so a store never has to guess
//! which site is active.

mod memory;
mod mysql;

pub use memory::MemoryStore;
pub use mysql::MySqlStore;

use crate::context::SiteContext;
use crate::error::StoreError;
use crate::model::PageRef;
use async_trait::async_trait;
use url::Url;

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look up a published page by its id on the context's site.
    async fn find_by_id(&self, ctx: &SiteContext, page_id: u64)
        -> Result<Option<PageRef>, StoreError>;

    /// First published product with this SKU, in the store's natural order.
    async fn find_by_sku(&self, ctx: &SiteContext, sku: &str)
        -> Result<Option<PageRef>, StoreError>;

    /// First published page of any type with this slug.
    async fn find_by_slug(&self, ctx: &SiteContext, slug: &str)
        -> Result<Option<PageRef>, StoreError>;

    /// Public URL of a page on the context's site.
    async fn permalink(&self, ctx: &SiteContext, page: &PageRef) -> Result<Url, StoreError>;
}

/// Pretty-permalink layout: front pages at the site
/// root, products under `product_base`, everything else at `/{slug}/`.
pub(crate) fn pretty_permalink(
    ctx: &SiteContext,
    page: &PageRef,
    product_base: &str,
) -> Result<Url, StoreError> {
    use crate::model::PageType;

    let base = &ctx.site().base_url;
    let product_base = product_base.trim_matches('/');
    let path = match page.page_type {
        PageType::Front => return Ok(base.clone()),
        PageType::Product if !product_base.is_empty() => {
            format!("{}/{}/", product_base, page.slug)
        }
        PageType::Product | PageType::Generic => format!("{}/", page.slug.trim_matches('/')),
    };

    base.join(&path)
        .map_err(|e| StoreError::Query(format!("cannot build permalink for '{}': {}", page.slug, e)))
}
