use super::{pretty_permalink, ContentStore};
use crate::context::SiteContext;
use crate::error::StoreError;
use crate::model::{PageRef, PageType, SiteId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

/// In-memory content store. Pages keep insertion order, which is the
/// "natural order" used to break ties between several matches.
#[derive(Clone)]
pub struct MemoryStore {
    pages: Arc<RwLock<Vec<PageRef>>>,
    failing: Arc<RwLock<HashSet<SiteId>>>,
    delays: Arc<RwLock<HashMap<SiteId, Duration>>>,
    queries: Arc<RwLock<HashMap<SiteId, Arc<AtomicUsize>>>>,
    product_base: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            pages: Arc::default(),
            failing: Arc::default(),
            delays: Arc::default(),
            queries: Arc::default(),
            product_base: "product".to_string(),
        }
    }

    /// Load pages from a JSON array of page objects.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let pages: Vec<PageRef> = serde_json::from_str(json)?;
        let store = Self::new();
        for page in pages {
            store.insert(page);
        }
        Ok(store)
    }

    pub fn insert(&self, page: PageRef) {
        if let Ok(mut pages) = self.pages.write() {
            pages.push(page);
        }
    }

    /// Make every query against `site` fail as if its database were down.
    pub fn fail_site(&self, site: SiteId) {
        if let Ok(mut failing) = self.failing.write() {
            failing.insert(site);
        }
    }

    pub fn recover_site(&self, site: SiteId) {
        if let Ok(mut failing) = self.failing.write() {
            failing.remove(&site);
        }
    }

    /// Delay every query against `site`.
    pub fn delay_site(&self, site: SiteId, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(site, delay);
        }
    }

    /// Number of queries issued against `site` so far.
    pub fn query_count(&self, site: SiteId) -> usize {
        self.queries
            .read()
            .ok()
            .and_then(|q| q.get(&site).map(|c| c.load(Ordering::Relaxed)))
            .unwrap_or(0)
    }

    async fn begin_query(&self, site: SiteId) -> Result<(), StoreError> {
        if let Ok(mut queries) = self.queries.write() {
            queries
                .entry(site)
                .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                .fetch_add(1, Ordering::Relaxed);
        }

        let delay = self.delays.read().ok().and_then(|d| d.get(&site).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .read()
            .map(|f| f.contains(&site))
            .unwrap_or(false);
        if failing {
            return Err(StoreError::Query(format!("site {} is unavailable", site)));
        }
        Ok(())
    }

    fn find(&self, site: SiteId, pred: impl Fn(&PageRef) -> bool) -> Option<PageRef> {
        self.pages
            .read()
            .ok()?
            .iter()
            .find(|p| p.site_id == site && pred(*p))
            .cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_by_id(
        &self,
        ctx: &SiteContext,
        page_id: u64,
    ) -> Result<Option<PageRef>, StoreError> {
        self.begin_query(ctx.site_id()).await?;
        Ok(self.find(ctx.site_id(), |p| {
            p.page_id == page_id && p.page_type != PageType::Front
        }))
    }

    async fn find_by_sku(&self, ctx: &SiteContext, sku: &str) -> Result<Option<PageRef>, StoreError> {
        self.begin_query(ctx.site_id()).await?;
        Ok(self.find(ctx.site_id(), |p| {
            p.page_type == PageType::Product && p.sku.as_deref() == Some(sku)
        }))
    }

    async fn find_by_slug(
        &self,
        ctx: &SiteContext,
        slug: &str,
    ) -> Result<Option<PageRef>, StoreError> {
        self.begin_query(ctx.site_id()).await?;
        Ok(self.find(ctx.site_id(), |p| {
            p.page_type != PageType::Front && p.slug == slug
        }))
    }

    async fn permalink(&self, ctx: &SiteContext, page: &PageRef) -> Result<Url, StoreError> {
        self.begin_query(ctx.site_id()).await?;
        pretty_permalink(ctx, page, &self.product_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextRegister;
    use crate::model::Site;

    fn site(id: u64) -> Site {
        Site::new(
            id,
            Url::parse(&format!("https://example.com/s{}/", id)).unwrap(),
            "en-US",
        )
    }

    fn page(site: u64, id: u64, page_type: PageType, sku: Option<&str>, slug: &str) -> PageRef {
        PageRef {
            site_id: SiteId(site),
            page_id: id,
            page_type,
            sku: sku.map(str::to_string),
            slug: slug.to_string(),
        }
    }

    #[tokio::test]
    async fn test_find_by_sku_first_match_wins() {
        let store = MemoryStore::new();
        store.insert(page(2, 20, PageType::Product, Some("MUG"), "mug-blue"));
        store.insert(page(2, 21, PageType::Product, Some("MUG"), "mug-red"));
        store.insert(page(1, 10, PageType::Product, Some("MUG"), "mug"));

        let register = ContextRegister::new();
        let ctx = register.enter(&site(2)).await;
        let found = store.find_by_sku(&ctx, "MUG").await.unwrap().unwrap();
        assert_eq!(found.page_id, 20);
    }

    #[tokio::test]
    async fn test_find_by_sku_ignores_non_products() {
        let store = MemoryStore::new();
        store.insert(page(1, 10, PageType::Generic, Some("MUG"), "mug"));

        let register = ContextRegister::new();
        let ctx = register.enter(&site(1)).await;
        assert!(store.find_by_sku(&ctx, "MUG").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_slug_scoped_to_site() {
        let store = MemoryStore::new();
        store.insert(page(1, 10, PageType::Generic, None, "about"));

        let register = ContextRegister::new();
        let ctx = register.enter(&site(2)).await;
        assert!(store.find_by_slug(&ctx, "about").await.unwrap().is_none());
        drop(ctx);

        let ctx = register.enter(&site(1)).await;
        assert_eq!(store.find_by_slug(&ctx, "about").await.unwrap().unwrap().page_id, 10);
    }

    #[tokio::test]
    async fn test_permalink_layout() {
        let store = MemoryStore::new();
        let register = ContextRegister::new();
        let ctx = register.enter(&site(3)).await;

        let about = page(3, 1, PageType::Generic, None, "about");
        let mug = page(3, 2, PageType::Product, Some("MUG"), "mug");

        assert_eq!(
            store.permalink(&ctx, &about).await.unwrap().as_str(),
            "https://example.com/s3/about/"
        );
        assert_eq!(
            store.permalink(&ctx, &mug).await.unwrap().as_str(),
            "https://example.com/s3/product/mug/"
        );
        assert_eq!(
            store.permalink(&ctx, &PageRef::front(SiteId(3))).await.unwrap().as_str(),
            "https://example.com/s3/"
        );
    }

    #[tokio::test]
    async fn test_failing_site_and_query_count() {
        let store = MemoryStore::new();
        store.fail_site(SiteId(2));

        let register = ContextRegister::new();
        let ctx = register.enter(&site(2)).await;
        assert!(store.find_by_slug(&ctx, "about").await.is_err());
        assert_eq!(store.query_count(SiteId(2)), 1);
        assert_eq!(store.query_count(SiteId(1)), 0);

        store.recover_site(SiteId(2));
        assert!(store.find_by_slug(&ctx, "about").await.is_ok());
    }

    #[test]
    fn test_from_json() {
        let store = MemoryStore::from_json(
            r#"[
                {"site_id": 1, "page_id": 5, "page_type": "generic", "slug": "about"},
                {"site_id": 2, "page_id": 8, "page_type": "product", "sku": "A1", "slug": "mug"}
            ]"#,
        )
        .unwrap();

        assert!(store.find(SiteId(1), |p| p.slug == "about").is_some());
        assert!(store.find(SiteId(2), |p| p.sku.as_deref() == Some("A1")).is_some());
    }
}
