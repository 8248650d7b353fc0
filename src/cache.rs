//! Per-site cache of rendered tag blocks.
//!
//! There is one slot per site. A slot holds one entry per page of that site
//! that has been rendered, so invalidating a site drops every page at once.
//! All entries share a single TTL.
//!
//! Each entry also remembers when it was last handed to a render. A page that
//! has not been served for a whole TTL is "idle": the sweep stops tracking
//! it, and a full slot evicts it (or any stale entry) to make room.

use crate::error::{Error, Result};
use crate::metrics::CacheMetrics;
use crate::model::{PageKey, PageRef, SiteId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub site_id: SiteId,
    pub page: PageRef,
    pub rendered_tags: String,
    pub created_at: DateTime<Utc>,
    /// Last time this entry was served to a render
    pub served_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Fresh while `now - created_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age < self.ttl,
            // created_at in the future: clock went backwards
            Err(_) => true,
        }
    }

    /// Not served within the last TTL.
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.served_at).to_std() {
            Ok(idle) => idle >= self.ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Default)]
struct SiteSlot {
    entries: BTreeMap<PageKey, CacheEntry>,
}

pub struct TagCache {
    slots: RwLock<HashMap<SiteId, SiteSlot>>,
    ttl: Duration,
    enabled: bool,
    max_pages_per_site: usize,
    metrics: Arc<CacheMetrics>,
}

impl TagCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            ttl,
            enabled: true,
            max_pages_per_site: 1024,
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// With caching disabled every `get` builds and nothing is stored.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_pages_per_site(mut self, max: usize) -> Self {
        self.max_pages_per_site = max;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// The rendered tag block for `page` on `site_id`.
    ///
    /// A fresh entry is returned as is. Otherwise `build` runs, its output is
    /// stored with a new timestamp and returned. Concurrent misses for the
    /// same page each run `build`; the last write wins. A failed write is
    /// logged and the built value is still returned.
    pub async fn get<F, Fut>(&self, site_id: SiteId, page: &PageRef, build: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let key = page.cache_key();
        if self.enabled {
            if let Some(rendered) = self.serve(site_id, key).await {
                self.metrics.record_hit();
                return Ok(rendered);
            }
            self.metrics.record_miss();
        }

        let rendered = build().await?;
        self.metrics.record_build();

        if self.enabled {
            let mut slots = self.slots.write().await;
            let slot = slots.entry(site_id).or_default();
            if let Err(e) = self.insert(site_id, slot, page, rendered.clone(), Some(Utc::now())) {
                warn!("{}", e);
            }
        }

        Ok(rendered)
    }

    /// Store a freshly built block, refreshing `created_at`.
    ///
    /// # Errors
    /// `Error::CacheWrite` when the slot is full of fresh, recently served
    /// entries and `page` is not already in it.
    pub async fn put(&self, site_id: SiteId, page: &PageRef, rendered_tags: String) -> Result<()> {
        let mut slots = self.slots.write().await;
        let slot = slots.entry(site_id).or_default();
        self.insert(site_id, slot, page, rendered_tags, None)
    }

    /// Drop every entry of a site. Returns whether anything was cached.
    pub async fn invalidate(&self, site_id: SiteId) -> bool {
        let removed = self.slots.write().await.remove(&site_id).is_some();
        debug!(site = %site_id, removed, "invalidated cache slot");
        removed
    }

    /// Invalidate a site and repopulate it in one step, so readers never see
    /// the slot empty in between.
    pub async fn replace_site(&self, site_id: SiteId, blocks: Vec<(PageRef, String)>) -> Result<()> {
        let mut slots = self.slots.write().await;
        let previous = slots.remove(&site_id).unwrap_or_default();
        let slot = slots.entry(site_id).or_default();

        let mut first_error = None;
        for (page, rendered) in blocks {
            let served_at = previous
                .entries
                .get(&page.cache_key())
                .map(|e| e.served_at);
            if let Err(e) = self.insert(site_id, slot, &page, rendered, served_at) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn entry(&self, site_id: SiteId, key: PageKey) -> Option<CacheEntry> {
        self.slots
            .read()
            .await
            .get(&site_id)
            .and_then(|slot| slot.entries.get(&key))
            .cloned()
    }

    /// Pages of a site served within the last TTL, fresh or stale. Idle
    /// pages are left out so a sweep does not carry them forward.
    pub async fn tracked_pages(&self, site_id: SiteId) -> Vec<PageRef> {
        let now = Utc::now();
        self.slots
            .read()
            .await
            .get(&site_id)
            .map(|slot| {
                slot.entries
                    .values()
                    .filter(|e| !e.is_idle(now))
                    .map(|e| e.page.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A fresh entry's block, marking it served.
    async fn serve(&self, site_id: SiteId, key: PageKey) -> Option<String> {
        let now = Utc::now();
        let mut slots = self.slots.write().await;
        let entry = slots.get_mut(&site_id)?.entries.get_mut(&key)?;
        if !entry.is_fresh(now) {
            return None;
        }
        entry.served_at = now;
        Some(entry.rendered_tags.clone())
    }

    pub async fn len(&self, site_id: SiteId) -> usize {
        self.slots
            .read()
            .await
            .get(&site_id)
            .map_or(0, |slot| slot.entries.len())
    }

    /// `served_at` of `None` keeps the existing entry's, or starts now.
    fn insert(
        &self,
        site_id: SiteId,
        slot: &mut SiteSlot,
        page: &PageRef,
        rendered_tags: String,
        served_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let now = Utc::now();
        let key = page.cache_key();
        if !slot.entries.contains_key(&key)
            && slot.entries.len() >= self.max_pages_per_site
            && !self.evict_one(site_id, slot, now)
        {
            self.metrics.record_write_failure();
            return Err(Error::CacheWrite {
                site: site_id,
                reason: format!("slot is full ({} pages)", self.max_pages_per_site),
            });
        }

        let served_at = served_at
            .or_else(|| slot.entries.get(&key).map(|e| e.served_at))
            .unwrap_or(now);
        slot.entries.insert(
            key,
            CacheEntry {
                site_id,
                page: page.clone(),
                rendered_tags,
                created_at: now,
                served_at,
                ttl: self.ttl,
            },
        );
        Ok(())
    }

    /// Drop the least recently served entry that is stale or idle.
    fn evict_one(&self, site_id: SiteId, slot: &mut SiteSlot, now: DateTime<Utc>) -> bool {
        let victim = slot
            .entries
            .iter()
            .filter(|(_, e)| !e.is_fresh(now) || e.is_idle(now))
            .min_by_key(|(_, e)| e.served_at)
            .map(|(key, _)| *key);

        match victim {
            Some(key) => {
                slot.entries.remove(&key);
                self.metrics.record_eviction();
                debug!(site = %site_id, ?key, "evicted cache entry");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PageType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn page(site: u64, id: u64) -> PageRef {
        PageRef {
            site_id: SiteId(site),
            page_id: id,
            page_type: PageType::Generic,
            sku: None,
            slug: format!("page-{}", id),
        }
    }

    /// A build closure that counts how often it ran.
    fn counting_build(
        counter: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce() -> std::future::Ready<Result<String>> {
        let counter = Arc::clone(counter);
        let value = value.to_string();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    // ==================== Freshness Tests ====================

    #[test]
    fn test_entry_freshness() {
        let now = Utc::now();
        let entry = CacheEntry {
            site_id: SiteId(1),
            page: page(1, 1),
            rendered_tags: String::new(),
            created_at: now - chrono::Duration::seconds(30),
            served_at: now - chrono::Duration::seconds(10),
            ttl: Duration::from_secs(60),
        };

        assert!(entry.is_fresh(now));
        assert!(!entry.is_fresh(now + chrono::Duration::seconds(31)));
        assert!(entry.is_fresh(now - chrono::Duration::seconds(60)));

        assert!(!entry.is_idle(now));
        assert!(entry.is_idle(now + chrono::Duration::seconds(50)));
    }

    /// Shift an entry's timestamps into the past.
    async fn backdate(cache: &TagCache, site: SiteId, key: PageKey, created: i64, served: i64) {
        let mut slots = cache.slots.write().await;
        let entry = slots.get_mut(&site).unwrap().entries.get_mut(&key).unwrap();
        entry.created_at = entry.created_at - chrono::Duration::seconds(created);
        entry.served_at = entry.served_at - chrono::Duration::seconds(served);
    }

    // ==================== get Tests ====================

    #[tokio::test]
    async fn test_get_twice_builds_once() {
        let cache = TagCache::new(Duration::from_secs(3600));
        let builds = Arc::new(AtomicUsize::new(0));
        let about = page(2, 7);

        let first = cache
            .get(SiteId(2), &about, counting_build(&builds, "<link/>"))
            .await
            .unwrap();
        let second = cache
            .get(SiteId(2), &about, counting_build(&builds, "different"))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.metrics().cache_hits(), 1);
        assert_eq!(cache.metrics().cache_misses(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_is_rebuilt() {
        let cache = TagCache::new(Duration::ZERO);
        let builds = Arc::new(AtomicUsize::new(0));
        let about = page(1, 7);

        cache.get(SiteId(1), &about, counting_build(&builds, "a")).await.unwrap();
        let second = cache.get(SiteId(1), &about, counting_build(&builds, "b")).await.unwrap();

        assert_eq!(second, "b");
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_one_rebuild_with_new_timestamp() {
        let cache = TagCache::new(Duration::from_secs(3600));
        let builds = Arc::new(AtomicUsize::new(0));
        let about = page(2, 7);

        cache.get(SiteId(2), &about, counting_build(&builds, "a")).await.unwrap();
        let before = cache.entry(SiteId(2), about.cache_key()).await.unwrap().created_at;

        assert!(cache.invalidate(SiteId(2)).await);
        assert!(cache.entry(SiteId(2), about.cache_key()).await.is_none());

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get(SiteId(2), &about, counting_build(&builds, "b")).await.unwrap();
        cache.get(SiteId(2), &about, counting_build(&builds, "c")).await.unwrap();

        let after = cache.entry(SiteId(2), about.cache_key()).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(after.rendered_tags, "b");
        assert!(after.created_at > before);
    }

    #[tokio::test]
    async fn test_invalidate_only_touches_one_site() {
        let cache = TagCache::new(Duration::from_secs(3600));
        cache.put(SiteId(1), &page(1, 1), "one".into()).await.unwrap();
        cache.put(SiteId(2), &page(2, 1), "two".into()).await.unwrap();

        cache.invalidate(SiteId(1)).await;
        assert_eq!(cache.len(SiteId(1)).await, 0);
        assert_eq!(cache.len(SiteId(2)).await, 1);
        assert!(!cache.invalidate(SiteId(9)).await);
    }

    #[tokio::test]
    async fn test_build_error_is_returned_and_not_cached() {
        let cache = TagCache::new(Duration::from_secs(3600));
        let about = page(1, 7);

        let result = cache
            .get(SiteId(1), &about, || async {
                Err(Error::Config("boom".into()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(cache.len(SiteId(1)).await, 0);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_builds() {
        let cache = TagCache::new(Duration::from_secs(3600)).with_enabled(false);
        let builds = Arc::new(AtomicUsize::new(0));
        let about = page(1, 7);

        cache.get(SiteId(1), &about, counting_build(&builds, "a")).await.unwrap();
        cache.get(SiteId(1), &about, counting_build(&builds, "a")).await.unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(SiteId(1)).await, 0);
        assert_eq!(cache.metrics().cache_misses(), 0);
    }

    // ==================== Write Failure Tests ====================

    #[tokio::test]
    async fn test_full_slot_still_returns_value() {
        let cache = TagCache::new(Duration::from_secs(3600)).with_max_pages_per_site(1);
        let builds = Arc::new(AtomicUsize::new(0));

        cache.get(SiteId(1), &page(1, 1), counting_build(&builds, "a")).await.unwrap();
        let value = cache
            .get(SiteId(1), &page(1, 2), counting_build(&builds, "b"))
            .await
            .unwrap();

        assert_eq!(value, "b");
        assert_eq!(cache.len(SiteId(1)).await, 1);
        assert_eq!(cache.metrics().write_failures(), 1);

        // Next request retries the write (and fails again while full)
        cache.get(SiteId(1), &page(1, 2), counting_build(&builds, "b")).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_full_slot_allows_overwrite() {
        let cache = TagCache::new(Duration::from_secs(3600)).with_max_pages_per_site(1);
        cache.put(SiteId(1), &page(1, 1), "a".into()).await.unwrap();
        cache.put(SiteId(1), &page(1, 1), "b".into()).await.unwrap();

        let entry = cache.entry(SiteId(1), PageKey::Page(1)).await.unwrap();
        assert_eq!(entry.rendered_tags, "b");
    }

    #[tokio::test]
    async fn test_full_slot_evicts_stale_entry() {
        let cache = TagCache::new(Duration::ZERO).with_max_pages_per_site(1);
        cache.put(SiteId(1), &page(1, 1), "a".into()).await.unwrap();

        cache.put(SiteId(1), &page(1, 2), "b".into()).await.unwrap();

        assert!(cache.entry(SiteId(1), PageKey::Page(1)).await.is_none());
        assert!(cache.entry(SiteId(1), PageKey::Page(2)).await.is_some());
        assert_eq!(cache.metrics().evictions(), 1);
        assert_eq!(cache.metrics().write_failures(), 0);
    }

    #[tokio::test]
    async fn test_full_slot_evicts_least_recently_served_idle_entry() {
        let cache = TagCache::new(Duration::from_secs(60)).with_max_pages_per_site(3);
        for id in 1..=3 {
            cache.put(SiteId(1), &page(1, id), "x".into()).await.unwrap();
        }
        // Page 1 is fresh but nobody asked for it in two minutes; page 2
        // even longer.
        backdate(&cache, SiteId(1), PageKey::Page(1), 0, 120).await;
        backdate(&cache, SiteId(1), PageKey::Page(2), 0, 300).await;

        cache.put(SiteId(1), &page(1, 4), "y".into()).await.unwrap();

        assert!(cache.entry(SiteId(1), PageKey::Page(1)).await.is_some());
        assert!(cache.entry(SiteId(1), PageKey::Page(2)).await.is_none());
        assert_eq!(cache.len(SiteId(1)).await, 3);
    }

    #[tokio::test]
    async fn test_serving_an_entry_keeps_it_tracked() {
        let cache = TagCache::new(Duration::from_secs(60));
        let builds = Arc::new(AtomicUsize::new(0));
        cache.put(SiteId(1), &page(1, 1), "a".into()).await.unwrap();
        cache.put(SiteId(1), &page(1, 2), "b".into()).await.unwrap();
        backdate(&cache, SiteId(1), PageKey::Page(1), 30, 90).await;
        backdate(&cache, SiteId(1), PageKey::Page(2), 30, 90).await;

        // A hit on page 2 marks it served again
        cache.get(SiteId(1), &page(1, 2), counting_build(&builds, "b")).await.unwrap();
        assert_eq!(builds.load(Ordering::SeqCst), 0);

        let tracked = cache.tracked_pages(SiteId(1)).await;
        assert_eq!(tracked, vec![page(1, 2)]);
    }

    // ==================== Sweep Support Tests ====================

    #[tokio::test]
    async fn test_replace_site_swaps_entries() {
        let cache = TagCache::new(Duration::from_secs(3600));
        cache.put(SiteId(1), &page(1, 1), "old".into()).await.unwrap();
        cache.put(SiteId(1), &page(1, 2), "old".into()).await.unwrap();

        cache
            .replace_site(
                SiteId(1),
                vec![(page(1, 1), "new".into()), (PageRef::front(SiteId(1)), "front".into())],
            )
            .await
            .unwrap();

        let tracked = cache.tracked_pages(SiteId(1)).await;
        assert_eq!(tracked.len(), 2);
        assert!(cache.entry(SiteId(1), PageKey::Page(2)).await.is_none());
        assert_eq!(
            cache.entry(SiteId(1), PageKey::Front).await.unwrap().rendered_tags,
            "front"
        );
    }

    #[tokio::test]
    async fn test_replace_site_keeps_served_at() {
        let cache = TagCache::new(Duration::from_secs(60));
        cache.put(SiteId(1), &page(1, 1), "old".into()).await.unwrap();
        backdate(&cache, SiteId(1), PageKey::Page(1), 0, 120).await;
        let served = cache.entry(SiteId(1), PageKey::Page(1)).await.unwrap().served_at;

        cache
            .replace_site(SiteId(1), vec![(page(1, 1), "new".into())])
            .await
            .unwrap();

        let entry = cache.entry(SiteId(1), PageKey::Page(1)).await.unwrap();
        assert_eq!(entry.rendered_tags, "new");
        assert_eq!(entry.served_at, served);
        assert!(cache.tracked_pages(SiteId(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_tracked_pages_empty_for_unknown_site() {
        let cache = TagCache::new(Duration::from_secs(3600));
        assert!(cache.tracked_pages(SiteId(5)).await.is_empty());
    }
}
