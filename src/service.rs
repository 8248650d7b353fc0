//! The hreflang service: resolver, tag builder and cache wired together.
//!
//! Render requests go through [`HreflangService::render_head`], which never
//! fails: any problem is logged and yields fewer (or zero) tags. The
//! scheduler calls [`HreflangService::sweep`] to rebuild every site.

use crate::cache::TagCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{PageRef, Site, SiteId};
use crate::registry::SiteRegistry;
use crate::resolver::Resolver;
use crate::context::ContextRegister;
use crate::store::ContentStore;
use crate::tags::{self, HreflangTag};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct HreflangService {
    resolver: Resolver,
    cache: TagCache,
    sweep_running: AtomicBool,
}

/// Outcome of one sweep over all active sites.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub sites_refreshed: Vec<SiteId>,
    pub sites_failed: Vec<SiteId>,
    pub pages_refreshed: usize,
}

/// Clears the running flag when a sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HreflangService {
    pub fn new(resolver: Resolver, cache: TagCache) -> Self {
        Self {
            resolver,
            cache,
            sweep_running: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn ContentStore>,
        registry: SiteRegistry,
    ) -> Self {
        let resolver = Resolver::new(store, Arc::new(registry), ContextRegister::new())
            .with_strategy(config.resolution_strategy)
            .with_query_timeout(config.query_timeout);
        let cache = TagCache::new(config.cache_ttl)
            .with_enabled(config.cache_enabled)
            .with_max_pages_per_site(config.cache_max_pages_per_site);

        Self::new(resolver, cache)
    }

    pub fn registry(&self) -> &SiteRegistry {
        self.resolver.registry()
    }

    pub fn cache(&self) -> &TagCache {
        &self.cache
    }

    /// The page a render request is about: the front page when no id is
    /// given, otherwise the published page with that id.
    pub async fn find_page(&self, site_id: SiteId, page_id: Option<u64>) -> Result<Option<PageRef>> {
        let site = self
            .registry()
            .get_active(site_id)
            .ok_or(Error::UnknownSite(site_id))?;

        match page_id {
            None => Ok(Some(PageRef::front(site_id))),
            Some(id) => self.resolver.lookup_page(site, id).await,
        }
    }

    /// Resolve alternates for `page` and order them into tags.
    pub async fn build_tags(&self, page: &PageRef) -> Result<Vec<HreflangTag>> {
        let registry = self.registry();
        let default_site = registry.default_site()?;
        let resolution = self.resolver.resolve_all(page).await?;

        Ok(tags::build(
            &registry.list_active_sites(),
            &resolution.alternates,
            default_site,
            &resolution.source_url,
        ))
    }

    /// Build the rendered block for `page`, bypassing the cache.
    pub async fn build_block(&self, page: &PageRef) -> Result<String> {
        Ok(tags::render(&self.build_tags(page).await?))
    }

    /// The rendered block for `page` on `site_id`, served from the cache.
    pub async fn cached_block(&self, site_id: SiteId, page: &PageRef) -> Result<String> {
        if page.site_id != site_id {
            return Err(Error::WrongSite {
                page_id: page.page_id,
                page_site: page.site_id,
                site: site_id,
            });
        }
        self.cache
            .get(site_id, page, || self.build_block(page))
            .await
    }

    /// The tag block to emit into the page head. Never fails; problems are
    /// logged and produce an empty block.
    pub async fn render_head(&self, site_id: SiteId, page: &PageRef) -> String {
        match self.cached_block(site_id, page).await {
            Ok(block) => block,
            Err(e) => {
                warn!(site = %site_id, page_id = page.page_id, "Emitting no hreflang tags: {}", e);
                String::new()
            }
        }
    }

    pub async fn invalidate(&self, site_id: SiteId) -> bool {
        self.cache.invalidate(site_id).await
    }

    /// Rebuild every active site's cache slot.
    ///
    /// Returns `None` without doing anything when another sweep is still
    /// running. A site that fails to rebuild is logged and skipped; its
    /// existing entries stay in place.
    pub async fn sweep(&self) -> Option<SweepReport> {
        if self
            .sweep_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("Previous hreflang sweep still running, skipping this one");
            self.cache.metrics().record_sweep_skipped();
            return None;
        }
        let _guard = SweepGuard(&self.sweep_running);

        let mut report = SweepReport::default();
        if !self.cache.is_enabled() {
            info!("Caching disabled, nothing to sweep");
            return Some(report);
        }

        let sites: Vec<Site> = self
            .registry()
            .list_active_sites()
            .into_iter()
            .cloned()
            .collect();
        info!("Sweeping hreflang cache for {} sites", sites.len());

        for site in &sites {
            match self.refresh_site(site).await {
                Ok(pages) => {
                    report.sites_refreshed.push(site.id);
                    report.pages_refreshed += pages;
                }
                Err(e) => {
                    warn!(site = %site.id, "Failed to refresh hreflang cache: {}", e);
                    self.cache.metrics().record_sweep_failure();
                    report.sites_failed.push(site.id);
                }
            }
        }

        self.cache.metrics().record_sweep();
        info!(
            "✓ Sweep finished: {} sites refreshed, {} failed, {} pages",
            report.sites_refreshed.len(),
            report.sites_failed.len(),
            report.pages_refreshed
        );
        Some(report)
    }

    /// Rebuild the tracked pages of one site plus its front page.
    ///
    /// When every page rebuilds, the slot is replaced wholesale. Otherwise
    /// the pages that did rebuild are written, the rest are left stale, and
    /// the first error is returned.
    async fn refresh_site(&self, site: &Site) -> Result<usize> {
        let mut pages: BTreeMap<_, PageRef> = self
            .cache
            .tracked_pages(site.id)
            .await
            .into_iter()
            .map(|p| (p.cache_key(), p))
            .collect();
        let front = PageRef::front(site.id);
        pages.entry(front.cache_key()).or_insert(front);

        let mut built = Vec::with_capacity(pages.len());
        let mut first_error = None;
        for page in pages.into_values() {
            match self.build_block(&page).await {
                Ok(block) => {
                    self.cache.metrics().record_build();
                    built.push((page, block));
                }
                Err(e) => {
                    debug!(site = %site.id, page_id = page.page_id, "page rebuild failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let refreshed = built.len();
        match first_error {
            None => {
                self.cache.replace_site(site.id, built).await?;
                Ok(refreshed)
            }
            Some(e) => {
                for (page, block) in built {
                    self.cache.put(site.id, &page, block).await?;
                }
                Err(e)
            }
        }
    }
}
