//! Alternate-page resolution across the sites of the network.
//!
//! For a source page the resolver finds the counterpart on every active site.
//! The `content` strategy asks each site's content store (SKU first, then
//! slug). The `path` strategy re-roots the source page's path onto each
//! site's base URL without asking anything.

use crate::context::{ContextRegister, SiteContext};
use crate::error::{Error, Result, StoreError};
use crate::model::{AlternateSet, PageRef, PageType, Site};
use crate::registry::SiteRegistry;
use crate::retry::{with_retry_if, RetryConfig};
use crate::store::ContentStore;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
    /// Match by product SKU, then by slug, through the content store
    Content,
    /// Same path on every site
    Path,
}

impl FromStr for ResolutionStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content" | "sku" => Ok(Self::Content),
            "path" => Ok(Self::Path),
            other => Err(Error::Config(format!(
                "unknown resolution strategy '{}', expected 'content' or 'path'",
                other
            ))),
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Content => f.write_str("content"),
            Self::Path => f.write_str("path"),
        }
    }
}

/// A source page's own URL plus its alternates on every active site.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub source_url: Url,
    pub alternates: AlternateSet,
}

pub struct Resolver {
    store: Arc<dyn ContentStore>,
    registry: Arc<SiteRegistry>,
    contexts: ContextRegister,
    strategy: ResolutionStrategy,
    query_timeout: Duration,
    retry: RetryConfig,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn ContentStore>,
        registry: Arc<SiteRegistry>,
        contexts: ContextRegister,
    ) -> Self {
        Self {
            store,
            registry,
            contexts,
            strategy: ResolutionStrategy::Content,
            query_timeout: Duration::from_secs(2),
            retry: RetryConfig::store_query(),
        }
    }

    pub fn with_strategy(mut self, strategy: ResolutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Look up a page on an active site by id. `None` when the site has no
    /// published page with that id.
    pub async fn lookup_page(&self, site: &Site, page_id: u64) -> Result<Option<PageRef>> {
        let ctx = self.contexts.enter(site).await;
        let page = self
            .bounded(with_retry_if(
                &self.retry,
                "find_by_id",
                || self.store.find_by_id(&ctx, page_id),
                StoreError::is_retryable,
            ))
            .await?;
        Ok(page)
    }

    /// The source page's own URL on its own site.
    pub async fn source_url(&self, source: &PageRef) -> Result<Url> {
        let site = self
            .registry
            .get_active(source.site_id)
            .ok_or(Error::UnknownSite(source.site_id))?;

        let ctx = self.contexts.enter(site).await;
        let url = self
            .bounded(with_retry_if(
                &self.retry,
                "permalink",
                || self.store.permalink(&ctx, source),
                StoreError::is_retryable,
            ))
            .await?;
        Ok(url)
    }

    /// Find the counterpart of `source` on `target`.
    ///
    /// `Ok(None)` means the target has no matching page. Errors are store
    /// failures or a timeout; the active site is restored either way.
    pub async fn resolve(&self, source: &PageRef, target: &Site) -> Result<Option<Url>> {
        match self.strategy {
            ResolutionStrategy::Content => Ok(self.resolve_by_content(source, target).await?),
            ResolutionStrategy::Path => {
                let source_url = self.source_url(source).await?;
                self.resolve_by_path(source, &source_url, target)
            }
        }
    }

    /// Resolve `source` against every active site.
    ///
    /// The source site maps to the source page's own URL. A failing or slow
    /// sibling is logged and left absent; only a failure to find the source
    /// page's own URL fails the whole resolution.
    pub async fn resolve_all(&self, source: &PageRef) -> Result<Resolution> {
        let source_url = self.source_url(source).await?;
        let sites = self.registry.list_active_sites();
        let mut entries = Vec::with_capacity(sites.len());

        for site in sites {
            if site.id == source.site_id {
                entries.push((site.id, Some(source_url.clone())));
                continue;
            }

            let resolved = match self.strategy {
                ResolutionStrategy::Content => {
                    self.resolve_by_content(source, site).await.map_err(Error::from)
                }
                ResolutionStrategy::Path => self.resolve_by_path(source, &source_url, site),
            };

            let url = match resolved {
                Ok(url) => url,
                Err(e) => {
                    warn!(
                        source_site = %source.site_id,
                        target_site = %site.id,
                        page_id = source.page_id,
                        "Alternate lookup failed, skipping site: {}",
                        e
                    );
                    None
                }
            };
            entries.push((site.id, url));
        }

        let alternates = AlternateSet::from_entries(entries);
        debug!(
            site = %source.site_id,
            page_id = source.page_id,
            resolved = alternates.resolved_count(),
            "resolved alternates"
        );

        Ok(Resolution {
            source_url,
            alternates,
        })
    }

    async fn resolve_by_content(
        &self,
        source: &PageRef,
        target: &Site,
    ) -> std::result::Result<Option<Url>, StoreError> {
        if source.page_type == PageType::Front {
            return Ok(Some(target.base_url.clone()));
        }

        // Waiting for the context lock is not store time.
        let ctx = self.contexts.enter(target).await;
        self.bounded(self.lookup_counterpart(&ctx, source)).await
    }

    /// Bound a store call by the query timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        match tokio::time::timeout(self.query_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.query_timeout)),
        }
    }

    /// SKU match, then slug match, inside the target's site context.
    async fn lookup_counterpart(
        &self,
        ctx: &SiteContext,
        source: &PageRef,
    ) -> std::result::Result<Option<Url>, StoreError> {

        let mut found = None;
        if let Some(sku) = source.product_sku() {
            found = with_retry_if(
                &self.retry,
                "find_by_sku",
                || self.store.find_by_sku(ctx, sku),
                StoreError::is_retryable,
            )
            .await?;
        }

        if found.is_none() && !source.slug.is_empty() {
            found = with_retry_if(
                &self.retry,
                "find_by_slug",
                || self.store.find_by_slug(ctx, &source.slug),
                StoreError::is_retryable,
            )
            .await?;
        }

        match found {
            Some(page) => {
                let url = with_retry_if(
                    &self.retry,
                    "permalink",
                    || self.store.permalink(ctx, &page),
                    StoreError::is_retryable,
                )
                .await?;
                Ok(Some(url))
            }
            None => Ok(None),
        }
    }

    fn resolve_by_path(&self, source: &PageRef, source_url: &Url, target: &Site) -> Result<Option<Url>> {
        let source_site = self
            .registry
            .get(source.site_id)
            .ok_or(Error::UnknownSite(source.site_id))?;
        Ok(reroot(source_url, &source_site.base_url, &target.base_url))
    }
}

/// Move `url` from under `from_base` to under `to_base`, keeping the path
/// relative to the base.
fn reroot(url: &Url, from_base: &Url, to_base: &Url) -> Option<Url> {
    let path = url.path();
    let relative = path
        .strip_prefix(from_base.path())
        .unwrap_or_else(|| path.trim_start_matches('/'));
    to_base.join(relative).ok()
}
