//! Core data types shared by the registry, resolver, cache and stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Identifier of a site in the multisite network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub u64);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SiteId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(SiteId)
    }
}

/// A language site: one base URL serving one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub base_url: Url,
    /// BCP 47 style code emitted as the hreflang value (e.g. "bg-BG")
    pub language_code: String,
}

impl Site {
    pub fn new(id: u64, base_url: Url, language_code: impl Into<String>) -> Self {
        Self {
            id: SiteId(id),
            base_url,
            language_code: language_code.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageType {
    /// Posts, pages and anything else matched by slug
    Generic,
    /// Shop products, matched by SKU first
    Product,
    /// The site's front page
    Front,
}

/// A single page on a single site, as reported by the content store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageRef {
    pub site_id: SiteId,
    pub page_id: u64,
    pub page_type: PageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    pub slug: String,
}

impl PageRef {
    /// The front page of a site. Front pages carry no store id.
    pub fn front(site_id: SiteId) -> Self {
        Self {
            site_id,
            page_id: 0,
            page_type: PageType::Front,
            sku: None,
            slug: String::new(),
        }
    }

    /// The SKU to match on, if this is a product with a non-empty SKU.
    pub fn product_sku(&self) -> Option<&str> {
        match (self.page_type, self.sku.as_deref()) {
            (PageType::Product, Some(sku)) if !sku.trim().is_empty() => Some(sku),
            _ => None,
        }
    }

    /// Key identifying this page inside its site's cache slot.
    pub fn cache_key(&self) -> PageKey {
        match self.page_type {
            PageType::Front => PageKey::Front,
            _ => PageKey::Page(self.page_id),
        }
    }
}

/// Cache key of a page within one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageKey {
    Front,
    Page(u64),
}

/// Resolved alternates for one source page, in registry order.
///
/// Every active site has a slot; `None` means no counterpart was found there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlternateSet {
    entries: Vec<(SiteId, Option<Url>)>,
}

impl AlternateSet {
    pub fn from_entries(entries: Vec<(SiteId, Option<Url>)>) -> Self {
        Self { entries }
    }

    /// The resolved URL for a site, if any.
    pub fn get(&self, site_id: SiteId) -> Option<&Url> {
        self.entries
            .iter()
            .find(|(id, _)| *id == site_id)
            .and_then(|(_, url)| url.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (SiteId, Option<&Url>)> {
        self.entries.iter().map(|(id, url)| (*id, url.as_ref()))
    }

    pub fn resolved_count(&self) -> usize {
        self.entries.iter().filter(|(_, url)| url.is_some()).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
