use crate::model::SiteId;
use crate::resolver::ResolutionStrategy;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

/// Twelve hours, matching the transient lifetime the tags were cached for.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Top of every hour (cron with seconds field).
pub const DEFAULT_SWEEP_CRON: &str = "0 0 * * * *";

#[derive(Debug, Clone)]
pub struct Config {
    // Sites
    pub sites_file: String,
    pub excluded_sites: HashSet<SiteId>,
    pub excluded_languages: HashSet<String>,
    pub default_site: SiteId,

    // Cache
    pub cache_ttl: Duration,
    pub cache_enabled: bool,
    pub cache_max_pages_per_site: usize,

    // Resolution
    pub query_timeout: Duration,
    pub resolution_strategy: ResolutionStrategy,

    // Scheduler
    pub sweep_cron: String,

    // Content store (WordPress database)
    pub database_url: Option<String>,
    pub table_prefix: String,
    pub product_base: String,
    /// WordPress permalink structure for posts, e.g. `/%year%/%postname%/`
    pub permalink_structure: String,

    // HTTP
    pub api_key: Option<String>,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sites_file: "data/sites.txt".to_string(),
            excluded_sites: HashSet::new(),
            excluded_languages: HashSet::new(),
            default_site: SiteId(1),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_enabled: true,
            cache_max_pages_per_site: 1024,
            query_timeout: Duration::from_millis(2000),
            resolution_strategy: ResolutionStrategy::Content,
            sweep_cron: DEFAULT_SWEEP_CRON.to_string(),
            database_url: None,
            table_prefix: "wp_".to_string(),
            product_base: "product".to_string(),
            permalink_structure: "/%postname%/".to_string(),
            api_key: None,
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            // Sites
            sites_file: std::env::var("SITES_FILE").unwrap_or(defaults.sites_file),
            excluded_sites: std::env::var("EXCLUDED_SITES")
                .map(|v| parse_excluded_sites(&v))
                .unwrap_or_default(),
            excluded_languages: std::env::var("EXCLUDED_LANGUAGES")
                .map(|v| parse_excluded_languages(&v))
                .unwrap_or_default(),
            default_site: match std::env::var("DEFAULT_SITE") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("DEFAULT_SITE is not a site id: {}", v))?,
                Err(_) => defaults.default_site,
            },

            // Cache
            cache_ttl: std::env::var("CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            cache_enabled: std::env::var("CACHE_ENABLED")
                .ok()
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.cache_enabled),
            cache_max_pages_per_site: std::env::var("CACHE_MAX_PAGES_PER_SITE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.cache_max_pages_per_site),

            // Resolution
            query_timeout: std::env::var("QUERY_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.query_timeout),
            resolution_strategy: match std::env::var("RESOLUTION_STRATEGY") {
                Ok(v) => v.parse().context("Invalid RESOLUTION_STRATEGY")?,
                Err(_) => defaults.resolution_strategy,
            },

            // Scheduler
            sweep_cron: std::env::var("SWEEP_CRON").unwrap_or(defaults.sweep_cron),

            // Content store
            database_url: std::env::var("DATABASE_URL").ok(),
            table_prefix: std::env::var("TABLE_PREFIX").unwrap_or(defaults.table_prefix),
            product_base: std::env::var("PRODUCT_BASE").unwrap_or(defaults.product_base),
            permalink_structure: std::env::var("PERMALINK_STRUCTURE")
                .unwrap_or(defaults.permalink_structure),

            // HTTP
            api_key: std::env::var("API_KEY").ok().filter(|k| !k.is_empty()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
        })
    }
}

/// Parse a comma separated list of site ids.
///
/// A malformed list is a configuration error, but not a fatal one: the whole
/// list is dropped (no exclusions) and a warning is logged.
pub fn parse_excluded_sites(raw: &str) -> HashSet<SiteId> {
    let parsed: Result<HashSet<SiteId>, _> = split_list(raw).map(str::parse).collect();
    match parsed {
        Ok(ids) => ids,
        Err(e) => {
            warn!(
                "Ignoring malformed EXCLUDED_SITES '{}' ({}), no sites excluded",
                raw, e
            );
            HashSet::new()
        }
    }
}

/// Parse a comma separated list of language codes.
pub fn parse_excluded_languages(raw: &str) -> HashSet<String> {
    let codes: Vec<&str> = split_list(raw).collect();
    if let Some(bad) = codes.iter().find(|c| !is_language_code(c)) {
        warn!(
            "Ignoring malformed EXCLUDED_LANGUAGES '{}' (bad code '{}'), no languages excluded",
            raw, bad
        );
        return HashSet::new();
    }
    codes.into_iter().map(str::to_string).collect()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn is_language_code(code: &str) -> bool {
    !code.is_empty()
        && code
            .split('-')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric()))
}

fn parse_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
