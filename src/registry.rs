//! Site registry: the configured language sites of the network.
//!
//! Sites are loaded once at startup, in the order they are listed. That order
//! is the order tags are emitted in, so it must stay stable.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{Site, SiteId};
use anyhow::Context;
use std::collections::HashSet;
use tracing::warn;
use url::Url;

/// Registered sites plus the exclusion and default-site settings.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    sites: Vec<Site>,
    excluded_sites: HashSet<SiteId>,
    excluded_languages: HashSet<String>,
    default_site: SiteId,
}

impl SiteRegistry {
    /// Build a registry from sites in registration order.
    ///
    /// # Errors
    /// Returns `Error::Config` if two sites share an id.
    pub fn new(sites: Vec<Site>, default_site: SiteId) -> Result<Self> {
        let mut seen = HashSet::new();
        for site in &sites {
            if !seen.insert(site.id) {
                return Err(Error::Config(format!("site {} registered twice", site.id)));
            }
        }

        Ok(Self {
            sites,
            excluded_sites: HashSet::new(),
            excluded_languages: HashSet::new(),
            default_site,
        })
    }

    pub fn with_excluded_sites(mut self, ids: impl IntoIterator<Item = SiteId>) -> Self {
        self.excluded_sites = ids.into_iter().collect();
        self
    }

    pub fn with_excluded_languages<S: Into<String>>(
        mut self,
        codes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.excluded_languages = codes
            .into_iter()
            .map(|code| code.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Load the sites file named in the config and apply its exclusions.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&config.sites_file)
            .with_context(|| format!("Failed to read sites file {}", config.sites_file))?;
        let sites = parse_sites(&content)?;

        Ok(Self::new(sites, config.default_site)?
            .with_excluded_sites(config.excluded_sites.iter().copied())
            .with_excluded_languages(config.excluded_languages.iter().cloned()))
    }

    /// All registered sites minus excluded ids and excluded languages,
    /// in registration order.
    pub fn list_active_sites(&self) -> Vec<&Site> {
        self.sites.iter().filter(|s| self.is_site_active(s)).collect()
    }

    /// All registered sites, excluded ones included.
    pub fn list_all(&self) -> Vec<&Site> {
        self.sites.iter().collect()
    }

    /// Look up a registered site (active or not).
    pub fn get(&self, id: SiteId) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == id)
    }

    /// Look up a site that is registered and not excluded.
    pub fn get_active(&self, id: SiteId) -> Option<&Site> {
        self.get(id).filter(|s| self.is_site_active(s))
    }

    pub fn is_active(&self, id: SiteId) -> bool {
        self.get_active(id).is_some()
    }

    /// The site whose page becomes the `x-default` alternate.
    ///
    /// If the configured default is missing or excluded, falls back to the
    /// first active site and logs a warning.
    ///
    /// # Errors
    /// Returns `Error::Config` only when no site is active at all.
    pub fn default_site(&self) -> Result<&Site> {
        if let Some(site) = self.get_active(self.default_site) {
            return Ok(site);
        }

        let fallback = self.sites.iter().find(|s| self.is_site_active(s)).ok_or_else(|| {
            Error::Config("no active sites to choose an x-default from".to_string())
        })?;

        warn!(
            "Default site {} is not an active site, falling back to site {} ({})",
            self.default_site, fallback.id, fallback.language_code
        );
        Ok(fallback)
    }

    fn is_site_active(&self, site: &Site) -> bool {
        !self.excluded_sites.contains(&site.id)
            && !self
                .excluded_languages
                .contains(&site.language_code.to_ascii_lowercase())
    }
}

/// Parse a sites file: one `id,base_url,language_code` per line.
/// Blank lines and lines starting with `#` are skipped.
pub fn parse_sites(content: &str) -> Result<Vec<Site>> {
    content
        .lines()
        .enumerate()
        .map(|(n, line)| (n + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(n, line)| parse_site_line(line).map_err(|e| Error::Config(format!("line {}: {}", n, e))))
        .collect()
}

fn parse_site_line(line: &str) -> std::result::Result<Site, String> {
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    let [id, base_url, language_code] = parts.as_slice() else {
        return Err(format!(
            "expected id,base_url,language_code but got '{}'",
            line
        ));
    };

    let id: u64 = id
        .parse()
        .map_err(|e| format!("invalid site id '{}': {}", id, e))?;
    let base_url =
        Url::parse(base_url).map_err(|e| format!("invalid base url '{}': {}", base_url, e))?;
    if language_code.is_empty() {
        return Err("empty language code".to_string());
    }

    Ok(Site::new(id, with_trailing_slash(base_url), *language_code))
}

/// Base URLs are joined against, so they need a trailing slash to keep their
/// last path segment.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn site(id: u64, lang: &str) -> Site {
        Site::new(
            id,
            Url::parse(&format!("https://site{}.example.com/", id)).unwrap(),
            lang,
        )
    }

    fn network() -> SiteRegistry {
        SiteRegistry::new(
            vec![site(1, "en-US"), site(2, "bg-BG"), site(3, "de-DE")],
            SiteId(1),
        )
        .unwrap()
    }

    fn ids(sites: Vec<&Site>) -> Vec<u64> {
        sites.iter().map(|s| s.id.0).collect()
    }

    // ==================== Active Site Tests ====================

    #[test]
    fn test_list_active_sites_keeps_registration_order() {
        let registry = SiteRegistry::new(
            vec![site(3, "de-DE"), site(1, "en-US"), site(2, "bg-BG")],
            SiteId(1),
        )
        .unwrap();
        assert_eq!(ids(registry.list_active_sites()), vec![3, 1, 2]);
    }

    #[test]
    fn test_excluded_site_ids_are_dropped() {
        let registry = network().with_excluded_sites([SiteId(2)]);
        assert_eq!(ids(registry.list_active_sites()), vec![1, 3]);
        assert!(!registry.is_active(SiteId(2)));
        assert!(registry.get(SiteId(2)).is_some());
    }

    #[test]
    fn test_excluded_languages_are_dropped() {
        let registry = network().with_excluded_languages(["de-DE"]);
        assert_eq!(ids(registry.list_active_sites()), vec![1, 2]);
        assert!(registry.get_active(SiteId(3)).is_none());
    }

    #[test]
    fn test_excluded_languages_ignore_case() {
        let registry = network().with_excluded_languages(["en-us", "BG-bg"]);
        assert_eq!(ids(registry.list_active_sites()), vec![3]);
    }

    #[test]
    fn test_list_all_includes_excluded() {
        let registry = network().with_excluded_sites([SiteId(1), SiteId(3)]);
        assert_eq!(ids(registry.list_all()), vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_site_rejected() {
        let result = SiteRegistry::new(vec![site(1, "en-US"), site(1, "bg-BG")], SiteId(1));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    // ==================== Default Site Tests ====================

    #[test]
    fn test_default_site_configured() {
        let registry = network();
        assert_eq!(registry.default_site().unwrap().id, SiteId(1));
    }

    #[test]
    fn test_default_site_falls_back_when_excluded() {
        let registry = network().with_excluded_sites([SiteId(1)]);
        assert_eq!(registry.default_site().unwrap().id, SiteId(2));
    }

    #[test]
    fn test_default_site_falls_back_when_unknown() {
        let registry = SiteRegistry::new(vec![site(2, "bg-BG"), site(3, "de-DE")], SiteId(9)).unwrap();
        assert_eq!(registry.default_site().unwrap().id, SiteId(2));
    }

    #[test]
    fn test_default_site_fails_without_active_sites() {
        let registry = network().with_excluded_languages(["en-US", "bg-BG", "de-DE"]);
        assert!(matches!(registry.default_site(), Err(Error::Config(_))));
    }

    // ==================== Sites File Tests ====================

    #[test]
    fn test_parse_sites() {
        let sites = parse_sites(
            "# id,base_url,language\n\
             1, https://example.com/, en-US\n\
             \n\
             2,https://example.com/bg,bg-BG\n",
        )
        .unwrap();

        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0].id, SiteId(1));
        assert_eq!(sites[0].language_code, "en-US");
        assert_eq!(sites[1].base_url.as_str(), "https://example.com/bg/");
    }

    #[test]
    fn test_parse_sites_reports_line_number() {
        let err = parse_sites("1,https://example.com/,en-US\n2,not a url,bg-BG\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_sites_rejects_missing_fields() {
        assert!(parse_sites("1,https://example.com/").is_err());
        assert!(parse_sites("1,https://example.com/,").is_err());
        assert!(parse_sites("x,https://example.com/,en-US").is_err());
    }

    #[test]
    fn test_from_config_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "1,https://example.com/,en-US").unwrap();
        writeln!(file, "2,https://example.com/bg/,bg-BG").unwrap();
        writeln!(file, "3,https://example.com/de/,de-DE").unwrap();

        let config = Config {
            sites_file: file.path().to_str().unwrap().to_string(),
            excluded_sites: [SiteId(3)].into_iter().collect(),
            ..Config::default()
        };

        let registry = SiteRegistry::from_config(&config).unwrap();
        assert_eq!(ids(registry.list_active_sites()), vec![1, 2]);
        assert_eq!(registry.list_all().len(), 3);
    }

    #[test]
    fn test_from_config_missing_file() {
        let config = Config {
            sites_file: "/nonexistent/sites.txt".to_string(),
            ..Config::default()
        };
        assert!(SiteRegistry::from_config(&config).is_err());
    }
}
