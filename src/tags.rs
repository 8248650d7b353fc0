//! Building and rendering hreflang `<link>` tags.

use crate::model::{AlternateSet, Site};
use url::Url;

/// The hreflang value for the fallback alternate.
pub const X_DEFAULT: &str = "x-default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HreflangTag {
    pub hreflang: String,
    pub url: Url,
}

impl HreflangTag {
    fn new(hreflang: impl Into<String>, url: Url) -> Self {
        Self {
            hreflang: hreflang.into(),
            url,
        }
    }
}

/// Order the alternates into tags.
///
/// `x-default` comes first and points at the default site's alternate, or at
/// the source page itself when the default site has none. Then one tag per
/// resolved site in registry order; the default site is represented by
/// `x-default` only. `active_sites` must already exclude excluded sites.
pub fn build(
    active_sites: &[&Site],
    alternates: &AlternateSet,
    default_site: &Site,
    source_url: &Url,
) -> Vec<HreflangTag> {
    let x_default = alternates
        .get(default_site.id)
        .cloned()
        .unwrap_or_else(|| source_url.clone());

    let mut tags = vec![HreflangTag::new(X_DEFAULT, x_default)];
    tags.extend(
        active_sites
            .iter()
            .filter(|site| site.id != default_site.id)
            .filter_map(|site| {
                alternates
                    .get(site.id)
                    .map(|url| HreflangTag::new(site.language_code.as_str(), url.clone()))
            }),
    );
    tags
}

/// Render tags as `<link rel="alternate" .../>` lines.
pub fn render(tags: &[HreflangTag]) -> String {
    tags.iter()
        .map(|tag| {
            format!(
                "<link rel=\"alternate\" hreflang=\"{}\" href=\"{}\"/>\n",
                escape_attr(&tag.hreflang),
                escape_attr(tag.url.as_str())
            )
        })
        .collect()
}

/// Escape a value for use inside a double-quoted HTML attribute.
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}
