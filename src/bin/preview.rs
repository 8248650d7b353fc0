//! Preview binary - renders the hreflang tags for one page without a database
//!
//! Usage:
//!   cargo run --bin preview -- <content.json> <site_id> [page_id]
//!
//! `content.json` is an array of pages:
//!   [{"site_id": 1, "page_id": 5, "page_type": "generic", "slug": "about"}, ...]
//! Omit `page_id` to preview the site's front page.
//!
//! Environment variables are read as for the main service (SITES_FILE,
//! EXCLUDED_SITES, EXCLUDED_LANGUAGES, DEFAULT_SITE, RESOLUTION_STRATEGY).

use anyhow::{bail, Context, Result};
use multisite_hreflang::config::Config;
use multisite_hreflang::registry::SiteRegistry;
use multisite_hreflang::store::MemoryStore;
use multisite_hreflang::{HreflangService, SiteId};
use std::fs;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("multisite_hreflang=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("Usage: preview <content.json> <site_id> [page_id]");
    }

    let content_path = &args[1];
    let site_id: SiteId = args[2]
        .parse()
        .with_context(|| format!("Invalid site id: {}", args[2]))?;
    let page_id: Option<u64> = args
        .get(3)
        .map(|v| v.parse())
        .transpose()
        .context("Invalid page id")?;

    let config = Config::from_env()?;
    let registry = SiteRegistry::from_config(&config)?;

    let content = fs::read_to_string(content_path)
        .with_context(|| format!("Failed to read {}", content_path))?;
    let store = MemoryStore::from_json(&content).context("Failed to parse content file")?;
    info!("Loaded content from {}", content_path);

    let service = HreflangService::from_config(&config, Arc::new(store), registry);

    let Some(page) = service.find_page(site_id, page_id).await? else {
        bail!("No published page {:?} on site {}", page_id, site_id);
    };

    let tags = service.build_tags(&page).await?;

    println!();
    println!("--- hreflang tags for site {} / {:?} '{}' ---", site_id, page.page_type, page.slug);
    println!();
    for tag in &tags {
        println!("{:>10}  {}", tag.hreflang, tag.url);
    }
    println!();
    println!("--- Rendered ---");
    println!();
    print!("{}", multisite_hreflang::tags::render(&tags));
    println!();

    Ok(())
}
