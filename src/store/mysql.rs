use super::{pretty_permalink, ContentStore};
use crate::context::SiteContext;
use crate::error::StoreError;
use crate::model::{PageRef, PageType, SiteId};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::info;
use url::Url;

/// Post types that can be the counterpart of a page.
const MATCHABLE_TYPES: &str = "'page', 'post', 'product'";

/// Deepest page hierarchy followed when building a page URL.
const MAX_PAGE_DEPTH: usize = 32;

/// Structure tags understood in a post permalink structure.
const STRUCTURE_TAGS: &[&str] = &["%year%", "%monthnum%", "%day%", "%postname%", "%post_id%"];

/// Content store reading a WordPress multisite database.
///
/// The main site keeps its posts in `{prefix}posts`; every other site `N`
/// has its own `{prefix}N_posts` and `{prefix}N_postmeta` tables. Product
/// SKUs live in postmeta under `_sku`.
///
/// Page URLs follow the `post_parent` chain (`/parent/child/`); post URLs
/// follow the configured permalink structure.
#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
    table_prefix: String,
    product_base: String,
    permalink_structure: String,
}

/// The columns of a post needed to build its URL.
#[derive(Debug, Clone)]
struct PostRow {
    post_type: String,
    slug: String,
    parent: u64,
    /// `YYYY-MM-DD`
    post_day: String,
}

impl MySqlStore {
    /// Connect to the WordPress database.
    pub async fn connect(database_url: &str, table_prefix: &str, product_base: &str) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .context("Failed to connect to WordPress database")?;

        info!("Connected to WordPress database");
        Self::with_pool(pool, table_prefix, product_base)
    }

    pub fn with_pool(pool: MySqlPool, table_prefix: &str, product_base: &str) -> Result<Self> {
        if !is_valid_prefix(table_prefix) {
            bail!("Invalid TABLE_PREFIX '{}': only letters, digits and _ allowed", table_prefix);
        }

        Ok(Self {
            pool,
            table_prefix: table_prefix.to_string(),
            product_base: product_base.to_string(),
            permalink_structure: "/%postname%/".to_string(),
        })
    }

    /// Use a WordPress permalink structure for posts.
    pub fn with_permalink_structure(mut self, structure: &str) -> Result<Self> {
        validate_structure(structure)?;
        self.permalink_structure = structure.to_string();
        Ok(self)
    }

    fn posts_table(&self, site: SiteId) -> String {
        table_name(&self.table_prefix, site, "posts")
    }

    fn postmeta_table(&self, site: SiteId) -> String {
        table_name(&self.table_prefix, site, "postmeta")
    }

    /// Columns every lookup selects, aliased to what [`row_to_page`] reads.
    fn select_page(&self, site: SiteId) -> String {
        format!(
            "SELECT p.ID AS id, p.post_type AS post_type, p.post_name AS slug, \
             (SELECT CAST(m.meta_value AS CHAR) FROM {meta} m \
              WHERE m.post_id = p.ID AND m.meta_key = '_sku' LIMIT 1) AS sku \
             FROM {posts} p",
            meta = self.postmeta_table(site),
            posts = self.posts_table(site),
        )
    }

    async fn post_row(&self, site: SiteId, post_id: u64) -> Result<Option<PostRow>, StoreError> {
        let sql = format!(
            "SELECT p.post_type AS post_type, p.post_name AS slug, p.post_parent AS parent, \
             CAST(DATE_FORMAT(p.post_date, '%Y-%m-%d') AS CHAR) AS post_day \
             FROM {} p WHERE p.ID = ?",
            self.posts_table(site)
        );
        let row = sqlx::query(&sql)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<PostRow, StoreError> {
            Ok(PostRow {
                post_type: r.try_get("post_type")?,
                slug: r.try_get("slug")?,
                parent: r.try_get("parent")?,
                post_day: r.try_get("post_day")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ContentStore for MySqlStore {
    async fn find_by_id(
        &self,
        ctx: &SiteContext,
        page_id: u64,
    ) -> Result<Option<PageRef>, StoreError> {
        let sql = format!(
            "{} WHERE p.ID = ? AND p.post_status = 'publish'",
            self.select_page(ctx.site_id())
        );
        let row = sqlx::query(&sql)
            .bind(page_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_page(ctx.site_id(), &r)).transpose()
    }

    async fn find_by_sku(
        &self,
        ctx: &SiteContext,
        sku: &str,
    ) -> Result<Option<PageRef>, StoreError> {
        let sql = format!(
            "{select} JOIN {meta} s ON s.post_id = p.ID \
             WHERE p.post_type = 'product' AND p.post_status = 'publish' \
             AND s.meta_key = '_sku' AND s.meta_value = ? \
             ORDER BY p.post_date DESC, p.ID DESC LIMIT 1",
            select = self.select_page(ctx.site_id()),
            meta = self.postmeta_table(ctx.site_id()),
        );
        let row = sqlx::query(&sql)
            .bind(sku)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_page(ctx.site_id(), &r)).transpose()
    }

    async fn find_by_slug(
        &self,
        ctx: &SiteContext,
        slug: &str,
    ) -> Result<Option<PageRef>, StoreError> {
        // Pages win over posts and products sharing the slug
        let sql = format!(
            "{} WHERE p.post_name = ? AND p.post_status = 'publish' \
             AND p.post_type IN ({}) \
             ORDER BY p.post_type = 'page' DESC, p.ID ASC LIMIT 1",
            self.select_page(ctx.site_id()),
            MATCHABLE_TYPES,
        );
        let row = sqlx::query(&sql)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_page(ctx.site_id(), &r)).transpose()
    }

    async fn permalink(&self, ctx: &SiteContext, page: &PageRef) -> Result<Url, StoreError> {
        if page.page_type != PageType::Generic {
            return pretty_permalink(ctx, page, &self.product_base);
        }

        let site = ctx.site_id();
        let post = self
            .post_row(site, page.page_id)
            .await?
            .ok_or_else(|| StoreError::Query(format!("post {} not found on site {}", page.page_id, site)))?;

        let path = match post.post_type.as_str() {
            "page" => {
                page_path(&post.slug, post.parent, |id| async move {
                    let row = self.post_row(site, id).await?;
                    Ok::<_, StoreError>(row.map(|p| (p.slug, p.parent)))
                })
                .await?
            }
            "post" => post_path(&self.permalink_structure, page.page_id, &post)?,
            _ => format!("{}/", post.slug),
        };

        ctx.site()
            .base_url
            .join(&path)
            .map_err(|e| StoreError::Query(format!("cannot build permalink for '{}': {}", post.slug, e)))
    }
}

fn row_to_page(site_id: SiteId, row: &MySqlRow) -> Result<PageRef, StoreError> {
    let post_type: String = row.try_get("post_type")?;
    let page_type = if post_type == "product" {
        PageType::Product
    } else {
        PageType::Generic
    };

    Ok(PageRef {
        site_id,
        page_id: row.try_get("id")?,
        page_type,
        sku: row.try_get("sku")?,
        slug: row.try_get("slug")?,
    })
}

/// The main site (id 1) uses the bare prefix.
fn table_name(prefix: &str, site: SiteId, table: &str) -> String {
    if site.0 <= 1 {
        format!("{}{}", prefix, table)
    } else {
        format!("{}{}_{}", prefix, site.0, table)
    }
}

/// `grandparent/parent/slug/`, following parents through `lookup` until a
/// top-level page. `lookup` returns a post's slug and parent id.
async fn page_path<F, Fut>(slug: &str, parent: u64, lookup: F) -> Result<String, StoreError>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Result<Option<(String, u64)>, StoreError>>,
{
    let mut segments = vec![slug.to_string()];
    let mut seen = HashSet::new();
    let mut next = parent;

    while next != 0 {
        if !seen.insert(next) || segments.len() > MAX_PAGE_DEPTH {
            return Err(StoreError::Query(format!("page hierarchy of '{}' does not end", slug)));
        }
        match lookup(next).await? {
            Some((parent_slug, grandparent)) => {
                segments.push(parent_slug);
                next = grandparent;
            }
            // Orphaned: the parent was deleted
            None => break,
        }
    }

    segments.reverse();
    Ok(format!("{}/", segments.join("/")))
}

/// Fill in a permalink structure for a post, relative to the site root.
fn post_path(structure: &str, post_id: u64, post: &PostRow) -> Result<String, StoreError> {
    let mut date = post.post_day.splitn(3, '-');
    let (Some(year), Some(month), Some(day)) = (date.next(), date.next(), date.next()) else {
        return Err(StoreError::Query(format!(
            "post {} has no usable date '{}'",
            post_id, post.post_day
        )));
    };

    let path = structure
        .replace("%year%", year)
        .replace("%monthnum%", month)
        .replace("%day%", day)
        .replace("%postname%", &post.slug)
        .replace("%post_id%", &post_id.to_string());
    Ok(path.trim_start_matches('/').to_string())
}

fn validate_structure(structure: &str) -> Result<()> {
    let mut rest = structure.to_string();
    for tag in STRUCTURE_TAGS {
        rest = rest.replace(tag, "");
    }
    if rest.contains('%') {
        bail!(
            "Unsupported PERMALINK_STRUCTURE '{}': supported tags are {}",
            structure,
            STRUCTURE_TAGS.join(", ")
        );
    }
    if !structure.contains("%postname%") && !structure.contains("%post_id%") {
        bail!("PERMALINK_STRUCTURE '{}' must contain %postname% or %post_id%", structure);
    }
    Ok(())
}

fn is_valid_prefix(prefix: &str) -> bool {
    !prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
