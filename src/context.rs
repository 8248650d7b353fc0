//! The process-wide "active site" register.
//!
//! Content-store queries run against whichever site is active. Switching is a
//! non-reentrant critical section: [`ContextRegister::enter`] takes the
//! register lock, makes the target site active, and hands back a
//! [`SiteContext`] guard. Dropping the guard restores the previously active
//! site and releases the lock, on every exit path.

use crate::model::{Site, SiteId};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Shared register holding the currently active site, if any.
#[derive(Debug, Clone, Default)]
pub struct ContextRegister {
    active: Arc<Mutex<Option<SiteId>>>,
}

impl ContextRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch the active site, waiting for any outstanding switch to finish.
    pub async fn enter(&self, site: &Site) -> SiteContext {
        let mut guard = Arc::clone(&self.active).lock_owned().await;
        let previous = guard.replace(site.id);
        debug!(site = %site.id, "switched active site");

        SiteContext {
            site: site.clone(),
            previous,
            guard,
        }
    }

    /// The site currently active outside of any switch.
    pub async fn current(&self) -> Option<SiteId> {
        *self.active.lock().await
    }

    /// Set the site that is active between switches (the "home" site).
    pub async fn set_home(&self, site: Option<SiteId>) {
        *self.active.lock().await = site;
    }
}

/// Proof that a site is active. Passed to every content-store call.
#[derive(Debug)]
pub struct SiteContext {
    site: Site,
    previous: Option<SiteId>,
    guard: OwnedMutexGuard<Option<SiteId>>,
}

impl SiteContext {
    pub fn site(&self) -> &Site {
        &self.site
    }

    pub fn site_id(&self) -> SiteId {
        self.site.id
    }
}

impl Drop for SiteContext {
    fn drop(&mut self) {
        *self.guard = self.previous;
        debug!(site = %self.site.id, "restored active site");
    }
}
