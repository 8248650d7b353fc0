//! Resolve and cache hreflang alternate-language tags for a multisite network.
//!
//! Each site of the network serves one language. For a page on one site the
//! [`resolver`] finds its counterparts on the others, [`tags`] orders them
//! into `<link rel="alternate">` tags, [`cache`] keeps the rendered block per
//! site, and [`scheduler`] rebuilds every site on a fixed cadence.

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod resolver;
pub mod retry;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod service;
pub mod store;
pub mod tags;

pub use error::{Error, Result, StoreError};
pub use model::{AlternateSet, PageKey, PageRef, PageType, Site, SiteId};
pub use service::HreflangService;
