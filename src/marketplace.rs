//! Marketplace endpoints and package search
//!
//! The HTTP client lives outside this crate. It plugs in through
//! [`MarketplaceSource`] and leaves its results in the marketplace folder,
//! which [`CachedMarketplace`] serves from.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::catalog::{
    read_json_or_empty, read_json_strict, CatalogError, CatalogGuard, PackageDescriptor,
};

/// Category searched when the caller gives no term
pub const DEFAULT_SEARCH_TERM: &str = "vehicle";

pub const DEFAULT_MARKETPLACE_NAME: &str = "BGSV Marketplace";

/// One entry of `marketplaceselection.json`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketplaceEndpoint {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub marketplace_url: String,
    #[serde(default)]
    pub login_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub pwd: String,
}

impl MarketplaceEndpoint {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.pwd.is_empty()
    }
}

// Keep the password out of logs
impl fmt::Debug for MarketplaceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketplaceEndpoint")
            .field("name", &self.name)
            .field("marketplace_url", &self.marketplace_url)
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("pwd", &if self.pwd.is_empty() { "" } else { "***" })
            .finish()
    }
}

pub fn load_marketplaces(path: &Path) -> Vec<MarketplaceEndpoint> {
    read_json_or_empty(path)
}

/// Seed the selection file with a single unconfigured endpoint
pub fn ensure_marketplace_selection(guard: &CatalogGuard<'_>, path: &Path) -> Result<bool, CatalogError> {
    let default = [MarketplaceEndpoint {
        name: DEFAULT_MARKETPLACE_NAME.to_string(),
        ..Default::default()
    }];
    guard.write_if_missing(path, &default)
}

pub fn normalize_term(term: &str) -> &str {
    let term = term.trim();
    if term.is_empty() {
        DEFAULT_SEARCH_TERM
    } else {
        term
    }
}

/// Whether `descriptor` belongs to the searched category
pub fn matches_term(descriptor: &PackageDescriptor, term: &str) -> bool {
    descriptor
        .category
        .to_lowercase()
        .contains(&normalize_term(term).to_lowercase())
}

#[async_trait]
pub trait MarketplaceSource: Send + Sync {
    async fn search(
        &self,
        endpoint: &MarketplaceEndpoint,
        term: &str,
    ) -> Result<Vec<PackageDescriptor>, MarketplaceError>;
}

/// Serves the last result set the fetcher stored on disk
#[derive(Debug, Clone)]
pub struct CachedMarketplace {
    cache: PathBuf,
}

impl CachedMarketplace {
    pub fn new(cache: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
        }
    }
}

#[async_trait]
impl MarketplaceSource for CachedMarketplace {
    async fn search(
        &self,
        endpoint: &MarketplaceEndpoint,
        term: &str,
    ) -> Result<Vec<PackageDescriptor>, MarketplaceError> {
        log::debug!(
            "Searching cached results of {} for {:?}",
            endpoint.name,
            normalize_term(term)
        );
        let items: Vec<PackageDescriptor> = read_json_strict(&self.cache)?;
        Ok(items
            .into_iter()
            .filter(|d| matches_term(d, term))
            .collect())
    }
}

/// Persist a fetched result set: the whole array plus one install config per item
pub fn store_results(
    guard: &CatalogGuard<'_>,
    marketplace_dir: &Path,
    items: &[PackageDescriptor],
) -> Result<(), CatalogError> {
    for item in items.iter().filter(|d| !d.id.is_empty()) {
        let path = marketplace_dir.join(format!("{}_installcfg.json", item.id));
        guard.replace_json(&path, item)?;
    }
    guard.replace_all(&marketplace_dir.join("marketplace_data_installcfg.json"), items)
}

#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
