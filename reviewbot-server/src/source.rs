//! Loading CODEOWNERS and high-risk lists from a repository revision.
//!
//! Files are fetched through a [`SourceFetcher`] and memoized in a
//! [`SourceFileCache`] that the caller owns. Entries are keyed by commit, so
//! they never go stale and the cache needs no invalidation.

use std::collections::HashMap;

use async_trait::async_trait;
use reviewbot_core::{HighRiskList, OwnershipError, OwnershipTable};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Where to read source files from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub workspace: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("source backend failed: {0}")]
    Backend(String),
}

/// Reads a single file at a given revision.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// `Ok(None)` when the file does not exist at that revision.
    async fn fetch(
        &self,
        location: &SourceLocation,
        path: &str,
    ) -> Result<Option<String>, FetchError>;
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Ownership(#[from] OwnershipError),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    workspace: String,
    repo: String,
    commit: String,
    path: String,
}

impl CacheKey {
    fn new(location: &SourceLocation, path: &str) -> Self {
        Self {
            workspace: location.workspace.clone(),
            repo: location.repo.clone(),
            commit: location.commit.clone(),
            path: path.to_string(),
        }
    }
}

/// Fetched files by (workspace, repo, commit, path).
///
/// Files that do not exist are cached too. Fetch failures are not.
#[derive(Default)]
pub struct SourceFileCache {
    files: RwLock<HashMap<CacheKey, Option<String>>>,
}

impl SourceFileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Return the cached file, fetching it on a miss.
    pub async fn get_or_fetch(
        &self,
        fetcher: &dyn SourceFetcher,
        location: &SourceLocation,
        path: &str,
    ) -> Result<Option<String>, FetchError> {
        let key = CacheKey::new(location, path);
        if let Some(file) = self.files.read().await.get(&key) {
            return Ok(file.clone());
        }

        debug!(
            workspace = %location.workspace,
            repo = %location.repo,
            commit = %location.commit,
            path,
            "Fetching source file"
        );
        let file = fetcher.fetch(location, path).await?;
        self.files.write().await.insert(key, file.clone());
        Ok(file)
    }
}

/// Build an ownership table from an optional CODEOWNERS document.
///
/// A missing document and one with broken group definitions both give an empty
/// table. Invalid path patterns are returned as errors.
pub fn ownership_from_text(text: Option<&str>) -> Result<OwnershipTable, OwnershipError> {
    let Some(text) = text else {
        return Ok(OwnershipTable::default());
    };
    match OwnershipTable::parse(text) {
        Ok(table) => Ok(table),
        Err(e) if e.is_malformed_groups() => {
            warn!(error = %e, "Ignoring CODEOWNERS with malformed groups");
            Ok(OwnershipTable::default())
        }
        Err(e) => Err(e),
    }
}

/// Ownership rules of `path` at `location`.
pub async fn load_ownership(
    fetcher: &dyn SourceFetcher,
    cache: &SourceFileCache,
    location: &SourceLocation,
    path: &str,
) -> Result<OwnershipTable, LoadError> {
    let text = cache.get_or_fetch(fetcher, location, path).await?;
    Ok(ownership_from_text(text.as_deref())?)
}

/// High-risk prefixes listed in `path` at `location`. A missing list flags nothing.
pub async fn load_high_risk(
    fetcher: &dyn SourceFetcher,
    cache: &SourceFileCache,
    location: &SourceLocation,
    path: &str,
) -> Result<HighRiskList, FetchError> {
    let text = cache.get_or_fetch(fetcher, location, path).await?;
    Ok(text.map(|text| HighRiskList::parse(&text)).unwrap_or_default())
}
