//! Document persistence for tracked pull requests.
//!
//! Each tracked PR owns a small set of JSON documents, one per [`DocumentKind`].
//! The [`DocumentStore`] trait abstracts the backend so the turn store can run
//! against memory in tests and SQLite in production.

mod memory;
mod sqlite;

pub use memory::InMemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use thiserror::Error;

/// Unique identifier for a pull request across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrId {
    pub workspace: String,
    pub repo: String,
    pub number: u64,
}

impl PrId {
    pub fn new(workspace: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            workspace: workspace.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.workspace, self.repo, self.number)
    }
}

/// Error returned when a `workspace/repo/number` string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("expected <workspace>/<repo>/<number>, got {0:?}")]
pub struct ParsePrIdError(String);

impl FromStr for PrId {
    type Err = ParsePrIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePrIdError(s.to_string());
        let mut parts = s.split('/');
        let (Some(workspace), Some(repo), Some(number), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(err());
        };
        if workspace.is_empty() || repo.is_empty() {
            return Err(err());
        }
        let number = number.parse().map_err(|_| err())?;
        Ok(Self::new(workspace, repo, number))
    }
}

/// Kinds of per-PR documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Turn-taking state.
    Turns,
    /// Last mirrored snapshot of the PR.
    Snapshot,
    /// Last posted status report.
    Status,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Turns => "turns",
            Self::Snapshot => "snapshot",
            Self::Status => "status",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of one stored document: a PR identifier suffixed by document kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub pr: PrId,
    pub kind: DocumentKind,
}

impl DocumentKey {
    pub fn new(pr: PrId, kind: DocumentKind) -> Self {
        Self { pr, kind }
    }

    pub fn turns(pr: PrId) -> Self {
        Self::new(pr, DocumentKind::Turns)
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.pr, self.kind)
    }
}

/// Errors from a document store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The backend failed to carry out an operation.
    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },

    /// Stored data could not be decoded.
    #[error("corrupt {0}")]
    Corruption(String),
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption(what.into())
    }
}

/// Storage for per-PR documents.
///
/// Implementations guarantee that the last successful `store` is durable and that
/// a `load` issued afterwards in the same process observes it.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Get a document, returning `None` if it does not exist.
    async fn load(&self, key: &DocumentKey) -> Result<Option<String>, RepositoryError>;

    /// Store a document (upsert semantics).
    async fn store(&self, key: &DocumentKey, document: &str) -> Result<(), RepositoryError>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, key: &DocumentKey) -> Result<bool, RepositoryError>;

    /// PRs that have a document of the given kind.
    async fn keys(&self, kind: DocumentKind) -> Result<Vec<PrId>, RepositoryError>;
}
