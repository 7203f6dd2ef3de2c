//! SQLite implementation of `DocumentStore`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use super::{DocumentKey, DocumentKind, DocumentStore, PrId, RepositoryError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

/// SQLite-backed document store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    ///
    /// The database is configured with `journal_mode = WAL`, `synchronous = FULL`
    /// and a 5 second busy timeout.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        #[cfg(unix)]
        if !is_in_memory {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = std::fs::set_permissions(path_ref, permissions) {
                warn!("Failed to set restrictive permissions on database file: {}", e);
            }
        }

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the filesystem may not \
                     support shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure database", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;
        debug!(path = %path_str, "Opened document database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a store backed by a private in-memory database.
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }
        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS pr_documents (
                    workspace TEXT NOT NULL,
                    repo TEXT NOT NULL,
                    pr_number INTEGER NOT NULL,
                    kind TEXT NOT NULL,
                    document TEXT NOT NULL,
                    PRIMARY KEY (workspace, repo, pr_number, kind)
                );
                CREATE INDEX IF NOT EXISTS idx_documents_kind ON pr_documents(kind);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, RepositoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| RepositoryError::storage(operation, "connection mutex poisoned"))?;
            f(&conn).map_err(|e| RepositoryError::storage(operation, e.to_string()))
        })
        .await
        .map_err(|e| RepositoryError::storage(operation, e.to_string()))?
    }
}

/// SQLite integers are signed; numbers beyond `i64::MAX` cannot be stored.
fn pr_number(operation: &'static str, pr: &PrId) -> Result<i64, RepositoryError> {
    i64::try_from(pr.number).map_err(|_| {
        RepositoryError::storage(
            operation,
            format!("pull request number {} is out of range", pr.number),
        )
    })
}

fn kind_from_str(kind: &str) -> Option<DocumentKind> {
    [
        DocumentKind::Turns,
        DocumentKind::Snapshot,
        DocumentKind::Status,
    ]
    .into_iter()
    .find(|candidate| candidate.as_str() == kind)
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn load(&self, key: &DocumentKey) -> Result<Option<String>, RepositoryError> {
        let number = pr_number("load", &key.pr)?;
        let key = key.clone();
        self.with_conn("load", move |conn| {
            conn.query_row(
                "SELECT document FROM pr_documents
                 WHERE workspace = ?1 AND repo = ?2 AND pr_number = ?3 AND kind = ?4",
                params![
                    key.pr.workspace,
                    key.pr.repo,
                    number,
                    key.kind.as_str()
                ],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn store(&self, key: &DocumentKey, document: &str) -> Result<(), RepositoryError> {
        let number = pr_number("store", &key.pr)?;
        let key = key.clone();
        let document = document.to_string();
        self.with_conn("store", move |conn| {
            conn.execute(
                "INSERT INTO pr_documents (workspace, repo, pr_number, kind, document)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(workspace, repo, pr_number, kind) DO UPDATE SET
                     document = excluded.document",
                params![
                    key.pr.workspace,
                    key.pr.repo,
                    number,
                    key.kind.as_str(),
                    document
                ],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, key: &DocumentKey) -> Result<bool, RepositoryError> {
        let number = pr_number("delete", &key.pr)?;
        let key = key.clone();
        self.with_conn("delete", move |conn| {
            conn.execute(
                "DELETE FROM pr_documents
                 WHERE workspace = ?1 AND repo = ?2 AND pr_number = ?3 AND kind = ?4",
                params![
                    key.pr.workspace,
                    key.pr.repo,
                    number,
                    key.kind.as_str()
                ],
            )
            .map(|deleted| deleted > 0)
        })
        .await
    }

    async fn keys(&self, kind: DocumentKind) -> Result<Vec<PrId>, RepositoryError> {
        let rows: Vec<(String, String, i64, String)> = self
            .with_conn("keys", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT workspace, repo, pr_number, kind FROM pr_documents
                     WHERE kind = ?1 ORDER BY workspace, repo, pr_number",
                )?;
                let rows = stmt.query_map(params![kind.as_str()], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
                })?;
                rows.collect()
            })
            .await?;

        rows.into_iter()
            .map(|(workspace, repo, number, stored_kind)| {
                if kind_from_str(&stored_kind) != Some(kind) {
                    return Err(RepositoryError::corruption("document kind"));
                }
                let number = u64::try_from(number)
                    .map_err(|_| RepositoryError::corruption("pull request number"))?;
                Ok(PrId::new(workspace, repo, number))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(number: u64) -> DocumentKey {
        DocumentKey::turns(PrId::new("acme", "widgets", number))
    }

    fn temp_db(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "reviewbot_sqlite_{}_{}.db",
            name,
            std::process::id()
        ))
    }

    fn remove_db(path: &Path) {
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(format!("{}-wal", path.display()));
        let _ = std::fs::remove_file(format!("{}-shm", path.display()));
    }

    #[tokio::test]
    async fn test_store_load_delete() {
        let store = SqliteDocumentStore::new_in_memory().expect("should create store");
        assert_eq!(store.load(&key(1)).await.unwrap(), None);

        store.store(&key(1), "{\"v\":1}").await.unwrap();
        store.store(&key(1), "{\"v\":2}").await.unwrap();
        assert_eq!(
            store.load(&key(1)).await.unwrap().as_deref(),
            Some("{\"v\":2}")
        );

        assert!(store.delete(&key(1)).await.unwrap());
        assert!(!store.delete(&key(1)).await.unwrap());
        assert_eq!(store.load(&key(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_out_of_range_number_is_rejected_without_breaking_keys() {
        let store = SqliteDocumentStore::new_in_memory().expect("should create store");
        store.store(&key(1), "{}").await.unwrap();

        let huge = key(u64::MAX);
        assert!(matches!(
            store.store(&huge, "{}").await,
            Err(RepositoryError::Storage { .. })
        ));
        assert!(store.load(&huge).await.is_err());
        assert!(store.delete(&huge).await.is_err());

        assert_eq!(
            store.keys(DocumentKind::Turns).await.unwrap(),
            vec![PrId::new("acme", "widgets", 1)]
        );
        assert!(store.store(&key(i64::MAX as u64), "{}").await.is_ok());
    }

    #[tokio::test]
    async fn test_keys_filters_by_kind_and_sorts() {
        let store = SqliteDocumentStore::new_in_memory().expect("should create store");
        store.store(&key(9), "{}").await.unwrap();
        store.store(&key(2), "{}").await.unwrap();
        store
            .store(
                &DocumentKey::new(PrId::new("acme", "widgets", 5), DocumentKind::Snapshot),
                "{}",
            )
            .await
            .unwrap();

        let turns = store.keys(DocumentKind::Turns).await.unwrap();
        assert_eq!(
            turns,
            vec![
                PrId::new("acme", "widgets", 2),
                PrId::new("acme", "widgets", 9)
            ]
        );
        let snapshots = store.keys(DocumentKind::Snapshot).await.unwrap();
        assert_eq!(snapshots, vec![PrId::new("acme", "widgets", 5)]);
    }

    #[tokio::test]
    async fn test_documents_survive_reopen() {
        let path = temp_db("reopen");
        remove_db(&path);

        {
            let store = SqliteDocumentStore::new(&path).expect("should create store");
            store.store(&key(42), "persisted").await.unwrap();
        }
        {
            let store = SqliteDocumentStore::new(&path).expect("should reopen store");
            assert_eq!(
                store.load(&key(42)).await.unwrap().as_deref(),
                Some("persisted")
            );
        }

        remove_db(&path);
    }

    #[test]
    fn test_rejects_newer_schema() {
        let path = temp_db("newer_schema");
        remove_db(&path);

        {
            let _store = SqliteDocumentStore::new(&path).expect("should create store");
        }
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE schema_version SET version = 99 WHERE id = 1", [])
                .unwrap();
        }
        let err = SqliteDocumentStore::new(&path)
            .err()
            .expect("newer schema should be rejected");
        assert!(matches!(err, RepositoryError::Storage { .. }));

        remove_db(&path);
    }
}
