//! Per-PR turn state on top of a [`DocumentStore`].
//!
//! Every operation runs the full load → apply one transition → persist cycle
//! while holding that PR's lock. Events for the same PR therefore serialize,
//! while different PRs proceed independently.

use std::collections::HashMap;
use std::sync::Arc;

use reviewbot_core::PrTurn;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::event::TurnEvent;
use crate::store::{DocumentKey, DocumentKind, DocumentStore, PrId, RepositoryError};

#[derive(Debug, Error)]
pub enum TurnStoreError {
    /// No turn document exists for the PR.
    #[error("pull request {0} is not tracked")]
    NotTracked(PrId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to encode turn document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("corrupt turn document for {pr}: {source}")]
    Decode {
        pr: PrId,
        #[source]
        source: serde_json::Error,
    },
}

/// Turn documents with per-PR locking.
///
/// # Concurrency
///
/// Locks are created lazily per PR and never reclaimed. Readers share a PR's
/// lock; mutators hold it exclusively until their write has been persisted.
/// If persisting fails the mutation is discarded and the error returned.
pub struct TurnStore {
    repository: Arc<dyn DocumentStore>,
    pr_locks: RwLock<HashMap<PrId, Arc<RwLock<()>>>>,
}

impl TurnStore {
    pub fn new(repository: Arc<dyn DocumentStore>) -> Self {
        Self {
            repository,
            pr_locks: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the lock for a specific PR.
    async fn pr_lock(&self, pr: &PrId) -> Arc<RwLock<()>> {
        // Fast path: lock already exists
        {
            let locks = self.pr_locks.read().await;
            if let Some(lock) = locks.get(pr) {
                return lock.clone();
            }
        }

        // Slow path: the entry API re-checks under the write lock
        let mut locks = self.pr_locks.write().await;
        locks
            .entry(pr.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    async fn load(&self, pr: &PrId) -> Result<Option<PrTurn>, TurnStoreError> {
        let Some(json) = self.repository.load(&DocumentKey::turns(pr.clone())).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| TurnStoreError::Decode {
                pr: pr.clone(),
                source,
            })
    }

    async fn persist(&self, pr: &PrId, turn: &PrTurn) -> Result<(), TurnStoreError> {
        let json = serde_json::to_string(turn)?;
        self.repository
            .store(&DocumentKey::turns(pr.clone()), &json)
            .await?;
        Ok(())
    }

    /// Apply one transition to a tracked PR and persist the result if it changed.
    ///
    /// Returns the transition's own verdict on whether it did anything.
    async fn mutate<F>(
        &self,
        pr: &PrId,
        operation: &'static str,
        apply: F,
    ) -> Result<bool, TurnStoreError>
    where
        F: FnOnce(&mut PrTurn) -> bool + Send,
    {
        let lock = self.pr_lock(pr).await;
        let _guard = lock.write().await;

        let mut turn = self
            .load(pr)
            .await?
            .ok_or_else(|| TurnStoreError::NotTracked(pr.clone()))?;
        let before = turn.clone();
        let result = apply(&mut turn);

        if turn != before {
            self.persist(pr, &turn).await?;
        }
        info!(pr = %pr, operation, result, "Applied turn transition");
        Ok(result)
    }

    /// Start tracking a PR, replacing any previous turn document.
    pub async fn init<S: AsRef<str> + Sync>(
        &self,
        pr: &PrId,
        author: &str,
        reviewers: &[S],
    ) -> Result<PrTurn, TurnStoreError> {
        let lock = self.pr_lock(pr).await;
        let _guard = lock.write().await;

        let turn = PrTurn::new(author, reviewers.iter());
        self.persist(pr, &turn).await?;
        info!(
            pr = %pr,
            author = turn.author(),
            reviewers = turn.reviewers().len(),
            "Started tracking turns"
        );
        Ok(turn)
    }

    pub async fn add_reviewer(&self, pr: &PrId, email: &str) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "add_reviewer", |turn| turn.add_reviewer(email))
            .await
    }

    pub async fn remove_reviewer(&self, pr: &PrId, email: &str) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "remove_reviewer", |turn| turn.remove_reviewer(email))
            .await
    }

    pub async fn set_explicit<S: AsRef<str> + Sync>(
        &self,
        pr: &PrId,
        emails: &[S],
    ) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "set_explicit", |turn| turn.set_explicit(emails.iter()))
            .await
    }

    pub async fn switch(&self, pr: &PrId, email: &str) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "switch", |turn| turn.switch(email)).await
    }

    pub async fn freeze(&self, pr: &PrId, by: &str) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "freeze", |turn| turn.freeze(by)).await
    }

    pub async fn unfreeze(&self, pr: &PrId) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "unfreeze", |turn| turn.unfreeze()).await
    }

    pub async fn nudge(&self, pr: &PrId, email: &str) -> Result<bool, TurnStoreError> {
        self.mutate(pr, "nudge", |turn| turn.nudge(email)).await
    }

    /// Stop tracking a PR. Returns whether it was tracked.
    pub async fn delete(&self, pr: &PrId) -> Result<bool, TurnStoreError> {
        let lock = self.pr_lock(pr).await;
        let _guard = lock.write().await;

        let deleted = self
            .repository
            .delete(&DocumentKey::turns(pr.clone()))
            .await?;
        info!(pr = %pr, deleted, "Stopped tracking turns");
        Ok(deleted)
    }

    /// The turn document of a PR, if it is tracked.
    pub async fn document(&self, pr: &PrId) -> Result<Option<PrTurn>, TurnStoreError> {
        let lock = self.pr_lock(pr).await;
        let _guard = lock.read().await;
        self.load(pr).await
    }

    /// Whose attention the PR needs right now.
    pub async fn current_turn(&self, pr: &PrId) -> Result<Vec<String>, TurnStoreError> {
        self.document(pr)
            .await?
            .map(|turn| turn.current_turn())
            .ok_or_else(|| TurnStoreError::NotTracked(pr.clone()))
    }

    /// Who froze the PR, if anyone.
    pub async fn frozen_by(&self, pr: &PrId) -> Result<Option<String>, TurnStoreError> {
        self.document(pr)
            .await?
            .map(|turn| turn.frozen_by().map(str::to_string))
            .ok_or_else(|| TurnStoreError::NotTracked(pr.clone()))
    }

    /// All PRs with a turn document.
    pub async fn tracked(&self) -> Result<Vec<PrId>, TurnStoreError> {
        Ok(self.repository.keys(DocumentKind::Turns).await?)
    }

    /// Apply an inbound event. Returns whether it changed anything.
    pub async fn process_event(
        &self,
        pr: &PrId,
        event: TurnEvent,
    ) -> Result<bool, TurnStoreError> {
        debug!(pr = %pr, event = %event.log_summary(), "Processing turn event");
        match event {
            TurnEvent::Opened { author, reviewers } => {
                self.init(pr, &author, &reviewers).await?;
                Ok(true)
            }
            TurnEvent::ReviewerAdded { reviewer } => self.add_reviewer(pr, &reviewer).await,
            TurnEvent::ReviewerRemoved { reviewer } | TurnEvent::Approved { reviewer } => {
                self.remove_reviewer(pr, &reviewer).await
            }
            TurnEvent::Activity { actor } => self.switch(pr, &actor).await,
            TurnEvent::Closed => self.delete(pr).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDocumentStore;
    use async_trait::async_trait;

    fn pr() -> PrId {
        PrId::new("acme", "widgets", 7)
    }

    fn store() -> TurnStore {
        TurnStore::new(Arc::new(InMemoryDocumentStore::new()))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_untracked_pr_is_an_error() {
        let store = store();
        assert!(matches!(
            store.current_turn(&pr()).await,
            Err(TurnStoreError::NotTracked(_))
        ));
        assert!(matches!(
            store.switch(&pr(), "a").await,
            Err(TurnStoreError::NotTracked(_))
        ));
        assert!(store.document(&pr()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store = store();
        let no_reviewers: [&str; 0] = [];
        store.init(&pr(), "a", &no_reviewers).await.unwrap();
        assert_eq!(store.current_turn(&pr()).await.unwrap(), strings(&["a"]));

        store.add_reviewer(&pr(), "r1").await.unwrap();
        store.add_reviewer(&pr(), "r2").await.unwrap();
        assert_eq!(
            store.current_turn(&pr()).await.unwrap(),
            strings(&["r1", "r2"])
        );

        assert!(store.switch(&pr(), "r1").await.unwrap());
        assert_eq!(
            store.current_turn(&pr()).await.unwrap(),
            strings(&["a", "r2"])
        );

        assert!(store.switch(&pr(), "a").await.unwrap());
        assert!(store.remove_reviewer(&pr(), "r1").await.unwrap());
        assert_eq!(store.current_turn(&pr()).await.unwrap(), strings(&["r2"]));
    }

    #[tokio::test]
    async fn test_freeze_and_nudge_through_store() {
        let store = store();
        store.init(&pr(), "a", &["r1"]).await.unwrap();

        assert!(store.freeze(&pr(), "Lead@x.io").await.unwrap());
        assert!(!store.freeze(&pr(), "other@x.io").await.unwrap());
        assert_eq!(
            store.frozen_by(&pr()).await.unwrap().as_deref(),
            Some("lead@x.io")
        );
        assert!(!store.switch(&pr(), "r1").await.unwrap());
        assert!(store.nudge(&pr(), "a").await.unwrap());
        assert!(!store.nudge(&pr(), "stranger").await.unwrap());
        assert_eq!(
            store.current_turn(&pr()).await.unwrap(),
            strings(&["a", "r1"])
        );

        assert!(store.unfreeze(&pr()).await.unwrap());
        assert_eq!(store.frozen_by(&pr()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_explicit_through_store() {
        let store = store();
        store.init(&pr(), "a", &["r1", "r2"]).await.unwrap();
        assert!(store.set_explicit(&pr(), &["r2"]).await.unwrap());
        assert_eq!(store.current_turn(&pr()).await.unwrap(), strings(&["r2"]));
        let doc = store.document(&pr()).await.unwrap().unwrap();
        assert!(doc.is_explicit());
    }

    #[tokio::test]
    async fn test_events_drive_transitions() {
        let store = store();
        let events = vec![
            TurnEvent::Opened {
                author: "A@x.io".to_string(),
                reviewers: strings(&["r1@x.io"]),
            },
            TurnEvent::ReviewerAdded {
                reviewer: "r2@x.io".to_string(),
            },
            TurnEvent::Activity {
                actor: "r1@x.io".to_string(),
            },
        ];
        for event in events {
            store.process_event(&pr(), event).await.unwrap();
        }
        assert_eq!(
            store.current_turn(&pr()).await.unwrap(),
            strings(&["a@x.io", "r2@x.io"])
        );

        let approved = TurnEvent::Approved {
            reviewer: "r2@x.io".to_string(),
        };
        assert!(store.process_event(&pr(), approved).await.unwrap());
        assert_eq!(
            store.current_turn(&pr()).await.unwrap(),
            strings(&["a@x.io"])
        );

        assert!(store.process_event(&pr(), TurnEvent::Closed).await.unwrap());
        assert!(store.tracked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_events_for_same_pr_serialize() {
        let store = Arc::new(store());
        let no_reviewers: [&str; 0] = [];
        store.init(&pr(), "a", &no_reviewers).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.add_reviewer(&pr(), &format!("r{i}")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let doc = store.document(&pr()).await.unwrap().unwrap();
        assert_eq!(doc.reviewers().len(), 32);
    }

    /// A backend whose writes always fail.
    struct FailingStore {
        inner: InMemoryDocumentStore,
    }

    #[async_trait]
    impl DocumentStore for FailingStore {
        async fn load(&self, key: &DocumentKey) -> Result<Option<String>, RepositoryError> {
            self.inner.load(key).await
        }

        async fn store(&self, _key: &DocumentKey, _doc: &str) -> Result<(), RepositoryError> {
            Err(RepositoryError::storage("store", "disk full"))
        }

        async fn delete(&self, key: &DocumentKey) -> Result<bool, RepositoryError> {
            self.inner.delete(key).await
        }

        async fn keys(&self, kind: DocumentKind) -> Result<Vec<PrId>, RepositoryError> {
            self.inner.keys(kind).await
        }
    }

    #[tokio::test]
    async fn test_persist_failure_discards_mutation() {
        let inner = InMemoryDocumentStore::new();
        let original = PrTurn::new("a", ["r1"]);
        inner
            .store(
                &DocumentKey::turns(pr()),
                &serde_json::to_string(&original).unwrap(),
            )
            .await
            .unwrap();
        let store = TurnStore::new(Arc::new(FailingStore { inner }));

        let err = store.switch(&pr(), "r1").await.unwrap_err();
        assert!(matches!(err, TurnStoreError::Repository(_)));
        assert_eq!(store.document(&pr()).await.unwrap(), Some(original));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let inner = InMemoryDocumentStore::new();
        inner
            .store(&DocumentKey::turns(pr()), "not json")
            .await
            .unwrap();
        let store = TurnStore::new(Arc::new(inner));
        assert!(matches!(
            store.current_turn(&pr()).await,
            Err(TurnStoreError::Decode { .. })
        ));
    }
}
