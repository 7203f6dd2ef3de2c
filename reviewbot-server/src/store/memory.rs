//! In-memory implementation of `DocumentStore`.
//!
//! All documents are held in memory and lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{DocumentKey, DocumentKind, DocumentStore, PrId, RepositoryError};

/// In-memory document store.
///
/// Stores documents in a `HashMap` protected by a `RwLock`.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentKey, String>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn load(&self, key: &DocumentKey) -> Result<Option<String>, RepositoryError> {
        let documents = self.documents.read().await;
        Ok(documents.get(key).cloned())
    }

    async fn store(&self, key: &DocumentKey, document: &str) -> Result<(), RepositoryError> {
        let mut documents = self.documents.write().await;
        documents.insert(key.clone(), document.to_string());
        Ok(())
    }

    async fn delete(&self, key: &DocumentKey) -> Result<bool, RepositoryError> {
        let mut documents = self.documents.write().await;
        Ok(documents.remove(key).is_some())
    }

    async fn keys(&self, kind: DocumentKind) -> Result<Vec<PrId>, RepositoryError> {
        let documents = self.documents.read().await;
        let mut prs: Vec<PrId> = documents
            .keys()
            .filter(|key| key.kind == kind)
            .map(|key| key.pr.clone())
            .collect();
        prs.sort();
        Ok(prs)
    }
}
