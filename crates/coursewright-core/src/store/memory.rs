//! In-memory [`DocumentStore`] implementation.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`. Locks are never held across
//! an `.await`, so the store is safe to share between tokio worker threads.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::IndexedDocument;

use super::DocumentStore;

/// Process-local document store.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    docs: RwLock<HashMap<String, IndexedDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> Error {
    Error::Store("document map lock poisoned".into())
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs.get(id).cloned())
    }

    async fn put(&self, doc: IndexedDocument) -> Result<()> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        docs.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut docs = self.docs.write().map_err(|_| poisoned())?;
        Ok(docs.remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<IndexedDocument>> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs.values().cloned().collect())
    }

    async fn len(&self) -> Result<usize> {
        let docs = self.docs.read().map_err(|_| poisoned())?;
        Ok(docs.len())
    }
}
