//! Storage abstraction for indexed documents.
//!
//! The [`DocumentStore`] trait is the seam between the Document Index and
//! whatever holds the documents. The in-memory implementation is the only
//! one shipped; persistence across restarts is out of scope, but an
//! external cache can be plugged in behind the same four operations.
//!
//! Implementations must be `Send + Sync` and must make [`put`](DocumentStore::put)
//! atomic: readers see either the previous entry or the new one, never a mix.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::IndexedDocument;

/// Abstract storage backend for the Document Index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](DocumentStore::get) | Fetch one document by id |
/// | [`put`](DocumentStore::put) | Insert or replace a document |
/// | [`delete`](DocumentStore::delete) | Remove a document, reporting whether it existed |
/// | [`list`](DocumentStore::list) | Snapshot of every stored document |
/// | [`len`](DocumentStore::len) | Number of stored documents |
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<IndexedDocument>>;

    /// Insert or atomically replace the document with the same id.
    async fn put(&self, doc: IndexedDocument) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Snapshot of all documents. Order is unspecified.
    async fn list(&self) -> Result<Vec<IndexedDocument>>;

    async fn len(&self) -> Result<usize>;
}
