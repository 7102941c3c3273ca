//! The Document Index: normalized storage plus similarity/keyword retrieval.
//!
//! Indexing never fails because an embedding could not be produced, and
//! searching never fails because the embedding provider is down. In both
//! cases the index silently degrades: documents are stored without a
//! vector, and queries are answered in keyword mode.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{
    BatchFailure, BatchReport, IndexStats, IndexedDocument, Metadata, NewDocument, SearchOptions,
    SearchResult, META_INDEXED_AT, META_WORD_COUNT,
};
use crate::search::{
    has_embedded_candidates, rank_by_keywords, rank_by_similarity, DEFAULT_SIMILARITY_THRESHOLD,
};
use crate::store::memory::InMemoryDocumentStore;
use crate::store::DocumentStore;
use crate::text::{normalize_content, query_terms, word_count, DEFAULT_MAX_CONTENT_CHARS};

/// Index tuning, decoupled from application config.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Normalized content is truncated to this many characters.
    pub max_content_chars: usize,
    /// Default similarity threshold when the caller does not supply one.
    pub similarity_threshold: f64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Document storage and retrieval over a pluggable [`DocumentStore`].
pub struct DocumentIndex<S = InMemoryDocumentStore> {
    store: S,
    embedder: Option<Arc<dyn Embedder>>,
    settings: IndexSettings,
}

impl DocumentIndex<InMemoryDocumentStore> {
    /// In-memory index with default settings.
    pub fn in_memory(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self::new(InMemoryDocumentStore::new(), embedder, IndexSettings::default())
    }
}

impl<S: DocumentStore> DocumentIndex<S> {
    pub fn new(store: S, embedder: Option<Arc<dyn Embedder>>, settings: IndexSettings) -> Self {
        Self {
            store,
            embedder,
            settings,
        }
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn has_embedder(&self) -> bool {
        self.embedder.is_some()
    }

    /// Normalize, embed (best effort), and store a document.
    ///
    /// Re-indexing an existing id replaces the previous entry atomically.
    #[instrument(skip(self, content, metadata), fields(id = %id))]
    pub async fn index_document(&self, id: &str, content: &str, metadata: Metadata) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::validation("document id must not be empty"));
        }
        let normalized = normalize_content(content, self.settings.max_content_chars);
        if normalized.is_empty() {
            return Err(Error::validation(format!(
                "document {id} has no content after normalization"
            )));
        }

        let embedding = self.try_embed(&normalized).await;

        let now = Utc::now();
        let mut metadata = metadata;
        metadata.insert(META_WORD_COUNT.into(), Value::from(word_count(&normalized)));
        metadata.insert(META_INDEXED_AT.into(), Value::from(now.to_rfc3339()));

        self.store
            .put(IndexedDocument {
                id: id.to_string(),
                content: normalized,
                metadata,
                embedding,
                indexed_at: now,
            })
            .await?;

        debug!("document indexed");
        Ok(())
    }

    /// Search with automatic mode selection.
    ///
    /// Similarity mode runs when an embedder is configured, the query embeds
    /// successfully, and at least one embedded document passes the filter.
    /// Otherwise keyword mode runs. Results are at most `limit` long and
    /// sorted by descending score.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.search_excluding(query, limit, options, None).await
    }

    /// Documents most similar to an already indexed one, excluding itself.
    pub async fn find_similar(&self, id: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let doc = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("document {id}")))?;
        self.search_excluding(&doc.content, limit, &SearchOptions::default(), Some(id))
            .await
    }

    /// Index each document independently; one failure never aborts the batch.
    #[instrument(skip_all, fields(count = docs.len()))]
    pub async fn batch_index(&self, docs: Vec<NewDocument>) -> BatchReport {
        let mut report = BatchReport::default();
        for doc in docs {
            match self.index_document(&doc.id, &doc.content, doc.metadata).await {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    warn!(id = %doc.id, error = %e, "document failed to index");
                    report.failed += 1;
                    report.errors.push(BatchFailure {
                        id: doc.id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }

    pub async fn get(&self, id: &str) -> Result<Option<IndexedDocument>> {
        self.store.get(id).await
    }

    /// Remove a document. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        self.store.delete(id).await
    }

    /// Counters for external health reporting.
    pub async fn stats(&self) -> Result<IndexStats> {
        let docs = self.store.list().await?;
        let total = docs.len();
        let with_embeddings = docs.iter().filter(|d| d.embedding.is_some()).count();
        let average_content_length = if total == 0 {
            0.0
        } else {
            docs.iter().map(|d| d.content.chars().count()).sum::<usize>() as f64 / total as f64
        };
        Ok(IndexStats {
            total_documents: total,
            with_embeddings,
            average_content_length,
        })
    }

    async fn search_excluding(
        &self,
        query: &str,
        limit: usize,
        options: &SearchOptions,
        exclude_id: Option<&str>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let docs = self.store.list().await?;

        if has_embedded_candidates(&docs, &options.filter, exclude_id) {
            let normalized = normalize_content(query, self.settings.max_content_chars);
            if let Some(query_vec) = self.try_embed(&normalized).await {
                let threshold = options
                    .threshold
                    .unwrap_or(self.settings.similarity_threshold);
                return Ok(rank_by_similarity(
                    &docs,
                    &query_vec,
                    threshold,
                    &options.filter,
                    exclude_id,
                    limit,
                ));
            }
        }

        let terms = query_terms(query);
        Ok(rank_by_keywords(
            &docs,
            &terms,
            &options.filter,
            exclude_id,
            limit,
        ))
    }

    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => {
                warn!(model = embedder.model_name(), "embedder returned an empty vector");
                None
            }
            Err(e) => {
                warn!(model = embedder.model_name(), error = %e, "embedding failed, continuing without vector");
                None
            }
        }
    }
}
