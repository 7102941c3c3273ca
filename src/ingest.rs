//! Material ingestion from a local directory.
//!
//! Walks `root` with include/exclude globs, splits every matching file into
//! fixed-size word windows, and batch-indexes the windows. Chunk ids are
//! `<relative path>#<index>`, so re-ingesting a directory replaces the
//! previous chunks of each file in place. When a file shrinks, its chunks
//! past the new last window are removed. Files deleted from the directory
//! keep their chunks until the process restarts.
//!
//! Version-control and build directories (`.git`, `target`, `node_modules`)
//! are always excluded. Files that are not valid UTF-8 are skipped and
//! reported, never fatal.

use std::path::Path;

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use coursewright_core::chunk::{chunk_id, chunk_words};
use coursewright_core::index::DocumentIndex;
use coursewright_core::models::{
    BatchReport, Metadata, NewDocument, META_CHUNK_INDEX, META_SOURCE, META_TITLE,
};
use coursewright_core::store::DocumentStore;

use crate::config::IngestConfig;

/// One file found by the walker.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Path relative to the ingestion root, used as the chunk source.
    pub relative: String,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
    /// Relative paths that could not be read as text.
    pub skipped: Vec<String>,
    pub indexed: BatchReport,
    /// Chunks left over from a longer earlier version of a file.
    pub pruned: usize,
}

/// Collect matching files under `root`, sorted by relative path.
pub fn scan_dir(root: &Path, config: &IngestConfig) -> Result<(Vec<SourceFile>, Vec<String>)> {
    if !root.exists() {
        bail!("Ingest root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    let mut skipped = Vec::new();

    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        match std::fs::read_to_string(path) {
            Ok(body) => files.push(SourceFile {
                title: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| rel_str.clone()),
                relative: rel_str,
                body,
            }),
            Err(e) => {
                warn!(path = %rel_str, error = %e, "skipping unreadable file");
                skipped.push(rel_str);
            }
        }
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok((files, skipped))
}

/// Chunk a file into index-ready documents.
pub fn file_documents(file: &SourceFile, chunk_words_per_window: usize) -> Vec<NewDocument> {
    chunk_words(&file.relative, &file.body, chunk_words_per_window)
        .into_iter()
        .map(|chunk| {
            let mut metadata = Metadata::new();
            metadata.insert(META_SOURCE.into(), json!(file.relative));
            metadata.insert(META_CHUNK_INDEX.into(), json!(chunk.index));
            metadata.insert(META_TITLE.into(), json!(file.title));
            metadata.insert("content_hash".into(), json!(chunk.hash));
            NewDocument {
                id: chunk.id,
                content: chunk.text,
                metadata,
            }
        })
        .collect()
}

/// Scan, chunk, and batch-index a directory.
pub async fn ingest_dir<S: DocumentStore>(
    index: &DocumentIndex<S>,
    root: &Path,
    config: &IngestConfig,
) -> Result<IngestReport> {
    let (files, skipped) = scan_dir(root, config)?;

    let mut docs = Vec::new();
    let mut windows = Vec::with_capacity(files.len());
    for file in &files {
        let chunks = file_documents(file, config.chunk_words);
        debug!(path = %file.relative, chunks = chunks.len(), "chunked file");
        windows.push((file.relative.as_str(), chunks.len()));
        docs.extend(chunks);
    }

    let chunks = docs.len();
    let indexed = index.batch_index(docs).await;

    let mut pruned = 0;
    for (source, count) in windows {
        pruned += prune_stale_chunks(index, source, count).await?;
    }

    info!(
        root = %root.display(),
        files = files.len(),
        chunks,
        pruned,
        failed = indexed.failed,
        "ingestion finished"
    );

    Ok(IngestReport {
        files: files.len(),
        chunks,
        skipped,
        indexed,
        pruned,
    })
}

/// Remove `<source>#<n>` for every `n >= count`. Chunk indexes are contiguous,
/// so the first missing id ends the run.
async fn prune_stale_chunks<S: DocumentStore>(
    index: &DocumentIndex<S>,
    source: &str,
    count: usize,
) -> Result<usize> {
    let mut removed = 0;
    while index.remove(&chunk_id(source, count + removed)).await? {
        removed += 1;
    }
    if removed > 0 {
        debug!(path = %source, removed, "pruned stale chunks");
    }
    Ok(removed)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
