//! Core data models shared by the index, the workflow engine, and the app crate.
//!
//! These types represent indexed documents, search results, generation
//! parameters, the structured course produced by the pipeline, and the
//! per-thread workflow state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Free-form document metadata. Keys are unordered for comparison purposes.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key holding the originating source identifier (e.g. a file path).
pub const META_SOURCE: &str = "source";
/// Metadata key holding the chunk position within its source.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key holding a human-readable title.
pub const META_TITLE: &str = "title";
/// Metadata key added at indexing time with the normalized word count.
pub const META_WORD_COUNT: &str = "word_count";
/// Metadata key added at indexing time with an RFC 3339 timestamp.
pub const META_INDEXED_AT: &str = "indexed_at";

// ---------------------------------------------------------------------------
// Documents and search
// ---------------------------------------------------------------------------

/// A document held by the Document Index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub id: String,
    /// Normalized text.
    pub content: String,
    pub metadata: Metadata,
    /// Absent when the embedding provider failed or is not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub indexed_at: DateTime<Utc>,
}

impl IndexedDocument {
    /// Word count recorded at indexing time, recomputed if the key is missing.
    pub fn word_count(&self) -> usize {
        self.metadata
            .get(META_WORD_COUNT)
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or_else(|| self.content.split_whitespace().count())
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get(META_TITLE).and_then(Value::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(Value::as_str)
    }
}

/// Input for [`DocumentIndex::index_document`](crate::index::DocumentIndex::index_document)
/// and batch indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDocument {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Which scoring path produced a [`SearchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Cosine similarity, scores in `[-1, 1]`.
    Similarity,
    /// Weighted term matching, scores in `[0, ∞)`.
    Keyword,
}

/// A read-only snapshot of a matching document.
///
/// Scores are only comparable between results of the same [`SearchMode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    /// Document metadata plus `similarity` or `keyword_score`.
    pub metadata: Metadata,
    pub score: f64,
    pub mode: SearchMode,
}

impl SearchResult {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).and_then(Value::as_str)
    }
}

/// Search tuning passed alongside the query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Minimum cosine similarity; falls back to the index default when `None`.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Per-key metadata filter. An array value matches if the document's
    /// value is one of its elements; any other value must match exactly.
    #[serde(default)]
    pub filter: Metadata,
}

/// Point-in-time counters read by the health surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub with_embeddings: usize,
    pub average_content_length: f64,
}

/// Per-item outcome of a batch indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Generation inputs and outputs
// ---------------------------------------------------------------------------

/// Caller-supplied course generation parameters. Immutable for a workflow's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub title: String,
    pub target_audience: String,
    pub teaching_style: String,
    pub learning_objective: String,
    #[serde(default)]
    pub compulsory_areas: Vec<String>,
}

impl GenerationParameters {
    /// Reject missing required fields before any stage runs.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("title", &self.title),
            ("target_audience", &self.target_audience),
            ("teaching_style", &self.teaching_style),
            ("learning_objective", &self.learning_objective),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{name} must not be empty")));
            }
        }
        Ok(())
    }
}

/// Structured course produced by the generating stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub method: String,
    pub topics: Vec<Topic>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationMetadata>,
}

/// One teaching unit within a [`Course`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    #[serde(alias = "name")]
    pub title: String,
    #[serde(default, alias = "learning_objectives")]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub outline: Vec<String>,
    #[serde(default, alias = "concepts")]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    #[serde(default)]
    pub assessment: String,
    #[serde(default)]
    pub duration: String,
}

/// Provenance stamped onto a course by the reviewing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub generated_at: DateTime<Utc>,
    pub provider: String,
    pub material_sources: Vec<String>,
    pub thread_id: String,
}

// ---------------------------------------------------------------------------
// Workflow state
// ---------------------------------------------------------------------------

/// Fixed, linear sequence of workflow steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStep {
    Analyzing,
    Planning,
    Generating,
    Enhancing,
    Reviewing,
    Completed,
}

impl WorkflowStep {
    /// All steps in execution order.
    pub const SEQUENCE: [WorkflowStep; 6] = [
        WorkflowStep::Analyzing,
        WorkflowStep::Planning,
        WorkflowStep::Generating,
        WorkflowStep::Enhancing,
        WorkflowStep::Reviewing,
        WorkflowStep::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Enhancing => "enhancing",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
        }
    }

    /// Progress percentage reached when this step's handler finishes.
    pub fn progress_on_completion(&self) -> u8 {
        match self {
            Self::Analyzing => 20,
            Self::Planning => 40,
            Self::Generating => 60,
            Self::Enhancing => 80,
            Self::Reviewing | Self::Completed => 100,
        }
    }

    pub fn next(&self) -> Option<WorkflowStep> {
        match self {
            Self::Analyzing => Some(Self::Planning),
            Self::Planning => Some(Self::Generating),
            Self::Generating => Some(Self::Enhancing),
            Self::Enhancing => Some(Self::Reviewing),
            Self::Reviewing => Some(Self::Completed),
            Self::Completed => None,
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one generation run, keyed by `thread_id` in the registry.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowState {
    pub thread_id: String,
    pub current_step: WorkflowStep,
    pub progress: u8,
    pub parameters: GenerationParameters,
    pub relevant_materials: Vec<SearchResult>,
    pub planning_output: String,
    pub content_output: Option<Course>,
    pub enhancement_notes: String,
    /// Name of the provider that produced the plan or draft.
    pub provider_used: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(thread_id: impl Into<String>, parameters: GenerationParameters) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            current_step: WorkflowStep::Analyzing,
            progress: 0,
            parameters,
            relevant_materials: Vec::new(),
            planning_output: String::new(),
            content_output: None,
            enhancement_notes: String::new(),
            provider_used: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current_step == WorkflowStep::Completed
    }
}

/// One element of a streaming workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub thread_id: String,
    /// The step this event reports on (the last reached step for errors).
    pub step: WorkflowStep,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Set only on the terminal error event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.step == WorkflowStep::Completed
    }
}
