//! Course-generation workflow engine.
//!
//! A linear state machine per thread:
//!
//! ```text
//! analyzing(20) → planning(40) → generating(60) → enhancing(80) → reviewing(100) → completed
//! ```
//!
//! Live state is kept in the shared [`ThreadRegistry`]; each stage reads a
//! snapshot, does its remote work without holding any lock, then commits its
//! output in one registry update. Every thread owns a
//! [`CancellationToken`]: it is checked before each stage and raced against
//! every remote call, so [`WorkflowEngine::cancel`] abandons an in-flight
//! provider request instead of waiting for it.
//!
//! Failed, cancelled and abandoned workflows are removed from the registry.
//! A workflow is abandoned when its `run` future or event stream is dropped
//! before reaching a terminal state. Completed ones stay visible to
//! [`WorkflowEngine::status`] until the retention window expires and
//! [`WorkflowEngine::sweep`] evicts them.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use coursewright_core::course::{ensure_complete, parse_course_text};
use coursewright_core::extract::parse_json;
use coursewright_core::generation::{
    corrective_prompt, Completion, FallbackPolicy, ProviderChain, SYNTHESIZED_PROVIDER,
};
use coursewright_core::index::DocumentIndex;
use coursewright_core::models::{
    Course, GenerationMetadata, GenerationParameters, ProgressEvent, SearchOptions, SearchResult,
    WorkflowState, WorkflowStep,
};
use coursewright_core::registry::ThreadRegistry;
use coursewright_core::search::merge_materials;
use coursewright_core::store::memory::InMemoryDocumentStore;
use coursewright_core::store::DocumentStore;
use coursewright_core::{Error, Result};

use crate::config::WorkflowConfig;
use crate::prompts::{enhancement_prompt, fallback_plan, generation_prompt, planning_prompt};

/// Engine tuning, usually built from `[workflow]`.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub fallback_policy: FallbackPolicy,
    pub max_materials: usize,
    pub query_limit: usize,
    pub plan_materials: usize,
    pub excerpt_chars: usize,
    pub retention: Duration,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self::from(&WorkflowConfig::default())
    }
}

impl From<&WorkflowConfig> for WorkflowSettings {
    fn from(c: &WorkflowConfig) -> Self {
        Self {
            fallback_policy: c.fallback_policy,
            max_materials: c.max_materials,
            query_limit: c.query_limit,
            plan_materials: c.plan_materials,
            excerpt_chars: c.excerpt_chars,
            retention: c.retention(),
        }
    }
}

/// Structured reply expected from the enhancing stage.
#[derive(Debug, Deserialize)]
struct Enhancement {
    #[serde(default)]
    enhancement_notes: String,
    #[serde(default)]
    goal: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    references: Vec<String>,
}

/// Outcome of one stage handler.
struct StageReport {
    step: WorkflowStep,
    progress: u8,
    message: String,
    payload: Option<Value>,
    /// Set by the reviewing stage only.
    course: Option<Course>,
}

impl StageReport {
    fn into_event(self, thread_id: &str) -> ProgressEvent {
        ProgressEvent {
            thread_id: thread_id.to_string(),
            step: self.step,
            progress: self.progress,
            message: self.message,
            payload: self.payload,
            error: None,
        }
    }
}

pub struct WorkflowEngine<S = InMemoryDocumentStore> {
    index: Arc<DocumentIndex<S>>,
    chain: ProviderChain,
    registry: Arc<ThreadRegistry>,
    tokens: Mutex<HashMap<String, CancellationToken>>,
    settings: WorkflowSettings,
}

impl<S: DocumentStore + 'static> WorkflowEngine<S> {
    pub fn new(
        index: Arc<DocumentIndex<S>>,
        chain: ProviderChain,
        registry: Arc<ThreadRegistry>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            index,
            chain,
            registry,
            tokens: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn index(&self) -> &Arc<DocumentIndex<S>> {
        &self.index
    }

    pub fn registry(&self) -> &Arc<ThreadRegistry> {
        &self.registry
    }

    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// Run every stage to completion and return the final course.
    #[instrument(skip(self, params), fields(title = %params.title))]
    pub async fn run(
        &self,
        params: GenerationParameters,
        thread_id: Option<String>,
    ) -> Result<Course> {
        let (thread_id, token) = self.start(params, thread_id)?;
        let mut guard = self.abandon_guard(&thread_id);
        loop {
            match self.advance(&thread_id, &token).await {
                Ok(report) => {
                    if let Some(course) = report.course {
                        guard.disarm();
                        self.release(&thread_id);
                        info!(thread_id = %thread_id, topics = course.topics.len(), "course generated");
                        return Ok(course);
                    }
                }
                Err(e) => {
                    guard.disarm();
                    self.fail(&thread_id, &e);
                    return Err(e);
                }
            }
        }
    }

    /// Run the workflow lazily, yielding one event per stage.
    ///
    /// The stream ends after a `completed` event carrying the final course,
    /// or after a single event with `error` set. It starts work only when
    /// polled and cannot be restarted.
    pub fn stream(
        self: &Arc<Self>,
        params: GenerationParameters,
        thread_id: Option<String>,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let engine = Arc::clone(self);
        stream! {
            let requested = thread_id.clone().unwrap_or_default();
            let (thread_id, token) = match engine.start(params, thread_id) {
                Ok(started) => started,
                Err(e) => {
                    yield error_event(&requested, WorkflowStep::Analyzing, 0, &e);
                    return;
                }
            };

            let mut guard = engine.abandon_guard(&thread_id);
            let mut last = (WorkflowStep::Analyzing, 0u8);
            loop {
                match engine.advance(&thread_id, &token).await {
                    Ok(mut report) => {
                        last = (report.step, report.progress);
                        let course = report.course.take();
                        if course.is_some() {
                            // Completed state is kept even if the last event is never read.
                            guard.disarm();
                        }
                        yield report.into_event(&thread_id);

                        if let Some(course) = course {
                            engine.release(&thread_id);
                            yield ProgressEvent {
                                thread_id: thread_id.clone(),
                                step: WorkflowStep::Completed,
                                progress: 100,
                                message: "course generation completed".to_string(),
                                payload: Some(json!({ "course": course })),
                                error: None,
                            };
                            break;
                        }
                    }
                    Err(e) => {
                        guard.disarm();
                        engine.fail(&thread_id, &e);
                        yield error_event(&thread_id, last.0, last.1, &e);
                        break;
                    }
                }
            }
        }
    }

    /// Cancel a workflow. Returns `false` if the thread was not live.
    pub fn cancel(&self, thread_id: &str) -> Result<bool> {
        let removed = self.registry.remove(thread_id)?.is_some();
        if let Some(token) = self.tokens()?.remove(thread_id) {
            token.cancel();
        }
        if removed {
            info!(thread_id, "workflow cancelled");
        }
        Ok(removed)
    }

    pub fn status(&self, thread_id: &str) -> Result<WorkflowState> {
        self.registry
            .get(thread_id)?
            .ok_or_else(|| Error::not_found(format!("thread {thread_id}")))
    }

    /// Ids of every live or retained workflow.
    pub fn list(&self) -> Result<Vec<String>> {
        self.registry.ids()
    }

    /// Evict completed workflows older than the retention window.
    pub fn sweep(&self) -> Result<Vec<String>> {
        let evicted = self.registry.evict_completed(self.settings.retention)?;
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted completed workflows");
        }
        Ok(evicted)
    }

    /// Sweep on a fixed interval until the runtime shuts down.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.sweep() {
                    warn!(error = %e, "workflow sweep failed");
                }
            }
        })
    }

    // ============ Lifecycle ============

    fn start(
        &self,
        params: GenerationParameters,
        thread_id: Option<String>,
    ) -> Result<(String, CancellationToken)> {
        params.validate()?;
        if let Err(e) = self.sweep() {
            warn!(error = %e, "workflow sweep failed");
        }

        let thread_id = thread_id
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.registry
            .insert(WorkflowState::new(thread_id.clone(), params))?;

        let token = CancellationToken::new();
        self.tokens()?.insert(thread_id.clone(), token.clone());
        info!(thread_id = %thread_id, "workflow started");
        Ok((thread_id, token))
    }

    /// Drop the thread's token once it can no longer be cancelled mid-run.
    fn release(&self, thread_id: &str) {
        if let Ok(mut tokens) = self.tokens() {
            tokens.remove(thread_id);
        }
    }

    fn fail(&self, thread_id: &str, err: &Error) {
        self.release(thread_id);
        if let Err(e) = self.registry.remove(thread_id) {
            warn!(thread_id, error = %e, "failed to remove workflow state");
        }
        match err {
            Error::Cancelled(_) => info!(thread_id, "workflow stopped after cancellation"),
            other => warn!(thread_id, error = %other, "workflow failed"),
        }
    }

    fn abandon_guard(&self, thread_id: &str) -> AbandonGuard<'_> {
        AbandonGuard {
            registry: &self.registry,
            tokens: &self.tokens,
            thread_id: thread_id.to_string(),
            armed: true,
        }
    }

    fn tokens(&self) -> Result<MutexGuard<'_, HashMap<String, CancellationToken>>> {
        self.tokens
            .lock()
            .map_err(|_| Error::Store("cancellation token map poisoned".into()))
    }

    /// Apply a stage's output, unless the thread was cancelled meanwhile.
    fn commit<F>(&self, thread_id: &str, token: &CancellationToken, f: F) -> Result<WorkflowState>
    where
        F: FnOnce(&mut WorkflowState),
    {
        if token.is_cancelled() {
            return Err(Error::Cancelled(thread_id.to_string()));
        }
        self.registry.update(thread_id, f).map_err(|e| match e {
            Error::NotFound(_) => Error::Cancelled(thread_id.to_string()),
            other => other,
        })
    }

    // ============ Stages ============

    async fn advance(&self, thread_id: &str, token: &CancellationToken) -> Result<StageReport> {
        if token.is_cancelled() {
            return Err(Error::Cancelled(thread_id.to_string()));
        }
        let state = self
            .registry
            .get(thread_id)?
            .ok_or_else(|| Error::Cancelled(thread_id.to_string()))?;

        debug!(thread_id, step = %state.current_step, "running stage");
        match state.current_step {
            WorkflowStep::Analyzing => self.analyze(&state, token).await,
            WorkflowStep::Planning => self.plan(&state, token).await,
            WorkflowStep::Generating => self.generate(&state, token).await,
            WorkflowStep::Enhancing => self.enhance(&state, token).await,
            WorkflowStep::Reviewing => self.review(&state, token),
            WorkflowStep::Completed => Err(Error::validation(format!(
                "thread {thread_id} is already completed"
            ))),
        }
    }

    async fn analyze(&self, state: &WorkflowState, token: &CancellationToken) -> Result<StageReport> {
        let id = state.thread_id.as_str();
        let options = SearchOptions::default();
        let mut batches = Vec::new();

        for query in retrieval_queries(&state.parameters) {
            let search = self.index.search(&query, self.settings.query_limit, &options);
            match guarded(id, token, search).await {
                Ok(results) => batches.push(results),
                Err(e @ Error::Cancelled(_)) => return Err(e),
                Err(e) => warn!(thread_id = id, query = %query, error = %e, "retrieval query failed, skipping"),
            }
        }

        let materials = merge_materials(batches, self.settings.max_materials);
        let count = materials.len();
        let sources = material_sources(&materials);

        let step = WorkflowStep::Analyzing;
        self.commit(id, token, |s| {
            s.relevant_materials = materials;
            s.current_step = WorkflowStep::Planning;
            s.progress = step.progress_on_completion();
        })?;

        Ok(StageReport {
            step,
            progress: step.progress_on_completion(),
            message: format!("retrieved {count} relevant materials"),
            payload: Some(json!({ "materials": count, "sources": sources })),
            course: None,
        })
    }

    async fn plan(&self, state: &WorkflowState, token: &CancellationToken) -> Result<StageReport> {
        let id = state.thread_id.as_str();
        let params = &state.parameters;
        let top = &state.relevant_materials
            [..state.relevant_materials.len().min(self.settings.plan_materials)];
        let prompt = planning_prompt(params, top, self.settings.excerpt_chars);

        let result = guarded(id, token, self.chain.complete_text(&prompt)).await;
        let plan = self
            .settings
            .fallback_policy
            .resolve(result, || fallback_plan(params))?;

        let step = WorkflowStep::Planning;
        self.commit(id, token, |s| {
            s.planning_output = plan.value.clone();
            s.provider_used = Some(plan.provider.clone());
            s.current_step = WorkflowStep::Generating;
            s.progress = step.progress_on_completion();
        })?;

        Ok(StageReport {
            step,
            progress: step.progress_on_completion(),
            message: format!("course plan drafted by {}", plan.provider),
            payload: Some(json!({ "plan": plan.value, "provider": plan.provider })),
            course: None,
        })
    }

    async fn generate(&self, state: &WorkflowState, token: &CancellationToken) -> Result<StageReport> {
        let id = state.thread_id.as_str();
        let params = &state.parameters;
        let prompt = generation_prompt(params, &state.planning_output);

        let Completion {
            value: mut course,
            provider,
        } = self
            .draft_course(id, token, params, &prompt, &state.planning_output)
            .await?;
        ensure_complete(&mut course, params);

        let step = WorkflowStep::Generating;
        let draft = course.clone();
        let used = provider.clone();
        self.commit(id, token, |s| {
            s.content_output = Some(draft);
            s.provider_used = Some(used);
            s.current_step = WorkflowStep::Enhancing;
            s.progress = step.progress_on_completion();
        })?;

        Ok(StageReport {
            step,
            progress: step.progress_on_completion(),
            message: format!("drafted {} topics with {provider}", course.topics.len()),
            payload: Some(json!({ "course": course })),
            course: None,
        })
    }

    /// JSON first, one corrective retry on the same provider, then heading
    /// parsing of the prose.
    async fn draft_course(
        &self,
        id: &str,
        token: &CancellationToken,
        params: &GenerationParameters,
        prompt: &str,
        plan: &str,
    ) -> Result<Completion<Course>> {
        let first = match guarded(id, token, self.chain.complete_text(prompt)).await {
            Ok(c) => c,
            Err(e) => {
                return self
                    .settings
                    .fallback_policy
                    .resolve(Err(e), || parse_course_text(plan, &params.title))
            }
        };

        let problem = match parse_json::<Course>(&first.provider, &first.value) {
            Ok(course) => {
                return Ok(Completion {
                    value: course,
                    provider: first.provider,
                })
            }
            Err(e) => e.to_string(),
        };
        debug!(thread_id = id, provider = %first.provider, error = %problem, "draft was not JSON, retrying with correction");

        let retry_prompt = corrective_prompt(prompt, &problem);
        let retry = self.chain.complete_on(&first.provider, &retry_prompt);
        let (text, provider) = match guarded(id, token, retry).await {
            Ok(retry) => match parse_json::<Course>(&retry.provider, &retry.value) {
                Ok(course) => {
                    return Ok(Completion {
                        value: course,
                        provider: retry.provider,
                    })
                }
                Err(_) => (retry.value, retry.provider),
            },
            Err(e @ Error::Cancelled(_)) => return Err(e),
            Err(e) => {
                warn!(thread_id = id, error = %e, "corrective retry failed");
                (first.value, first.provider)
            }
        };

        warn!(thread_id = id, provider = %provider, "no JSON after correction, parsing headings");
        Ok(Completion {
            value: parse_course_text(&text, &params.title),
            provider,
        })
    }

    async fn enhance(&self, state: &WorkflowState, token: &CancellationToken) -> Result<StageReport> {
        let id = state.thread_id.as_str();
        let mut course = state
            .content_output
            .clone()
            .ok_or_else(|| Error::validation(format!("thread {id} has no draft to enhance")))?;
        let prompt = enhancement_prompt(&state.parameters, &course);

        let notes = match guarded(id, token, self.chain.complete_json::<Enhancement>(&prompt)).await {
            Ok(enhancement) => {
                apply_enhancement(&mut course, &enhancement.value);
                enhancement.value.enhancement_notes
            }
            Err(e @ Error::Cancelled(_)) => return Err(e),
            Err(e) => {
                warn!(thread_id = id, error = %e, "enhancement failed, keeping draft");
                String::new()
            }
        };
        let enhanced = !notes.is_empty();

        let step = WorkflowStep::Enhancing;
        let notes_out = notes.clone();
        self.commit(id, token, |s| {
            s.content_output = Some(course);
            s.enhancement_notes = notes;
            s.current_step = WorkflowStep::Reviewing;
            s.progress = step.progress_on_completion();
        })?;

        Ok(StageReport {
            step,
            progress: step.progress_on_completion(),
            message: if enhanced {
                "course enhanced".to_string()
            } else {
                "enhancement skipped".to_string()
            },
            payload: Some(json!({ "enhancement_notes": notes_out })),
            course: None,
        })
    }

    fn review(&self, state: &WorkflowState, token: &CancellationToken) -> Result<StageReport> {
        let id = state.thread_id.as_str();
        let mut course = state
            .content_output
            .clone()
            .ok_or_else(|| Error::validation(format!("thread {id} has no draft to review")))?;

        course.generation = Some(GenerationMetadata {
            generated_at: Utc::now(),
            provider: state
                .provider_used
                .clone()
                .unwrap_or_else(|| SYNTHESIZED_PROVIDER.to_string()),
            material_sources: material_sources(&state.relevant_materials),
            thread_id: id.to_string(),
        });
        ensure_complete(&mut course, &state.parameters);

        let step = WorkflowStep::Reviewing;
        let final_course = course.clone();
        self.commit(id, token, |s| {
            s.content_output = Some(final_course);
            s.current_step = WorkflowStep::Completed;
            s.progress = step.progress_on_completion();
            s.completed_at = Some(Utc::now());
        })?;

        Ok(StageReport {
            step,
            progress: step.progress_on_completion(),
            message: format!("reviewed course with {} topics", course.topics.len()),
            payload: Some(json!({ "topics": course.topics.len() })),
            course: Some(course),
        })
    }
}

/// Forgets a thread whose `run` future or event stream was dropped before
/// it reached a terminal state, such as when an HTTP client disconnects.
struct AbandonGuard<'a> {
    registry: &'a ThreadRegistry,
    tokens: &'a Mutex<HashMap<String, CancellationToken>>,
    thread_id: String,
    armed: bool,
}

impl AbandonGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Ok(mut tokens) = self.tokens.lock() {
            if let Some(token) = tokens.remove(&self.thread_id) {
                token.cancel();
            }
        }
        match self.registry.remove(&self.thread_id) {
            Ok(Some(_)) => info!(thread_id = %self.thread_id, "workflow abandoned by its caller"),
            Ok(None) => {}
            Err(e) => warn!(thread_id = %self.thread_id, error = %e, "failed to remove abandoned workflow"),
        }
    }
}

/// Race a remote call against the thread's cancellation token.
async fn guarded<T>(
    thread_id: &str,
    token: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled(thread_id.to_string())),
        result = fut => result,
    }
}

/// Retrieval queries for the analyzing stage, without duplicates.
pub fn retrieval_queries(params: &GenerationParameters) -> Vec<String> {
    let mut queries = vec![
        params.title.clone(),
        format!("{} {}", params.title, params.target_audience),
        format!("{} {}", params.teaching_style, params.title),
    ];
    queries.extend(params.compulsory_areas.iter().cloned());

    let mut unique: Vec<String> = Vec::with_capacity(queries.len());
    for q in queries {
        let q = q.trim().to_string();
        if !q.is_empty() && !unique.contains(&q) {
            unique.push(q);
        }
    }
    unique
}

/// Distinct material sources in rank order, falling back to document ids.
pub fn material_sources(materials: &[SearchResult]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for m in materials {
        let source = m.source().unwrap_or(m.id.as_str()).to_string();
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

fn apply_enhancement(course: &mut Course, e: &Enhancement) {
    if let Some(goal) = e.goal.as_deref().map(str::trim).filter(|g| !g.is_empty()) {
        course.goal = goal.to_string();
    }
    if let Some(method) = e.method.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        course.method = method.to_string();
    }
    for r in &e.references {
        let r = r.trim();
        if !r.is_empty() && !course.references.iter().any(|existing| existing == r) {
            course.references.push(r.to_string());
        }
    }
}

fn error_event(thread_id: &str, step: WorkflowStep, progress: u8, err: &Error) -> ProgressEvent {
    ProgressEvent {
        thread_id: thread_id.to_string(),
        step,
        progress,
        message: "course generation failed".to_string(),
        payload: None,
        error: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursewright_core::models::{Metadata, SearchMode};

    fn params(areas: &[&str]) -> GenerationParameters {
        GenerationParameters {
            title: "Ethics".into(),
            target_audience: "engineers".into(),
            teaching_style: "socratic".into(),
            learning_objective: "reason about trade-offs".into(),
            compulsory_areas: areas.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn queries_cover_title_audience_style_and_areas() {
        let q = retrieval_queries(&params(&["privacy", "Ethics"]));
        assert_eq!(
            q,
            vec!["Ethics", "Ethics engineers", "socratic Ethics", "privacy"]
        );
    }

    #[test]
    fn enhancement_overrides_only_non_blank_fields() {
        let mut course = Course {
            title: "T".into(),
            goal: "old goal".into(),
            method: "old method".into(),
            topics: vec![],
            references: vec!["A".into()],
            generation: None,
        };
        let e = Enhancement {
            enhancement_notes: "n".into(),
            goal: Some("  ".into()),
            method: Some("flipped classroom".into()),
            references: vec!["A".into(), "B".into()],
        };
        apply_enhancement(&mut course, &e);
        assert_eq!(course.goal, "old goal");
        assert_eq!(course.method, "flipped classroom");
        assert_eq!(course.references, vec!["A", "B"]);
    }

    #[test]
    fn sources_fall_back_to_ids() {
        let mut with_source = Metadata::new();
        with_source.insert("source".into(), json!("a.md"));
        let r = |id: &str, metadata: Metadata| SearchResult {
            id: id.into(),
            content: String::new(),
            metadata,
            score: 0.0,
            mode: SearchMode::Keyword,
        };
        let materials = vec![
            r("a.md#0", with_source.clone()),
            r("a.md#1", with_source),
            r("loose", Metadata::new()),
        ];
        assert_eq!(material_sources(&materials), vec!["a.md", "loose"]);
    }
}
