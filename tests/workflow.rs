use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;

use coursewright::workflow::{WorkflowEngine, WorkflowSettings};
use coursewright_core::generation::{
    FallbackPolicy, GenerationProvider, ProviderChain, SYNTHESIZED_PROVIDER,
};
use coursewright_core::index::DocumentIndex;
use coursewright_core::models::{GenerationParameters, Metadata, NewDocument, WorkflowStep};
use coursewright_core::registry::ThreadRegistry;
use coursewright_core::{Error, Result};

/// Which stage a prompt belongs to, judged by its wording.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Planning,
    Generating,
    Correcting,
    Enhancing,
}

fn stage_of(prompt: &str) -> Stage {
    if prompt.contains("could not be used") {
        Stage::Correcting
    } else if prompt.contains("course planning expert") {
        Stage::Planning
    } else if prompt.contains("course content developer") {
        Stage::Generating
    } else {
        Stage::Enhancing
    }
}

type Reply = Box<dyn Fn(Stage) -> Result<String> + Send + Sync>;

struct Routed {
    name: String,
    reply: Reply,
    calls: AtomicUsize,
    corrections: AtomicUsize,
    delay: Option<Duration>,
}

impl Routed {
    fn new(name: &str, reply: impl Fn(Stage) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            corrections: AtomicUsize::new(0),
            delay: None,
        })
    }

    fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            reply: Box::new(|_| Ok("late".into())),
            calls: AtomicUsize::new(0),
            corrections: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }
}

#[async_trait]
impl GenerationProvider for Routed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let stage = stage_of(prompt);
        if stage == Stage::Correcting {
            self.corrections.fetch_add(1, Ordering::SeqCst);
        }
        (self.reply)(stage)
    }
}

fn course_json() -> String {
    json!({
        "title": "Sustainable Business",
        "goal": "Prepare managers for the 21st century",
        "method": "case studies",
        "topics": [
            {"title": "Circular Economy", "objectives": ["Explain material loops"]},
            {"title": "ESG Reporting", "key_concepts": ["materiality"]}
        ],
        "references": ["Raworth, Doughnut Economics"]
    })
    .to_string()
}

fn happy(stage: Stage) -> Result<String> {
    Ok(match stage {
        Stage::Planning => "1. Circular Economy\n2. ESG Reporting".to_string(),
        Stage::Generating | Stage::Correcting => format!("Here you go:\n{}", course_json()),
        Stage::Enhancing => json!({
            "enhancement_notes": "add a field trip",
            "references": ["Porter, Shared Value"]
        })
        .to_string(),
    })
}

fn params(title: &str) -> GenerationParameters {
    GenerationParameters {
        title: title.into(),
        target_audience: "master students".into(),
        teaching_style: "case-based".into(),
        learning_objective: "manage sustainably".into(),
        compulsory_areas: vec!["ESG".into()],
    }
}

async fn indexed() -> Arc<DocumentIndex> {
    let index = DocumentIndex::in_memory(None);
    let mut meta = Metadata::new();
    meta.insert("source".into(), json!("esg.md"));
    meta.insert("chunk_index".into(), json!(0));
    index
        .batch_index(vec![
            NewDocument {
                id: "esg.md#0".into(),
                content: "ESG reporting for sustainable business requires materiality analysis."
                    .into(),
                metadata: meta,
            },
            NewDocument {
                id: "misc".into(),
                content: "Unrelated notes on medieval poetry.".into(),
                metadata: Metadata::new(),
            },
        ])
        .await;
    Arc::new(index)
}

fn engine_with(
    index: Arc<DocumentIndex>,
    providers: Vec<Arc<Routed>>,
    settings: WorkflowSettings,
) -> Arc<WorkflowEngine> {
    let chain = ProviderChain::new(
        providers
            .into_iter()
            .map(|p| p as Arc<dyn GenerationProvider>)
            .collect(),
    );
    Arc::new(WorkflowEngine::new(
        index,
        chain,
        Arc::new(ThreadRegistry::new()),
        settings,
    ))
}

#[tokio::test]
async fn run_produces_structured_course() {
    let provider = Routed::new("mock", happy);
    let engine = engine_with(indexed().await, vec![provider.clone()], WorkflowSettings::default());

    let course = engine
        .run(params("Sustainable Business"), Some("t-1".into()))
        .await
        .unwrap();

    assert_eq!(course.topics.len(), 2);
    assert_eq!(course.topics[0].title, "Circular Economy");
    assert!(course.references.contains(&"Porter, Shared Value".to_string()));

    let meta = course.generation.as_ref().unwrap();
    assert_eq!(meta.provider, "mock");
    assert_eq!(meta.thread_id, "t-1");
    assert_eq!(meta.material_sources, vec!["esg.md"]);

    let state = engine.status("t-1").unwrap();
    assert_eq!(state.current_step, WorkflowStep::Completed);
    assert_eq!(state.progress, 100);
    assert_eq!(state.enhancement_notes, "add a field trip");
    assert!(state.completed_at.is_some());
    // plan, draft, enhancement
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn stream_reports_every_stage_in_order() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::new("mock", happy)],
        WorkflowSettings::default(),
    );

    let events: Vec<_> = engine
        .stream(params("Sustainable Business"), None)
        .collect()
        .await;

    let steps: Vec<_> = events.iter().map(|e| e.step).collect();
    assert_eq!(steps, WorkflowStep::SEQUENCE.to_vec());
    let progress: Vec<_> = events.iter().map(|e| e.progress).collect();
    assert_eq!(progress, vec![20, 40, 60, 80, 100, 100]);
    assert!(events.iter().all(|e| !e.is_error()));

    let last = events.last().unwrap();
    assert!(last.is_terminal());
    let course = &last.payload.as_ref().unwrap()["course"];
    assert_eq!(course["topics"].as_array().unwrap().len(), 2);

    let thread_id = &events[0].thread_id;
    assert!(!thread_id.is_empty());
    assert!(events.iter().all(|e| &e.thread_id == thread_id));
}

#[tokio::test]
async fn prose_draft_gets_one_correction_then_heading_parsing() {
    let prose = "## Module 1: Foundations\nObjectives: Define sustainability\n\n\
                 ## Module 2: Practice\nObjectives: Apply frameworks";
    let provider = Routed::new("mock", move |stage| match stage {
        Stage::Generating | Stage::Correcting => Ok(prose.to_string()),
        other => happy(other),
    });
    let engine = engine_with(indexed().await, vec![provider.clone()], WorkflowSettings::default());

    let course = engine.run(params("Sustainable Business"), None).await.unwrap();

    assert_eq!(provider.corrections.load(Ordering::SeqCst), 1);
    let titles: Vec<_> = course.topics.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Foundations", "Practice"]);
    assert_eq!(course.goal, "manage sustainably");
}

#[tokio::test]
async fn corrected_reply_is_used_when_it_parses() {
    let provider = Routed::new("mock", |stage| match stage {
        Stage::Generating => Ok("I cannot produce JSON today.".into()),
        other => happy(other),
    });
    let engine = engine_with(indexed().await, vec![provider.clone()], WorkflowSettings::default());

    let course = engine.run(params("Sustainable Business"), None).await.unwrap();
    assert_eq!(provider.corrections.load(Ordering::SeqCst), 1);
    assert_eq!(course.topics[1].title, "ESG Reporting");
}

#[tokio::test]
async fn unstructured_prose_still_yields_a_topic() {
    let provider = Routed::new("mock", |stage| match stage {
        Stage::Generating | Stage::Correcting => {
            Ok("Sustainability matters to every manager and deserves discussion.".into())
        }
        other => happy(other),
    });
    let engine = engine_with(indexed().await, vec![provider.clone()], WorkflowSettings::default());

    let course = engine
        .run(params("Sustainable Business"), Some("prose".into()))
        .await
        .unwrap();

    assert_eq!(provider.corrections.load(Ordering::SeqCst), 1);
    assert_eq!(course.title, "Sustainable Business");
    assert_eq!(course.topics.len(), 1);
    assert_eq!(course.topics[0].title, "Introduction to Sustainable Business");
    assert!(!course.topics[0].objectives.is_empty());
    assert_eq!(
        engine.status("prose").unwrap().current_step,
        WorkflowStep::Completed
    );
}

#[tokio::test]
async fn correction_goes_back_to_the_drafting_provider() {
    let prose = "## Module 1: Foundations\nObjectives: Define sustainability";
    let primary = Routed::new("primary", move |stage| match stage {
        Stage::Generating => Ok(prose.to_string()),
        Stage::Correcting => Err(Error::transport("primary", "connection reset")),
        other => happy(other),
    });
    let backup = Routed::new("backup", happy);
    let engine = engine_with(
        indexed().await,
        vec![primary.clone(), backup.clone()],
        WorkflowSettings::default(),
    );

    let course = engine.run(params("Sustainable Business"), None).await.unwrap();

    assert_eq!(primary.corrections.load(Ordering::SeqCst), 1);
    assert_eq!(backup.calls.load(Ordering::SeqCst), 0);
    let titles: Vec<_> = course.topics.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Foundations"]);
    assert_eq!(course.generation.unwrap().provider, "primary");
}

#[tokio::test]
async fn falls_back_to_next_provider() {
    let down = Routed::new("down", |_| Err(Error::transport("down", "connection refused")));
    let up = Routed::new("up", happy);
    let engine = engine_with(indexed().await, vec![down, up], WorkflowSettings::default());

    let course = engine.run(params("Sustainable Business"), None).await.unwrap();
    assert_eq!(course.generation.unwrap().provider, "up");
}

#[tokio::test]
async fn fail_fast_surfaces_exhaustion_and_forgets_thread() {
    let engine = engine_with(indexed().await, vec![], WorkflowSettings::default());

    let err = engine
        .run(params("Sustainable Business"), Some("gone".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Exhausted { .. }));
    assert!(matches!(engine.status("gone"), Err(Error::NotFound(_))));
    assert!(engine.list().unwrap().is_empty());
}

#[tokio::test]
async fn synthesize_policy_completes_without_providers() {
    let settings = WorkflowSettings {
        fallback_policy: FallbackPolicy::Synthesize,
        ..WorkflowSettings::default()
    };
    let engine = engine_with(indexed().await, vec![], settings);

    let course = engine.run(params("Sustainable Business"), None).await.unwrap();
    assert_eq!(course.generation.as_ref().unwrap().provider, SYNTHESIZED_PROVIDER);
    let titles: Vec<_> = course.topics.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["Introduction to Sustainable Business", "ESG"]);
}

#[tokio::test]
async fn enhancement_failure_keeps_the_draft() {
    let provider = Routed::new("mock", |stage| match stage {
        Stage::Enhancing => Err(Error::transport("mock", "503")),
        other => happy(other),
    });
    let engine = engine_with(indexed().await, vec![provider], WorkflowSettings::default());

    let course = engine
        .run(params("Sustainable Business"), Some("t".into()))
        .await
        .unwrap();
    assert_eq!(course.topics.len(), 2);
    assert_eq!(course.references, vec!["Raworth, Doughnut Economics"]);
    assert!(engine.status("t").unwrap().enhancement_notes.is_empty());
}

#[tokio::test]
async fn invalid_parameters_fail_before_any_stage() {
    let provider = Routed::new("mock", happy);
    let engine = engine_with(indexed().await, vec![provider.clone()], WorkflowSettings::default());

    let err = engine.run(params("  "), None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let events: Vec<_> = engine.stream(params(""), None).collect().await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_error());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_interrupts_in_flight_call() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::slow("slow", Duration::from_secs(30))],
        WorkflowSettings::default(),
    );

    let runner = Arc::clone(&engine);
    let handle = tokio::spawn(async move {
        runner
            .run(params("Sustainable Business"), Some("c-1".into()))
            .await
    });

    // Wait until the planning call is in flight.
    for _ in 0..200 {
        if matches!(engine.status("c-1"), Ok(s) if s.current_step == WorkflowStep::Planning) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(engine.cancel("c-1").unwrap());
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancelled run should return promptly")
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled(_))));

    assert!(matches!(engine.status("c-1"), Err(Error::NotFound(_))));
    assert!(!engine.cancel("c-1").unwrap());
}

#[tokio::test]
async fn duplicate_live_thread_is_rejected() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::slow("slow", Duration::from_secs(30))],
        WorkflowSettings::default(),
    );

    let runner = Arc::clone(&engine);
    let handle = tokio::spawn(async move { runner.run(params("Sustainable Business"), Some("dup".into())).await });

    for _ in 0..200 {
        if engine.status("dup").is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = engine
        .run(params("Sustainable Business"), Some("dup".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    engine.cancel("dup").unwrap();
    let _ = handle.await;
}

#[tokio::test]
async fn sweep_evicts_completed_threads_after_retention() {
    let settings = WorkflowSettings {
        retention: Duration::ZERO,
        ..WorkflowSettings::default()
    };
    let engine = engine_with(indexed().await, vec![Routed::new("mock", happy)], settings);

    engine
        .run(params("Sustainable Business"), Some("old".into()))
        .await
        .unwrap();
    assert_eq!(engine.list().unwrap(), vec!["old"]);

    assert_eq!(engine.sweep().unwrap(), vec!["old"]);
    assert!(matches!(engine.status("old"), Err(Error::NotFound(_))));
}

#[tokio::test]
async fn status_of_unknown_thread_is_not_found() {
    let engine = engine_with(indexed().await, vec![], WorkflowSettings::default());
    assert!(matches!(engine.status("nope"), Err(Error::NotFound(_))));
    assert!(!engine.cancel("nope").unwrap());
}

#[tokio::test]
async fn dropped_stream_forgets_its_thread() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::new("mock", happy)],
        WorkflowSettings::default(),
    );

    let mut events = Box::pin(engine.stream(params("Sustainable Business"), Some("drop-1".into())));
    let first = events.next().await.unwrap();
    assert_eq!(first.step, WorkflowStep::Analyzing);
    assert_eq!(engine.status("drop-1").unwrap().current_step, WorkflowStep::Planning);

    drop(events);
    assert!(engine.list().unwrap().is_empty());
    assert!(matches!(engine.status("drop-1"), Err(Error::NotFound(_))));

    // The id is free again.
    let course = engine
        .run(params("Sustainable Business"), Some("drop-1".into()))
        .await
        .unwrap();
    assert_eq!(course.topics.len(), 2);
}

#[tokio::test]
async fn dropped_run_forgets_its_thread() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::slow("slow", Duration::from_secs(30))],
        WorkflowSettings::default(),
    );

    let timed_out = tokio::time::timeout(
        Duration::from_millis(100),
        engine.run(params("Sustainable Business"), Some("drop-2".into())),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(engine.list().unwrap().is_empty());
}

#[tokio::test]
async fn stream_dropped_after_review_keeps_completed_thread() {
    let engine = engine_with(
        indexed().await,
        vec![Routed::new("mock", happy)],
        WorkflowSettings::default(),
    );

    let mut events = Box::pin(engine.stream(params("Sustainable Business"), Some("kept".into())));
    while let Some(event) = events.next().await {
        if event.step == WorkflowStep::Reviewing {
            break;
        }
    }
    drop(events);

    let state = engine.status("kept").unwrap();
    assert_eq!(state.current_step, WorkflowStep::Completed);
}
