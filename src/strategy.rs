//! Strategy-proposal synthesis over the document index.
//!
//! One retrieval pass followed by a single structured completion. With the
//! default `synthesize` policy the pipeline never fails because providers
//! are down: a deterministic proposal is assembled from the parameters
//! instead.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use coursewright_core::generation::{FallbackPolicy, ProviderChain};
use coursewright_core::index::DocumentIndex;
use coursewright_core::models::{SearchOptions, SearchResult};
use coursewright_core::search::merge_materials;
use coursewright_core::store::memory::InMemoryDocumentStore;
use coursewright_core::store::DocumentStore;
use coursewright_core::{Error, Result};

use crate::config::StrategyConfig;
use crate::prompts::format_materials;
use crate::workflow::material_sources;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    pub proposal_title: String,
    pub target_company: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub company_status_notes: String,
    #[serde(default)]
    pub project_type: String,
    #[serde(default)]
    pub focus_areas: Vec<String>,
}

impl StrategyParameters {
    pub fn validate(&self) -> Result<()> {
        if self.proposal_title.trim().is_empty() {
            return Err(Error::validation("proposal_title must not be empty"));
        }
        if self.target_company.trim().is_empty() {
            return Err(Error::validation("target_company must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub title: String,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub initiatives: Vec<Initiative>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Initiative {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub kpis: Vec<String>,
}

/// Finished proposal plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyOutcome {
    pub strategy: Strategy,
    pub provider: String,
    pub material_sources: Vec<String>,
}

pub struct StrategySynthesizer<S = InMemoryDocumentStore> {
    index: Arc<DocumentIndex<S>>,
    chain: ProviderChain,
    config: StrategyConfig,
}

impl<S: DocumentStore + 'static> StrategySynthesizer<S> {
    pub fn new(index: Arc<DocumentIndex<S>>, chain: ProviderChain, config: StrategyConfig) -> Self {
        Self {
            index,
            chain,
            config,
        }
    }

    #[instrument(skip(self, params), fields(title = %params.proposal_title))]
    pub async fn synthesize(&self, params: &StrategyParameters) -> Result<StrategyOutcome> {
        params.validate()?;

        let materials = self.retrieve(params).await;
        let sources = material_sources(&materials);
        let prompt = strategy_prompt(params, &materials, self.config.excerpt_chars);

        let result = self.chain.complete_json::<Strategy>(&prompt).await;
        let completion = self
            .config
            .fallback_policy
            .resolve(result, || synthesize_strategy(params))?;

        let mut strategy = completion.value;
        finalize(&mut strategy, params, &sources);
        info!(provider = %completion.provider, initiatives = strategy.initiatives.len(), "strategy synthesized");

        Ok(StrategyOutcome {
            strategy,
            provider: completion.provider,
            material_sources: sources,
        })
    }

    async fn retrieve(&self, params: &StrategyParameters) -> Vec<SearchResult> {
        let options = SearchOptions::default();
        let mut batches = Vec::new();
        for query in strategy_queries(params) {
            match self.index.search(&query, self.config.query_limit, &options).await {
                Ok(results) => batches.push(results),
                Err(e) => warn!(query = %query, error = %e, "retrieval query failed, skipping"),
            }
        }
        merge_materials(batches, self.config.max_materials)
    }
}

pub fn strategy_queries(params: &StrategyParameters) -> Vec<String> {
    let mut queries = vec![
        params.proposal_title.clone(),
        format!("{} {}", params.target_company, params.industry),
        format!("{} {}", params.project_type, params.industry),
    ];
    queries.extend(params.focus_areas.iter().cloned());

    let mut unique: Vec<String> = Vec::with_capacity(queries.len());
    for q in queries {
        let q = q.trim().to_string();
        if !q.is_empty() && !unique.contains(&q) {
            unique.push(q);
        }
    }
    unique
}

pub fn strategy_prompt(
    params: &StrategyParameters,
    materials: &[SearchResult],
    excerpt_chars: usize,
) -> String {
    let focus = if params.focus_areas.is_empty() {
        "none specified".to_string()
    } else {
        params.focus_areas.join(", ")
    };
    format!(
        "You are a strategy consultant preparing the proposal \"{title}\" for {company} \
         ({industry}). Project type: {project_type}.\n\
         Current situation: {status}\n\
         Focus areas: {focus}\n\n\
         Use the reference materials below and mention the source name when you rely \
         on one.\n\n{materials}\n\n\
         Respond with exactly one JSON object and nothing else:\n\
         {{\"title\": string, \"executive_summary\": string, \"objectives\": [string], \
         \"initiatives\": [{{\"name\": string, \"description\": string, \"timeline\": string, \
         \"kpis\": [string]}}], \"risks\": [string], \"references\": [string]}}",
        title = params.proposal_title,
        company = params.target_company,
        industry = or_unspecified(&params.industry),
        project_type = or_unspecified(&params.project_type),
        status = or_unspecified(&params.company_status_notes),
        materials = format_materials(materials, excerpt_chars),
    )
}

fn or_unspecified(s: &str) -> &str {
    if s.trim().is_empty() {
        "not specified"
    } else {
        s
    }
}

/// Deterministic proposal used when every provider failed.
pub fn synthesize_strategy(params: &StrategyParameters) -> Strategy {
    let areas: Vec<String> = if params.focus_areas.is_empty() {
        vec![params.proposal_title.clone()]
    } else {
        params.focus_areas.clone()
    };

    let initiatives = areas
        .iter()
        .enumerate()
        .map(|(i, area)| Initiative {
            name: format!("{area} programme"),
            description: format!(
                "Assess the current state of {area} at {} and implement targeted improvements.",
                params.target_company
            ),
            timeline: format!("Phase {}: months {}-{}", i + 1, i * 3 + 1, i * 3 + 3),
            kpis: vec![format!("{area} maturity score"), format!("{area} milestones delivered")],
        })
        .collect();

    Strategy {
        title: params.proposal_title.clone(),
        executive_summary: format!(
            "This proposal outlines how {} can address {} through a phased set of initiatives.",
            params.target_company,
            areas.join(", ")
        ),
        objectives: areas
            .iter()
            .map(|a| format!("Strengthen {a} at {}", params.target_company))
            .collect(),
        initiatives,
        risks: vec![
            "Limited stakeholder buy-in".to_string(),
            "Insufficient resources for implementation".to_string(),
        ],
        references: Vec::new(),
    }
}

fn finalize(strategy: &mut Strategy, params: &StrategyParameters, sources: &[String]) {
    if strategy.title.trim().is_empty() {
        strategy.title = params.proposal_title.clone();
    }
    strategy.initiatives.retain(|i| !i.name.trim().is_empty());
    strategy.references.retain(|r| !r.trim().is_empty());
    for s in sources {
        if !strategy.references.contains(s) {
            strategy.references.push(s.clone());
        }
    }
}
