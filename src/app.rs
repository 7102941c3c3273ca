//! Process-wide wiring of the index, provider chain, and pipelines.
//!
//! Both the CLI and the HTTP server build one [`App`] from configuration
//! and share it for the lifetime of the process.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use coursewright_core::embedding::Embedder;
use coursewright_core::generation::ProviderChain;
use coursewright_core::index::DocumentIndex;
use coursewright_core::registry::ThreadRegistry;
use coursewright_core::store::memory::InMemoryDocumentStore;

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::ingest::{ingest_dir, IngestReport};
use crate::providers::build_chain;
use crate::strategy::StrategySynthesizer;
use crate::workflow::{WorkflowEngine, WorkflowSettings};

pub struct App {
    pub config: Arc<Config>,
    pub index: Arc<DocumentIndex>,
    pub registry: Arc<ThreadRegistry>,
    pub engine: Arc<WorkflowEngine>,
    pub strategy: Arc<StrategySynthesizer>,
}

impl App {
    /// Build providers from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chain = build_chain(&config.generation)?;
        if chain.is_empty() {
            info!("no generation providers configured");
        }
        Ok(Self::with_parts(config, embedder, chain))
    }

    /// Build from already constructed providers.
    pub fn with_parts(
        config: Config,
        embedder: Option<Arc<dyn Embedder>>,
        chain: ProviderChain,
    ) -> Self {
        let index = Arc::new(DocumentIndex::new(
            InMemoryDocumentStore::new(),
            embedder,
            config.index.settings(),
        ));
        let registry = Arc::new(ThreadRegistry::new());
        let engine = Arc::new(WorkflowEngine::new(
            Arc::clone(&index),
            chain.clone(),
            Arc::clone(&registry),
            WorkflowSettings::from(&config.workflow),
        ));
        let strategy = Arc::new(StrategySynthesizer::new(
            Arc::clone(&index),
            chain,
            config.strategy.clone(),
        ));

        Self {
            config: Arc::new(config),
            index,
            registry,
            engine,
            strategy,
        }
    }

    /// Ingest a directory with the configured ingest settings.
    pub async fn ingest(&self, root: &Path) -> Result<IngestReport> {
        ingest_dir(&*self.index, root, &self.config.ingest).await
    }

    /// Ingest `[ingest] root` if one is configured.
    pub async fn ingest_configured_root(&self) -> Result<Option<IngestReport>> {
        match self.config.ingest.root.clone() {
            Some(root) => Ok(Some(self.ingest(&root).await?)),
            None => Ok(None),
        }
    }
}
