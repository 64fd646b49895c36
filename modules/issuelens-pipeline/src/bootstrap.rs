use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use issuelens_common::{Config, PromptSet, Taxonomy};

use crate::infra::{Embedder, LlmGenerator};
use crate::pipeline::{PipelineDeps, ProblemPipeline};
use crate::store::{InMemoryStore, PgStore};
use crate::traits::{IssueSource, ProblemStore, ReportSink};

/// The three storage seams, all served by one backend.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ProblemStore>,
    pub source: Arc<dyn IssueSource>,
    pub reports: Arc<dyn ReportSink>,
}

impl Backend {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ProblemStore + IssueSource + ReportSink + 'static,
    {
        Self {
            store: store.clone(),
            source: store.clone(),
            reports: store,
        }
    }
}

/// Postgres when `DATABASE_URL` is set (migrated on connect), otherwise in-memory.
pub async fn connect_backend(config: &Config) -> Result<Backend> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            Ok(Backend::from_store(Arc::new(store)))
        }
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Ok(Backend::from_store(Arc::new(InMemoryStore::new())))
        }
    }
}

/// Wire model clients, taxonomy and prompts from configuration.
pub fn build_pipeline(config: &Config, backend: &Backend) -> Result<ProblemPipeline> {
    let taxonomy = Taxonomy::load(&config.taxonomy_path)?;
    let generator = LlmGenerator::local(&config.llm_base_url, &config.llm_model)
        .with_api_key(config.llm_api_key.clone());
    let embedder = Embedder::local(&config.embedding_base_url, &config.embedding_model)
        .with_api_key(config.llm_api_key.clone());
    info!(
        model = generator.model(),
        embedding_model = embedder.model(),
        "Model clients ready"
    );

    let deps = PipelineDeps::builder()
        .store(backend.store.clone())
        .source(backend.source.clone())
        .reports(backend.reports.clone())
        .generator(Arc::new(generator))
        .embedder(Arc::new(embedder))
        .taxonomy(Arc::new(taxonomy))
        .prompts(PromptSet::default().with_version(config.prompt_version.clone()))
        .source_filter(config.source_filter.clone())
        .analysis(config.analysis.clone())
        .build();
    Ok(ProblemPipeline::new(deps))
}
