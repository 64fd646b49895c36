//! End-to-end run for one project.
//!
//! Stage 1 fetches raw issues, gates them on (key, prompt version, project),
//! extracts problems for the new ones and then analyses. Stage 2 only
//! analyses: it re-clusters every persisted problem, summarizes the clusters
//! and stores the report.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use issuelens_common::{
    AnalysisSettings, ExtractionContext, IssueLensError, ProblemReport, PromptSet, Stage, Taxonomy,
    TextEmbedder,
};

use crate::clustering::{aggregate_frequencies, ClusteringEngine};
use crate::dedup::{DedupGate, GateDecision};
use crate::extraction::{ExtractionEngine, ExtractionOutcome};
use crate::preprocess::clean_issues;
use crate::retriever::SimilarityRetriever;
use crate::summarizer::ClusterSummarizer;
use crate::traits::{IssueSource, ProblemStore, ReportSink, TextGenerator};

/// Long-lived collaborators shared by every run.
#[derive(Clone, TypedBuilder)]
pub struct PipelineDeps {
    pub store: Arc<dyn ProblemStore>,
    pub source: Arc<dyn IssueSource>,
    pub reports: Arc<dyn ReportSink>,
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub taxonomy: Arc<Taxonomy>,
    #[builder(default)]
    pub prompts: PromptSet,
    /// Used when the project has no source filter override.
    #[builder(default, setter(into))]
    pub source_filter: String,
    #[builder(default)]
    pub analysis: AnalysisSettings,
}

/// Settings for one run after project overrides are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub source_filter: String,
    pub prompts: PromptSet,
}

/// Stats from a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
    pub stage: Stage,
    pub issues_fetched: usize,
    pub issues_empty: usize,
    pub issues_missing_key: usize,
    pub issues_already_extracted: usize,
    pub issues_extracted: usize,
    pub extraction_failures: usize,
    pub problems_stored: usize,
    pub problems_clustered: usize,
    pub cluster_count: usize,
    pub outliers: usize,
    pub summaries: usize,
}

impl RunStats {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            issues_fetched: 0,
            issues_empty: 0,
            issues_missing_key: 0,
            issues_already_extracted: 0,
            issues_extracted: 0,
            extraction_failures: 0,
            problems_stored: 0,
            problems_clustered: 0,
            cluster_count: 0,
            outliers: 0,
            summaries: 0,
        }
    }

    /// Single-line form, used as a job's result message.
    pub fn summary(&self) -> String {
        format!(
            "{} run: {} issues extracted, {} skipped, {} failed; {} problems in {} clusters ({} outliers)",
            self.stage,
            self.issues_extracted,
            self.issues_already_extracted + self.issues_missing_key + self.issues_empty,
            self.extraction_failures,
            self.problems_clustered,
            self.cluster_count,
            self.outliers,
        )
    }
}

impl std::fmt::Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Pipeline Run Complete ({}) ===", self.stage)?;
        if self.stage.runs_extraction() {
            writeln!(f, "Issues fetched:     {}", self.issues_fetched)?;
            writeln!(f, "Issues empty:       {}", self.issues_empty)?;
            writeln!(f, "Missing key:        {}", self.issues_missing_key)?;
            writeln!(f, "Already extracted:  {}", self.issues_already_extracted)?;
            writeln!(f, "Extracted:          {}", self.issues_extracted)?;
            writeln!(f, "Failed:             {}", self.extraction_failures)?;
            writeln!(f, "Problems stored:    {}", self.problems_stored)?;
        }
        writeln!(f, "Problems clustered: {}", self.problems_clustered)?;
        writeln!(f, "Clusters:           {}", self.cluster_count)?;
        writeln!(f, "Outliers:           {}", self.outliers)?;
        writeln!(f, "Summaries:          {}", self.summaries)?;
        Ok(())
    }
}

pub struct ProblemPipeline {
    deps: PipelineDeps,
}

impl ProblemPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    pub async fn run(&self, project_id: &str, stage: Stage) -> Result<RunStats> {
        let settings = self.resolve_settings(project_id).await?;
        info!(
            project_id,
            %stage,
            source_filter = settings.source_filter.as_str(),
            prompt_version = settings.prompts.version.as_str(),
            "Pipeline run starting"
        );

        let mut stats = RunStats::new(stage);
        if stage.runs_extraction() {
            self.extract_problems(project_id, &settings, &mut stats).await?;
        }
        self.analyze(project_id, &settings, &mut stats).await?;

        info!(project_id, "{}", stats.summary());
        Ok(stats)
    }

    /// Apply the project's stored overrides on top of the configured defaults.
    pub async fn resolve_settings(&self, project_id: &str) -> Result<RunSettings> {
        let overrides = self.deps.store.project_settings(project_id).await?;
        let (source_filter, prompts) = match overrides {
            Some(o) => (o.source_filter, o.prompts),
            None => (None, None),
        };
        Ok(RunSettings {
            source_filter: source_filter.unwrap_or_else(|| self.deps.source_filter.clone()),
            prompts: prompts.unwrap_or_else(|| self.deps.prompts.clone()),
        })
    }

    async fn extract_problems(
        &self,
        project_id: &str,
        settings: &RunSettings,
        stats: &mut RunStats,
    ) -> Result<()> {
        let ctx = ExtractionContext {
            project_id: project_id.to_string(),
            source_filter: settings.source_filter.clone(),
            version: settings.prompts.version.clone(),
        };

        let raw = self
            .deps
            .source
            .fetch_issues(project_id, &settings.source_filter)
            .await?;
        let issues = clean_issues(&raw);
        stats.issues_fetched = raw.len();
        stats.issues_empty = raw.len() - issues.len();
        info!(fetched = raw.len(), usable = issues.len(), "Raw issues loaded");

        let corpus = issues.iter().map(|i| i.text.clone()).collect();
        let retriever = SimilarityRetriever::build(self.deps.embedder.clone(), corpus)
            .await
            .map_err(|e| IssueLensError::Embedding(e.to_string()))?;
        let gate = DedupGate::new(self.deps.store.clone());
        let engine = ExtractionEngine::new(
            self.deps.generator.clone(),
            self.deps.taxonomy.clone(),
            settings.prompts.clone(),
        );

        for issue in &issues {
            let source_key = match gate.check(issue, &ctx).await? {
                GateDecision::Extract { source_key } => source_key,
                GateDecision::AlreadyExtracted { .. } => {
                    stats.issues_already_extracted += 1;
                    continue;
                }
                GateDecision::MissingIdentity => {
                    stats.issues_missing_key += 1;
                    continue;
                }
            };

            let similar = match retriever.retrieve(&issue.text, self.deps.analysis.retrieval_k).await {
                Ok(similar) => similar,
                Err(e) => {
                    warn!(source_key = source_key.as_str(), error = %e, "Similar case lookup failed");
                    stats.extraction_failures += 1;
                    continue;
                }
            };

            match engine.extract(issue, &source_key, &similar, &ctx).await {
                ExtractionOutcome::Extracted { problems, .. } => {
                    for problem in &problems {
                        self.deps.store.upsert_problem(problem).await?;
                    }
                    self.deps
                        .store
                        .record_extraction(&ctx, &source_key, problems.len())
                        .await?;
                    stats.issues_extracted += 1;
                    stats.problems_stored += problems.len();
                }
                ExtractionOutcome::Failed { .. } => stats.extraction_failures += 1,
            }
        }
        Ok(())
    }

    async fn analyze(
        &self,
        project_id: &str,
        settings: &RunSettings,
        stats: &mut RunStats,
    ) -> Result<ProblemReport> {
        let problems = self
            .deps
            .store
            .problems(project_id, &settings.source_filter)
            .await?;
        let problem_count = problems.len();
        stats.problems_clustered = problem_count;

        let embeddings = if problems.is_empty() {
            Vec::new()
        } else {
            let descriptions = problems.iter().map(|p| p.description.clone()).collect();
            self.deps
                .embedder
                .embed_batch(descriptions)
                .await
                .map_err(|e| IssueLensError::Embedding(e.to_string()))?
        };

        let outcome = ClusteringEngine::new(self.deps.analysis.clone()).partition(problems, embeddings)?;
        let frequency_table = aggregate_frequencies(&outcome.assignments);
        let cluster_summaries = ClusterSummarizer::new(self.deps.generator.clone(), settings.prompts.clone())
            .summarize(&outcome.assignments)
            .await;

        stats.cluster_count = outcome.cluster_count;
        stats.outliers = outcome.outlier_count;
        stats.summaries = cluster_summaries.len();

        let report = ProblemReport {
            project_id: project_id.to_string(),
            source_filter: settings.source_filter.clone(),
            cluster_count: outcome.cluster_count,
            problem_count,
            outlier_count: outcome.outlier_count,
            frequency_table,
            cluster_summaries,
            generated_at: Utc::now(),
        };
        self.deps.reports.save_report(&report).await?;
        info!(
            project_id,
            problems = problem_count,
            clusters = report.cluster_count,
            "Report stored"
        );
        Ok(report)
    }
}
