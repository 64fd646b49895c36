// Trait seams for the pipeline's external collaborators.
//
// TextGenerator: the generative model behind extraction and summaries.
// ProblemStore : extraction markers, problem upserts, per-project overrides.
// IssueSource  : raw issues as delivered by the ticket collector.
// ReportSink   : the latest report per project.
//
// InMemoryStore and the scripted mocks in `testing` implement these so the
// whole pipeline runs in tests without a model server or a database.

use anyhow::Result;
use async_trait::async_trait;

use issuelens_common::{ExtractionContext, ProblemRecord, ProblemReport, ProjectSettings, RawIssueRecord};

// ---------------------------------------------------------------------------
// TextGenerator
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Complete a single prompt. Transport and model errors are returned, not retried.
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

// ---------------------------------------------------------------------------
// ProblemStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ProblemStore: Send + Sync {
    /// True if `source_key` was already extracted under `version` for `project_id`.
    async fn extraction_exists(&self, source_key: &str, version: &str, project_id: &str) -> Result<bool>;

    /// Mark `source_key` as extracted under the context's version, including
    /// when the model reported zero problems.
    async fn record_extraction(
        &self,
        ctx: &ExtractionContext,
        source_key: &str,
        problem_count: usize,
    ) -> Result<()>;

    /// Insert or replace on (description, source_key, source_filter, project_id).
    async fn upsert_problem(&self, problem: &ProblemRecord) -> Result<()>;

    /// Every persisted problem for a project and source filter, in a stable order.
    async fn problems(&self, project_id: &str, source_filter: &str) -> Result<Vec<ProblemRecord>>;

    async fn project_settings(&self, project_id: &str) -> Result<Option<ProjectSettings>>;
}

// ---------------------------------------------------------------------------
// IssueSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch_issues(&self, project_id: &str, source_filter: &str) -> Result<Vec<RawIssueRecord>>;

    /// Persist collector output. Returns the number of records written.
    async fn save_issues(&self, issues: &[RawIssueRecord]) -> Result<usize>;
}

// ---------------------------------------------------------------------------
// ReportSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Replace the stored report for the report's project.
    async fn save_report(&self, report: &ProblemReport) -> Result<()>;

    async fn latest_report(&self, project_id: &str) -> Result<Option<ProblemReport>>;
}
