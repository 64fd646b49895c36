//! Entry points exposed to callers: submit a run, poll it, read the report.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use issuelens_common::{ProblemReport, Stage};

use crate::jobs::{JobOrchestrator, JobRecord};
use crate::pipeline::ProblemPipeline;
use crate::traits::ReportSink;

/// Why a submission was rejected. Nothing is registered or run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("project_id is required")]
    MissingProject,
    #[error("stage is required")]
    MissingStage,
    #[error("stage must be 1 (extraction) or 2 (analysis), got {0}")]
    InvalidStage(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub task_id: String,
    pub status: &'static str,
}

/// Outcome of a status lookup. An unknown id is a normal result, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusQuery {
    Found(JobRecord),
    NotFound { task_id: String },
}

#[derive(Clone)]
pub struct ProcessService {
    pipeline: Arc<ProblemPipeline>,
    reports: Arc<dyn ReportSink>,
    jobs: JobOrchestrator,
}

impl ProcessService {
    pub fn new(pipeline: Arc<ProblemPipeline>) -> Self {
        let reports = pipeline.deps().reports.clone();
        Self {
            pipeline,
            reports,
            jobs: JobOrchestrator::new(),
        }
    }

    pub fn jobs(&self) -> &JobOrchestrator {
        &self.jobs
    }

    /// Validate, register a pending job and return without waiting for it.
    pub async fn submit(
        &self,
        project_id: Option<&str>,
        stage: Option<u8>,
    ) -> Result<Accepted, SubmitError> {
        let project_id = project_id
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(SubmitError::MissingProject)?
            .to_string();
        let wire_stage = stage.ok_or(SubmitError::MissingStage)?;
        let stage = Stage::from_wire(wire_stage).ok_or(SubmitError::InvalidStage(wire_stage))?;

        let pipeline = self.pipeline.clone();
        let label = format!("{stage}:{project_id}");
        let task_id = self
            .jobs
            .submit(label, move || async move {
                let stats = pipeline.run(&project_id, stage).await?;
                Ok::<_, anyhow::Error>(stats.summary())
            })
            .await;

        info!(task_id = task_id.as_str(), %stage, "Processing accepted");
        Ok(Accepted {
            task_id,
            status: "accepted",
        })
    }

    pub async fn get_status(&self, task_id: &str) -> StatusQuery {
        match self.jobs.status(task_id).await {
            Some(record) => StatusQuery::Found(record),
            None => StatusQuery::NotFound {
                task_id: task_id.to_string(),
            },
        }
    }

    /// Latest stored report, `None` if the project was never analysed.
    pub async fn get_report(&self, project_id: &str) -> Result<Option<ProblemReport>> {
        self.reports.latest_report(project_id).await
    }
}
