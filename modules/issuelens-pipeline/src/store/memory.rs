use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use issuelens_common::{
    ExtractionContext, ProblemKey, ProblemRecord, ProblemReport, ProjectSettings, RawIssueRecord,
};

use crate::traits::{IssueSource, ProblemStore, ReportSink};

/// Process-local store. Used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryStore {
    issues: RwLock<Vec<RawIssueRecord>>,
    problems: RwLock<BTreeMap<ProblemKey, ProblemRecord>>,
    extractions: RwLock<HashSet<(String, String, String)>>,
    projects: RwLock<HashMap<String, ProjectSettings>>,
    reports: RwLock<HashMap<String, ProblemReport>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_project_settings(&self, settings: ProjectSettings) {
        self.projects
            .write()
            .await
            .insert(settings.project_id.clone(), settings);
    }

    pub async fn problem_count(&self) -> usize {
        self.problems.read().await.len()
    }

    pub async fn extraction_count(&self) -> usize {
        self.extractions.read().await.len()
    }
}

#[async_trait]
impl ProblemStore for InMemoryStore {
    async fn extraction_exists(&self, source_key: &str, version: &str, project_id: &str) -> Result<bool> {
        let key = (source_key.to_string(), version.to_string(), project_id.to_string());
        Ok(self.extractions.read().await.contains(&key))
    }

    async fn record_extraction(
        &self,
        ctx: &ExtractionContext,
        source_key: &str,
        _problem_count: usize,
    ) -> Result<()> {
        self.extractions.write().await.insert((
            source_key.to_string(),
            ctx.version.clone(),
            ctx.project_id.clone(),
        ));
        Ok(())
    }

    async fn upsert_problem(&self, problem: &ProblemRecord) -> Result<()> {
        self.problems
            .write()
            .await
            .insert(problem.key(), problem.clone());
        Ok(())
    }

    async fn problems(&self, project_id: &str, source_filter: &str) -> Result<Vec<ProblemRecord>> {
        let mut found: Vec<ProblemRecord> = self
            .problems
            .read()
            .await
            .values()
            .filter(|p| p.project_id == project_id && p.source_filter == source_filter)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.source_key
                .cmp(&b.source_key)
                .then_with(|| a.description.cmp(&b.description))
        });
        Ok(found)
    }

    async fn project_settings(&self, project_id: &str) -> Result<Option<ProjectSettings>> {
        Ok(self.projects.read().await.get(project_id).cloned())
    }
}

#[async_trait]
impl IssueSource for InMemoryStore {
    async fn fetch_issues(&self, project_id: &str, source_filter: &str) -> Result<Vec<RawIssueRecord>> {
        Ok(self
            .issues
            .read()
            .await
            .iter()
            .filter(|i| i.project_id == project_id && i.source_filter == source_filter)
            .cloned()
            .collect())
    }

    /// Keyed records replace an earlier copy with the same (project, key) in
    /// place. Keyless records are appended.
    async fn save_issues(&self, issues: &[RawIssueRecord]) -> Result<usize> {
        let mut stored = self.issues.write().await;
        for issue in issues {
            let existing = issue.identity().and_then(|key| {
                stored
                    .iter()
                    .position(|i| i.project_id == issue.project_id && i.identity() == Some(key))
            });
            match existing {
                Some(index) => stored[index] = issue.clone(),
                None => stored.push(issue.clone()),
            }
        }
        Ok(issues.len())
    }
}

#[async_trait]
impl ReportSink for InMemoryStore {
    async fn save_report(&self, report: &ProblemReport) -> Result<()> {
        self.reports
            .write()
            .await
            .insert(report.project_id.clone(), report.clone());
        Ok(())
    }

    async fn latest_report(&self, project_id: &str) -> Result<Option<ProblemReport>> {
        Ok(self.reports.read().await.get(project_id).cloned())
    }
}
