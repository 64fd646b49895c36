use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::prompts::PromptSet;

/// Problem type assigned when no taxonomy label matches.
pub const UNKNOWN_PROBLEM_TYPE: &str = "unknown";

// --- Raw issues ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueComment {
    #[serde(default)]
    pub author: Option<String>,
    pub body: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// An issue as delivered by the ticket source. Immutable once extracted.
///
/// `key` is the identity field; records without one are skipped by the
/// dedup gate rather than failing the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawIssueRecord {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default, alias = "cid")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
    /// Filter expression the collector used to fetch this record.
    #[serde(default)]
    pub source_filter: String,
    #[serde(default)]
    pub project_id: String,
}

impl RawIssueRecord {
    /// The identity key, if present and non-blank.
    pub fn identity(&self) -> Option<&str> {
        self.key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

// --- Problems ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a model-reported severity onto the enum. Unrecognised text is `Low`.
    pub fn from_model(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if lower.contains("critical") || lower.contains("blocker") {
            Severity::Critical
        } else if lower.contains("high") || lower.contains("major") {
            Severity::High
        } else if lower.contains("medium") || lower.contains("moderate") {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A standardized problem extracted from one raw issue.
///
/// `problem_type` is always a taxonomy label or [`UNKNOWN_PROBLEM_TYPE`];
/// an unknown type always carries `Severity::Low`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub description: String,
    pub severity: Severity,
    pub impact: String,
    pub problem_type: String,
    pub version: String,
    pub customer_id: Option<String>,
    pub source_key: String,
    pub source_filter: String,
    pub project_id: String,
}

impl ProblemRecord {
    pub fn key(&self) -> ProblemKey {
        ProblemKey {
            description: self.description.clone(),
            source_key: self.source_key.clone(),
            source_filter: self.source_filter.clone(),
            project_id: self.project_id.clone(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.problem_type == UNKNOWN_PROBLEM_TYPE
    }
}

/// Persisted-state key for a ProblemRecord. Writes are upserts on this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProblemKey {
    pub description: String,
    pub source_key: String,
    pub source_filter: String,
    pub project_id: String,
}

/// The (source, version, project) context an extraction runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionContext {
    pub project_id: String,
    pub source_filter: String,
    pub version: String,
}

// --- Stages ---

/// Pipeline entry point selected at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Ingest, dedup and extract, then analyse.
    Extraction,
    /// Re-cluster and report over already-persisted problems.
    Analysis,
}

impl Stage {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Stage::Extraction),
            2 => Some(Stage::Analysis),
            _ => None,
        }
    }

    pub fn wire_value(&self) -> u8 {
        match self {
            Stage::Extraction => 1,
            Stage::Analysis => 2,
        }
    }

    pub fn runs_extraction(&self) -> bool {
        matches!(self, Stage::Extraction)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => write!(f, "extraction"),
            Stage::Analysis => write!(f, "analysis"),
        }
    }
}

// --- Clustering output ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub record: ProblemRecord,
    /// Euclidean distance to the cluster centroid.
    pub distance: f64,
    pub outlier: bool,
}

/// One cluster of a clustering pass. No identity survives across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub cluster_id: usize,
    pub members: Vec<ClusterMember>,
}

impl ClusterAssignment {
    /// Members kept for reporting (outliers excluded).
    pub fn retained(&self) -> impl Iterator<Item = &ProblemRecord> {
        self.members.iter().filter(|m| !m.outlier).map(|m| &m.record)
    }

    pub fn outlier_count(&self) -> usize {
        self.members.iter().filter(|m| m.outlier).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyRow {
    pub cluster_id: usize,
    pub problem_type: String,
    pub frequency: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub source_keys: Vec<String>,
    pub summary: String,
}

/// Aggregated output of one analysis pass for a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemReport {
    pub project_id: String,
    pub source_filter: String,
    pub cluster_count: usize,
    pub problem_count: usize,
    pub outlier_count: usize,
    pub frequency_table: Vec<FrequencyRow>,
    pub cluster_summaries: Vec<ClusterSummary>,
    pub generated_at: DateTime<Utc>,
}

// --- Projects ---

/// Per-project overrides stored alongside the project record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub project_id: String,
    #[serde(default)]
    pub source_filter: Option<String>,
    #[serde(default)]
    pub prompts: Option<PromptSet>,
}
