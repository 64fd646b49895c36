//! Grouping of problem embeddings into clusters and per-cluster aggregation.
//!
//! The cluster count is chosen by silhouette score over `2..=max_clusters`
//! (capped at `n - 1`), keeping the earliest count on ties. Members farther
//! than `outlier_threshold` from their centroid stay in the assignment but
//! are flagged and left out of frequencies and summaries.

pub mod kmeans;
pub mod silhouette;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use issuelens_common::{
    euclidean_distance, AnalysisSettings, ClusterAssignment, ClusterMember, FrequencyRow,
    IssueLensError, ProblemRecord,
};

pub use silhouette::silhouette_score;

/// Cluster count used when no candidate in range is scorable.
const FALLBACK_CLUSTER_COUNT: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CountSelection {
    pub count: usize,
    /// `(k, score)` for every candidate that produced a defined score.
    pub scores: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringOutcome {
    pub cluster_count: usize,
    pub assignments: Vec<ClusterAssignment>,
    pub outlier_count: usize,
}

pub struct ClusteringEngine {
    settings: AnalysisSettings,
}

/// First count with the highest score, in scan order. Ties keep the earlier count.
fn best_count(scores: &[(usize, f64)]) -> usize {
    let mut best: Option<(usize, f64)> = None;
    for &(k, score) in scores {
        if best.map_or(true, |(_, incumbent)| score > incumbent) {
            best = Some((k, score));
        }
    }
    best.map_or(FALLBACK_CLUSTER_COUNT, |(k, _)| k)
}

impl ClusteringEngine {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self { settings }
    }

    /// Best-scoring cluster count. Replaces the incumbent only on a strictly
    /// higher score. Candidates above `n - 1` are never evaluated; with no
    /// scorable candidate the count is 2.
    pub fn select_cluster_count(&self, data: &[Vec<f64>]) -> Result<CountSelection, IssueLensError> {
        let upper = self.settings.max_clusters.min(data.len().saturating_sub(1));
        let mut scores = Vec::new();

        for k in FALLBACK_CLUSTER_COUNT..=upper {
            let fit = kmeans::fit(data, k, self.settings.seed)?;
            let Some(score) = silhouette_score(data, &fit.labels) else {
                debug!(k, "Silhouette undefined, skipping candidate");
                continue;
            };
            debug!(k, score, "Candidate cluster count scored");
            scores.push((k, score));
        }

        Ok(CountSelection {
            count: best_count(&scores),
            scores,
        })
    }

    /// Cluster `records` by their `embeddings` (same order, same length).
    pub fn partition(
        &self,
        records: Vec<ProblemRecord>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<ClusteringOutcome, IssueLensError> {
        if records.len() != embeddings.len() {
            return Err(IssueLensError::Clustering(format!(
                "{} records but {} embeddings",
                records.len(),
                embeddings.len()
            )));
        }
        let data: Vec<Vec<f64>> = embeddings
            .into_iter()
            .map(|e| e.into_iter().map(f64::from).collect())
            .collect();
        if let Some(first) = data.first() {
            if data.iter().any(|v| v.len() != first.len()) {
                return Err(IssueLensError::Clustering(
                    "embeddings have inconsistent dimensions".to_string(),
                ));
            }
        }

        if records.len() < FALLBACK_CLUSTER_COUNT {
            return Ok(single_cluster(records));
        }

        let selection = self.select_cluster_count(&data)?;
        let fit = kmeans::fit(&data, selection.count, self.settings.seed)?;
        info!(
            problems = records.len(),
            cluster_count = selection.count,
            candidates = selection.scores.len(),
            "Cluster count selected"
        );

        let mut members: Vec<Vec<ClusterMember>> = vec![Vec::new(); selection.count];
        let mut outlier_count = 0;
        for ((record, point), &label) in records.into_iter().zip(&data).zip(&fit.labels) {
            let distance = euclidean_distance(point, &fit.centroids[label]);
            let outlier = distance > self.settings.outlier_threshold;
            if outlier {
                outlier_count += 1;
                warn!(
                    source_key = record.source_key.as_str(),
                    cluster_id = label,
                    distance,
                    threshold = self.settings.outlier_threshold,
                    "Outlier excluded from cluster"
                );
            }
            members[label].push(ClusterMember {
                record,
                distance,
                outlier,
            });
        }

        let assignments = members
            .into_iter()
            .enumerate()
            .map(|(cluster_id, members)| ClusterAssignment {
                cluster_id,
                members,
            })
            .collect();
        Ok(ClusteringOutcome {
            cluster_count: selection.count,
            assignments,
            outlier_count,
        })
    }
}

/// Fewer than two problems cannot be partitioned: everything goes to cluster 0.
fn single_cluster(records: Vec<ProblemRecord>) -> ClusteringOutcome {
    if records.is_empty() {
        return ClusteringOutcome {
            cluster_count: 0,
            assignments: Vec::new(),
            outlier_count: 0,
        };
    }
    let members = records
        .into_iter()
        .map(|record| ClusterMember {
            record,
            distance: 0.0,
            outlier: false,
        })
        .collect();
    ClusteringOutcome {
        cluster_count: 1,
        assignments: vec![ClusterAssignment {
            cluster_id: 0,
            members,
        }],
        outlier_count: 0,
    }
}

/// Retained-member counts per (cluster, problem type), ordered by cluster,
/// then descending frequency, then problem type.
pub fn aggregate_frequencies(assignments: &[ClusterAssignment]) -> Vec<FrequencyRow> {
    let mut rows = Vec::new();
    for assignment in assignments {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in assignment.retained() {
            *counts.entry(record.problem_type.as_str()).or_default() += 1;
        }
        rows.extend(counts.into_iter().map(|(problem_type, frequency)| FrequencyRow {
            cluster_id: assignment.cluster_id,
            problem_type: problem_type.to_string(),
            frequency,
        }));
    }
    rows.sort_by(|a, b| {
        a.cluster_id
            .cmp(&b.cluster_id)
            .then(b.frequency.cmp(&a.frequency))
            .then_with(|| a.problem_type.cmp(&b.problem_type))
    });
    rows
}
