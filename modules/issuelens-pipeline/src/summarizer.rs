use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use issuelens_common::{ClusterAssignment, ClusterSummary, PromptSet};

use crate::traits::TextGenerator;

/// Stored in place of a synopsis when the model call fails.
pub const SUMMARY_PLACEHOLDER: &str = "Error in generating summary.";

const SUMMARY_MAX_TOKENS: u32 = 200;
const SUMMARY_CONCURRENCY: usize = 4;

/// One model call per cluster over the retained members' descriptions.
pub struct ClusterSummarizer {
    generator: Arc<dyn TextGenerator>,
    prompts: PromptSet,
}

impl ClusterSummarizer {
    pub fn new(generator: Arc<dyn TextGenerator>, prompts: PromptSet) -> Self {
        Self { generator, prompts }
    }

    /// Clusters whose members are all outliers get no summary. A failed call
    /// yields the placeholder and the remaining clusters are still summarized.
    /// Output follows assignment order.
    pub async fn summarize(&self, assignments: &[ClusterAssignment]) -> Vec<ClusterSummary> {
        // Futures are built up front so the returned future stays Send.
        let pending: Vec<_> = assignments
            .iter()
            .map(|assignment| self.summarize_cluster(assignment))
            .collect();
        let summaries: Vec<ClusterSummary> = stream::iter(pending)
            .buffered(SUMMARY_CONCURRENCY)
            .filter_map(future::ready)
            .collect()
            .await;
        info!(clusters = summaries.len(), "Clusters summarized");
        summaries
    }

    async fn summarize_cluster(&self, assignment: &ClusterAssignment) -> Option<ClusterSummary> {
        let retained: Vec<_> = assignment.retained().collect();
        if retained.is_empty() {
            return None;
        }

        let descriptions = retained
            .iter()
            .map(|r| format!("- {}", r.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = self.prompts.render_cluster_summary(&descriptions);

        let summary = match self.generator.generate(&prompt, SUMMARY_MAX_TOKENS).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!(cluster_id = assignment.cluster_id, "Empty summary from model");
                SUMMARY_PLACEHOLDER.to_string()
            }
            Err(e) => {
                warn!(cluster_id = assignment.cluster_id, error = %e, "Summary generation failed");
                SUMMARY_PLACEHOLDER.to_string()
            }
        };

        let mut source_keys: Vec<String> = Vec::new();
        for record in &retained {
            if !source_keys.contains(&record.source_key) {
                source_keys.push(record.source_key.clone());
            }
        }

        Some(ClusterSummary {
            cluster_id: assignment.cluster_id,
            source_keys,
            summary,
        })
    }
}
