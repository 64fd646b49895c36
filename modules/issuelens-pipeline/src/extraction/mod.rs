pub mod parse;

use std::sync::Arc;

use tracing::{debug, info, warn};

use ai_client::util::truncate_to_char_boundary;
use issuelens_common::{
    ExtractionContext, ProblemRecord, PromptSet, Severity, Taxonomy, UNKNOWN_PROBLEM_TYPE,
};

use crate::preprocess::CleanedIssue;
use crate::retriever::{format_similar_cases, SimilarCase};
use crate::traits::TextGenerator;

pub use parse::{parse_model_output, ExtractedProblem, ParseOutcome};

/// Issue text beyond this many bytes is cut before prompting.
const MAX_ISSUE_BYTES: usize = 12_000;
const EXTRACTION_MAX_TOKENS: u32 = 1024;
const UNSPECIFIED_IMPACT: &str = "unspecified";
const RAW_LOG_MAX_BYTES: usize = 4_000;

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The model answered. `problems` may be empty when nothing was parseable.
    Extracted {
        problems: Vec<ProblemRecord>,
        strategy: &'static str,
    },
    /// The model call itself failed. The issue stays open for a later run.
    Failed { reason: String },
}

/// Turns one issue into standardized problem records via the generative model.
pub struct ExtractionEngine {
    generator: Arc<dyn TextGenerator>,
    taxonomy: Arc<Taxonomy>,
    prompts: PromptSet,
}

impl ExtractionEngine {
    pub fn new(generator: Arc<dyn TextGenerator>, taxonomy: Arc<Taxonomy>, prompts: PromptSet) -> Self {
        Self {
            generator,
            taxonomy,
            prompts,
        }
    }

    /// Never returns an error: failures are logged and reported as
    /// `ExtractionOutcome::Failed` so the batch can continue.
    pub async fn extract(
        &self,
        issue: &CleanedIssue,
        source_key: &str,
        similar: &[SimilarCase],
        ctx: &ExtractionContext,
    ) -> ExtractionOutcome {
        let prompt = self.prompts.render_extraction(
            truncate_to_char_boundary(&issue.text, MAX_ISSUE_BYTES),
            &format_similar_cases(similar),
            &self.taxonomy.prompt_listing(),
        );

        let raw = match self.generator.generate(&prompt, EXTRACTION_MAX_TOKENS).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(source_key, error = %e, "Extraction model call failed");
                return ExtractionOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = parse_model_output(&raw);
        let strategy = outcome.strategy();
        if matches!(outcome, ParseOutcome::Unparsed) {
            warn!(
                source_key,
                raw = raw_excerpt(&raw),
                "Model output could not be parsed"
            );
        } else {
            debug!(source_key, strategy, "Model output parsed");
        }

        let problems: Vec<ProblemRecord> = outcome
            .into_problems()
            .into_iter()
            .map(|extracted| self.standardize(extracted, issue, source_key, ctx))
            .collect();

        info!(source_key, problems = problems.len(), strategy, "Issue extracted");
        ExtractionOutcome::Extracted { problems, strategy }
    }

    fn standardize(
        &self,
        extracted: ExtractedProblem,
        issue: &CleanedIssue,
        source_key: &str,
        ctx: &ExtractionContext,
    ) -> ProblemRecord {
        let (problem_type, severity) = standardize(&extracted, &self.taxonomy);
        let impact = match extracted.impact.trim() {
            "" => UNSPECIFIED_IMPACT.to_string(),
            impact => impact.to_string(),
        };
        ProblemRecord {
            description: extracted.description,
            severity,
            impact,
            problem_type,
            version: ctx.version.clone(),
            customer_id: issue.customer_id.clone(),
            source_key: source_key.to_string(),
            source_filter: ctx.source_filter.clone(),
            project_id: ctx.project_id.clone(),
        }
    }
}

/// Map a reported problem onto the taxonomy. The type is the first label
/// found in the description; no match yields `unknown` with severity forced
/// to low regardless of what the model said.
pub fn standardize(extracted: &ExtractedProblem, taxonomy: &Taxonomy) -> (String, Severity) {
    match taxonomy.match_label(&extracted.description) {
        Some(label) => (label.to_string(), Severity::from_model(&extracted.severity)),
        None => (UNKNOWN_PROBLEM_TYPE.to_string(), Severity::Low),
    }
}

/// Raw model output as logged when parsing fails, capped for long responses.
fn raw_excerpt(raw: &str) -> &str {
    truncate_to_char_boundary(raw, RAW_LOG_MAX_BYTES)
}
