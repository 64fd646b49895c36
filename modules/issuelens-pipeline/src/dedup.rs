//! Idempotence gate in front of extraction.
//!
//! A record is extracted at most once per (source_key, version, project_id).
//! Check-then-act is not atomic across concurrent jobs for the same project;
//! the problem upsert key keeps a duplicate extraction from duplicating rows.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use issuelens_common::ExtractionContext;

use crate::preprocess::CleanedIssue;
use crate::traits::ProblemStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Extract { source_key: String },
    AlreadyExtracted { source_key: String },
    MissingIdentity,
}

pub struct DedupGate {
    store: Arc<dyn ProblemStore>,
}

impl DedupGate {
    pub fn new(store: Arc<dyn ProblemStore>) -> Self {
        Self { store }
    }

    /// Decide whether `issue` needs a model call. Skips are logged, never errors;
    /// only a failing store lookup returns `Err`.
    pub async fn check(&self, issue: &CleanedIssue, ctx: &ExtractionContext) -> Result<GateDecision> {
        let Some(source_key) = issue.source_key.as_deref() else {
            warn!(
                project_id = ctx.project_id.as_str(),
                "Skipping issue without identity key"
            );
            return Ok(GateDecision::MissingIdentity);
        };

        if self
            .store
            .extraction_exists(source_key, &ctx.version, &ctx.project_id)
            .await?
        {
            info!(
                source_key,
                version = ctx.version.as_str(),
                project_id = ctx.project_id.as_str(),
                "Already extracted, skipping"
            );
            return Ok(GateDecision::AlreadyExtracted {
                source_key: source_key.to_string(),
            });
        }

        Ok(GateDecision::Extract {
            source_key: source_key.to_string(),
        })
    }
}
