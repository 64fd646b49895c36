//! Controlled vocabulary of problem types.
//!
//! Read-only to the pipeline. Label order is significant: standardization
//! picks the first label (in taxonomy order) found in a description.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::IssueLensError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub label: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
}

/// On-disk shape maintained by the taxonomy curation process.
#[derive(Debug, Deserialize)]
struct TaxonomyDocument {
    problem_types: Vec<String>,
    #[serde(default)]
    problem_descriptions: HashMap<String, String>,
}

impl Taxonomy {
    /// Build from ordered `(label, description)` pairs. Blank and repeated
    /// labels are dropped.
    pub fn new<I, L, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (L, D)>,
        L: Into<String>,
        D: Into<String>,
    {
        let mut kept: Vec<TaxonomyEntry> = Vec::new();
        for (label, description) in entries {
            let label = label.into().trim().to_string();
            if label.is_empty() || kept.iter().any(|e| e.label.eq_ignore_ascii_case(&label)) {
                continue;
            }
            kept.push(TaxonomyEntry {
                label,
                description: description.into(),
            });
        }
        Self { entries: kept }
    }

    pub fn from_labels<I, L>(labels: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self::new(labels.into_iter().map(|l| (l, String::new())))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, IssueLensError> {
        let doc: TaxonomyDocument = serde_json::from_str(raw)
            .map_err(|e| IssueLensError::Config(format!("invalid taxonomy document: {e}")))?;
        let descriptions = doc.problem_descriptions;
        Ok(Self::new(doc.problem_types.into_iter().map(|label| {
            let description = descriptions.get(&label).cloned().unwrap_or_default();
            (label, description)
        })))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, IssueLensError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            IssueLensError::Config(format!("failed to read taxonomy {}: {e}", path.display()))
        })?;
        let taxonomy = Self::from_json_str(&raw)?;
        tracing::info!(path = %path.display(), labels = taxonomy.len(), "Taxonomy loaded");
        Ok(taxonomy)
    }

    /// First label, in taxonomy order, occurring case-insensitively as a
    /// substring of `description`.
    pub fn match_label(&self, description: &str) -> Option<&str> {
        let haystack = description.to_lowercase();
        self.entries
            .iter()
            .find(|e| haystack.contains(&e.label.to_lowercase()))
            .map(|e| e.label.as_str())
    }

    pub fn contains(&self, label: &str) -> bool {
        self.entries.iter().any(|e| e.label == label)
    }

    pub fn describe(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.description.as_str())
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bullet list for prompt context: `- label: description`.
    pub fn prompt_listing(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                if e.description.is_empty() {
                    format!("- {}", e.label)
                } else {
                    format!("- {}: {}", e.label, e.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_is_case_insensitive() {
        let taxonomy = Taxonomy::from_labels(["memory leak", "login issue"]);
        assert_eq!(
            taxonomy.match_label("Memory leak detected in the system"),
            Some("memory leak")
        );
        assert_eq!(
            taxonomy.match_label("LOGIN ISSUE after upgrade"),
            Some("login issue")
        );
    }

    #[test]
    fn first_in_taxonomy_order_wins() {
        // "leak" is shorter but listed first; order beats length.
        let taxonomy = Taxonomy::from_labels(["leak", "memory leak"]);
        assert_eq!(taxonomy.match_label("a memory leak"), Some("leak"));
    }

    #[test]
    fn no_match_returns_none() {
        let taxonomy = Taxonomy::from_labels(["memory leak"]);
        assert_eq!(taxonomy.match_label("the button is the wrong colour"), None);
    }

    #[test]
    fn blank_and_duplicate_labels_are_dropped() {
        let taxonomy = Taxonomy::from_labels(["", "  ", "timeout", "Timeout"]);
        assert_eq!(taxonomy.len(), 1);
        assert_eq!(taxonomy.match_label("anything at all"), None);
    }

    #[test]
    fn parses_document_with_descriptions() {
        let raw = r#"{
            "problem_types": ["login issue", "billing error"],
            "problem_descriptions": {"login issue": "User cannot sign in"}
        }"#;
        let taxonomy = Taxonomy::from_json_str(raw).unwrap();
        assert_eq!(taxonomy.labels().collect::<Vec<_>>(), ["login issue", "billing error"]);
        assert_eq!(taxonomy.describe("login issue"), Some("User cannot sign in"));
        assert_eq!(taxonomy.describe("billing error"), Some(""));
        assert!(taxonomy.contains("billing error"));
        assert_eq!(
            taxonomy.prompt_listing(),
            "- login issue: User cannot sign in\n- billing error"
        );
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.json");
        std::fs::write(&path, r#"{"problem_types": ["crash"]}"#).unwrap();
        let taxonomy = Taxonomy::load(&path).unwrap();
        assert!(taxonomy.contains("crash"));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = Taxonomy::load("/nonexistent/taxonomy.json").unwrap_err();
        assert!(matches!(err, IssueLensError::Config(_)));
    }
}
