//! Text normalisation ahead of retrieval and extraction.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use issuelens_common::RawIssueRecord;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:https?://|www\.)\S+").unwrap());
static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[~[^\]]+\]").unwrap());
static NON_ALNUM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const NO_DESCRIPTION: &str = "No Description";

/// An issue reduced to what extraction needs.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanedIssue {
    /// `None` when the record has no identity; the dedup gate skips those.
    pub source_key: Option<String>,
    pub customer_id: Option<String>,
    pub text: String,
}

/// Description followed by numbered comments, with user mentions masked.
pub fn full_description(record: &RawIssueRecord) -> String {
    let body = record
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(NO_DESCRIPTION);

    let mut text = String::from(body);
    if !record.comments.is_empty() {
        text.push_str("\nComments:");
        for (idx, comment) in record.comments.iter().enumerate() {
            let masked = MENTION_RE.replace_all(&comment.body, "[email]");
            text.push_str(&format!("\nComment {}: {}", idx + 1, masked));
        }
    }
    text.replace("\r\n", "\n")
}

/// Lowercase, strip URLs and punctuation, collapse whitespace.
/// Returns `None` when nothing is left.
pub fn clean_text(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let without_urls = URL_RE.replace_all(&lower, " ");
    let alnum = NON_ALNUM_RE.replace_all(&without_urls, "");
    let collapsed = WHITESPACE_RE.replace_all(&alnum, " ");
    let cleaned = collapsed.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

/// Clean a batch, dropping records whose text cleans to nothing.
pub fn clean_issues(records: &[RawIssueRecord]) -> Vec<CleanedIssue> {
    records
        .iter()
        .filter_map(|record| {
            let Some(text) = clean_text(&full_description(record)) else {
                debug!(key = ?record.key, "Dropping issue with empty text after cleaning");
                return None;
            };
            Some(CleanedIssue {
                source_key: record.identity().map(str::to_string),
                customer_id: record.customer_id.clone(),
                text,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use issuelens_common::IssueComment;

    fn record(description: Option<&str>, comments: &[&str]) -> RawIssueRecord {
        let mut record: RawIssueRecord = serde_json::from_str(r#"{"key": "SUP-1"}"#).unwrap();
        record.description = description.map(str::to_string);
        record.comments = comments
            .iter()
            .map(|body| IssueComment {
                author: None,
                body: body.to_string(),
                created: None,
            })
            .collect();
        record
    }

    #[test]
    fn clean_text_normalises() {
        assert_eq!(
            clean_text("Login FAILS!!  see https://status.example.com/x   now").as_deref(),
            Some("login fails see now")
        );
    }

    #[test]
    fn clean_text_empty_is_none() {
        assert_eq!(clean_text("  ?!  www.example.com "), None);
        assert_eq!(clean_text(""), None);
    }

    #[test]
    fn full_description_numbers_comments_and_masks_mentions() {
        let text = full_description(&record(Some("Export hangs"), &["ping [~jdoe]", "same here"]));
        assert_eq!(
            text,
            "Export hangs\nComments:\nComment 1: ping [email]\nComment 2: same here"
        );
    }

    #[test]
    fn missing_description_gets_placeholder() {
        assert_eq!(full_description(&record(None, &[])), "No Description");
        assert_eq!(full_description(&record(Some("  "), &[])), "No Description");
    }

    #[test]
    fn clean_issues_keeps_keyless_records() {
        let mut keyless = record(Some("Crash on save"), &[]);
        keyless.key = None;
        let cleaned = clean_issues(&[keyless, record(Some("Crash on open"), &[])]);
        assert_eq!(cleaned.len(), 2);
        assert_eq!(cleaned[0].source_key, None);
        assert_eq!(cleaned[1].source_key.as_deref(), Some("SUP-1"));
        assert_eq!(cleaned[1].text, "crash on open");
    }
}
