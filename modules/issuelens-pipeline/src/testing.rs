// Test doubles for the pipeline's trait seams.
//
// - ScriptedGenerator (TextGenerator): needle→response rules, records prompts
// - KeywordEmbedder (TextEmbedder): one axis per keyword, counts occurrences
// - HashEmbedder (TextEmbedder): deterministic bag-of-words hashing
// - FailingEmbedder (TextEmbedder): always errors
//
// Plus fixture builders for raw issues and problem records. Storage is
// covered by InMemoryStore, no separate mock needed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use issuelens_common::{ProblemRecord, RawIssueRecord, Severity, TextEmbedder};

use crate::traits::TextGenerator;

/// Project id used by fixtures.
pub const TEST_PROJECT: &str = "proj";

/// Embedding dimension of `HashEmbedder`.
pub const TEST_EMBEDDING_DIM: usize = 64;

// ---------------------------------------------------------------------------
// ScriptedGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Generator answering from a script. The first rule whose needle occurs in
/// the prompt wins; otherwise the default reply is used.
pub struct ScriptedGenerator {
    rules: Vec<(String, Reply)>,
    default: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn with_default(response: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default: Reply::Text(response.into()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails unless a rule matches.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            default: Reply::Fail(message.into()),
            ..Self::with_default("")
        }
    }

    pub fn respond_when(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(response.into())));
        self
    }

    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.default);
        match reply {
            Reply::Text(text) => Ok(text.clone()),
            Reply::Fail(message) => bail!("{message}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Embedders
// ---------------------------------------------------------------------------

/// One dimension per keyword holding its occurrence count in the lowercased
/// text. Texts sharing keywords are close; texts sharing none are orthogonal.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        self.keywords
            .iter()
            .map(|k| lower.matches(k.as_str()).count() as f32)
            .collect()
    }
}

#[async_trait]
impl TextEmbedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Bag-of-words vectors with words hashed (FNV-1a) into fixed buckets.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for word in text.split_whitespace() {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in word.to_lowercase().bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(TEST_EMBEDDING_DIM)
    }
}

#[async_trait]
impl TextEmbedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl TextEmbedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("embedding service unreachable")
    }

    async fn embed_batch(&self, _texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unreachable")
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Raw issue in `TEST_PROJECT` with an empty source filter.
pub fn raw_issue(key: &str, description: &str) -> RawIssueRecord {
    RawIssueRecord {
        key: Some(key.to_string()),
        summary: None,
        description: Some(description.to_string()),
        status: Some("Open".to_string()),
        created_date: None,
        updated_date: None,
        labels: Vec::new(),
        customer_id: None,
        comments: Vec::new(),
        source_filter: String::new(),
        project_id: TEST_PROJECT.to_string(),
    }
}

/// Persisted problem in `TEST_PROJECT`, version v1, empty source filter.
pub fn problem(source_key: &str, description: &str, problem_type: &str) -> ProblemRecord {
    ProblemRecord {
        description: description.to_string(),
        severity: Severity::Low,
        impact: "unspecified".to_string(),
        problem_type: problem_type.to_string(),
        version: "v1".to_string(),
        customer_id: None,
        source_key: source_key.to_string(),
        source_filter: String::new(),
        project_id: TEST_PROJECT.to_string(),
    }
}

/// Model reply reporting one problem as a JSON object.
pub fn problem_json(description: &str, severity: &str, impact: &str) -> String {
    serde_json::json!({
        "Problem": description,
        "Severity": severity,
        "Impact": impact,
    })
    .to_string()
}
