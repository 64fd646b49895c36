//! Nearest-neighbour lookup of prior issue texts, used as few-shot context.
//!
//! Rebuilt from the current corpus on every extraction run; nothing is
//! persisted between runs.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::debug;

use issuelens_common::{cosine_similarity, TextEmbedder};

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarCase {
    pub text: String,
    pub similarity: f64,
}

pub struct SimilarityRetriever {
    embedder: Arc<dyn TextEmbedder>,
    documents: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl SimilarityRetriever {
    /// Embed `documents` in one batch. An empty corpus makes no embedding call.
    pub async fn build(embedder: Arc<dyn TextEmbedder>, documents: Vec<String>) -> Result<Self> {
        let embeddings = if documents.is_empty() {
            Vec::new()
        } else {
            embedder.embed_batch(documents.clone()).await?
        };
        if embeddings.len() != documents.len() {
            bail!(
                "embedding count mismatch: {} documents, {} vectors",
                documents.len(),
                embeddings.len()
            );
        }
        debug!(documents = documents.len(), "Similarity index built");
        Ok(Self {
            embedder,
            documents,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Up to `k` corpus texts most similar to `query`, best first. Texts
    /// identical to the query are excluded so an issue is never its own example.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<SimilarCase>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(query).await?;
        Ok(self.nearest(query, &query_embedding, k))
    }

    /// Ranking over a precomputed query vector. Ties keep corpus order.
    pub fn nearest(&self, query: &str, query_embedding: &[f32], k: usize) -> Vec<SimilarCase> {
        let mut scored: Vec<(usize, f64)> = self
            .embeddings
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.documents[*idx] != query)
            .map(|(idx, emb)| (idx, cosine_similarity(query_embedding, emb)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
            .into_iter()
            .take(k)
            .map(|(idx, similarity)| SimilarCase {
                text: self.documents[idx].clone(),
                similarity,
            })
            .collect()
    }
}

/// Numbered block for the extraction prompt's `{{similar_cases}}` slot.
pub fn format_similar_cases(cases: &[SimilarCase]) -> String {
    if cases.is_empty() {
        return "None available.".to_string();
    }
    cases
        .iter()
        .enumerate()
        .map(|(idx, case)| format!("{}. {}", idx + 1, case.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, HashEmbedder, KeywordEmbedder};

    fn embedder() -> Arc<dyn TextEmbedder> {
        Arc::new(KeywordEmbedder::new(["login", "billing", "export"]))
    }

    #[tokio::test]
    async fn empty_corpus_returns_nothing_without_embedding() {
        let retriever = SimilarityRetriever::build(Arc::new(FailingEmbedder), vec![])
            .await
            .unwrap();
        assert!(retriever.retrieve("login broken", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ranks_by_similarity_and_caps_at_k() {
        let corpus = vec![
            "billing totals wrong".to_string(),
            "login fails after reset".to_string(),
            "export login timeout".to_string(),
            "export csv empty".to_string(),
        ];
        let retriever = SimilarityRetriever::build(embedder(), corpus).await.unwrap();

        let cases = retriever.retrieve("cannot login", 2).await.unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].text, "login fails after reset");
        assert_eq!(cases[1].text, "export login timeout");
        assert!(cases[0].similarity >= cases[1].similarity);
    }

    #[tokio::test]
    async fn small_corpus_returns_fewer_than_k() {
        let retriever = SimilarityRetriever::build(embedder(), vec!["billing issue".into()])
            .await
            .unwrap();
        assert_eq!(retriever.retrieve("login", 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_text_is_not_its_own_example() {
        let corpus = vec!["login fails".to_string(), "login slow".to_string()];
        let retriever = SimilarityRetriever::build(embedder(), corpus).await.unwrap();
        let cases = retriever.retrieve("login fails", 3).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].text, "login slow");
    }

    #[tokio::test]
    async fn shared_words_outrank_unrelated_text() {
        let corpus = vec![
            "password reset email missing".to_string(),
            "printer jam in tray two".to_string(),
        ];
        let retriever = SimilarityRetriever::build(Arc::new(HashEmbedder::default()), corpus)
            .await
            .unwrap();

        let cases = retriever.retrieve("printer jam tray", 2).await.unwrap();
        assert_eq!(cases[0].text, "printer jam in tray two");
    }

    #[test]
    fn formats_cases_as_numbered_list() {
        let cases = vec![
            SimilarCase { text: "a".into(), similarity: 0.9 },
            SimilarCase { text: "b".into(), similarity: 0.5 },
        ];
        assert_eq!(format_similar_cases(&cases), "1. a\n2. b");
        assert_eq!(format_similar_cases(&[]), "None available.");
    }
}
