use std::env;
use std::str::FromStr;

use tracing::info;

use crate::error::IssueLensError;

/// Tunables for retrieval and clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSettings {
    /// Upper bound of the cluster-count scan (inclusive, at least 2).
    pub max_clusters: usize,
    /// Maximum centroid distance for a problem to stay in its cluster's aggregate.
    pub outlier_threshold: f64,
    /// Seed for every clustering run, making label assignment reproducible.
    pub seed: u64,
    /// Few-shot cases retrieved per issue.
    pub retrieval_k: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            max_clusters: 10,
            outlier_threshold: 2.0,
            seed: 42,
            retrieval_k: 3,
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<(), IssueLensError> {
        if self.max_clusters < 2 {
            return Err(IssueLensError::Config(format!(
                "MAX_CLUSTERS must be at least 2, got {}",
                self.max_clusters
            )));
        }
        if !(self.outlier_threshold > 0.0) {
            return Err(IssueLensError::Config(format!(
                "OUTLIER_THRESHOLD must be positive, got {}",
                self.outlier_threshold
            )));
        }
        if self.retrieval_k == 0 {
            return Err(IssueLensError::Config("RETRIEVAL_K must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres. `None` runs against the in-memory store.
    pub database_url: Option<String>,

    // Generative model (OpenAI-compatible endpoint)
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,

    // Embeddings
    pub embedding_base_url: String,
    pub embedding_model: String,

    // Pipeline
    pub taxonomy_path: String,
    pub prompt_version: String,
    pub source_filter: String,
    pub analysis: AnalysisSettings,

    // Web server
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, IssueLensError> {
        let defaults = AnalysisSettings::default();
        let llm_base_url = env_or("LLM_BASE_URL", "http://localhost:11434/v1");

        let config = Self {
            database_url: optional_env("DATABASE_URL"),
            embedding_base_url: optional_env("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| llm_base_url.clone()),
            llm_base_url,
            llm_api_key: optional_env("LLM_API_KEY"),
            llm_model: env_or("LLM_MODEL", "llama3.1"),
            embedding_model: env_or("EMBEDDING_MODEL", "nomic-embed-text"),
            taxonomy_path: env_or("TAXONOMY_PATH", "./config/taxonomy.json"),
            prompt_version: env_or("PROMPT_VERSION", "v1"),
            source_filter: env_or("SOURCE_FILTER", ""),
            analysis: AnalysisSettings {
                max_clusters: parsed_env("MAX_CLUSTERS", defaults.max_clusters)?,
                outlier_threshold: parsed_env("OUTLIER_THRESHOLD", defaults.outlier_threshold)?,
                seed: parsed_env("CLUSTER_SEED", defaults.seed)?,
                retrieval_k: parsed_env("RETRIEVAL_K", defaults.retrieval_k)?,
            },
            web_host: env_or("WEB_HOST", "0.0.0.0"),
            web_port: parsed_env("WEB_PORT", 3000)?,
        };

        config.analysis.validate()?;
        Ok(config)
    }

    /// Log the effective configuration with secrets redacted.
    pub fn log_redacted(&self) {
        let database = self
            .database_url
            .as_deref()
            .map(redact_url)
            .unwrap_or_else(|| "in-memory".to_string());
        info!(
            database = database.as_str(),
            llm_base_url = self.llm_base_url.as_str(),
            llm_model = self.llm_model.as_str(),
            llm_api_key = if self.llm_api_key.is_some() { "set" } else { "unset" },
            embedding_base_url = self.embedding_base_url.as_str(),
            embedding_model = self.embedding_model.as_str(),
            taxonomy_path = self.taxonomy_path.as_str(),
            prompt_version = self.prompt_version.as_str(),
            source_filter = self.source_filter.as_str(),
            max_clusters = self.analysis.max_clusters,
            outlier_threshold = self.analysis.outlier_threshold,
            seed = self.analysis.seed,
            retrieval_k = self.analysis.retrieval_k,
            "Configuration loaded"
        );
    }
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    optional_env(key).unwrap_or_else(|| default.to_string())
}

fn parsed_env<T>(key: &str, default: T) -> Result<T, IssueLensError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| IssueLensError::Config(format!("{key} is invalid ({raw}): {e}"))),
        None => Ok(default),
    }
}

/// Hide the password component of a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let userinfo = &url[scheme_end + 3..at];
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}{}:***{}", &url[..scheme_end + 3], user, &url[at..])
        }
        _ => url.to_string(),
    }
}
