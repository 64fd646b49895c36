use thiserror::Error;

#[derive(Error, Debug)]
pub enum IssueLensError {
    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Clustering error: {0}")]
    Clustering(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
