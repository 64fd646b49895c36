pub mod config;
pub mod embedding;
pub mod error;
pub mod prompts;
pub mod taxonomy;
pub mod types;

pub use config::{AnalysisSettings, Config};
pub use embedding::{cosine_similarity, euclidean_distance, TextEmbedder};
pub use error::IssueLensError;
pub use prompts::{render_template, PromptSet};
pub use taxonomy::{Taxonomy, TaxonomyEntry};
pub use types::*;
