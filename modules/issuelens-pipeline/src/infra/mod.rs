pub mod embedder;
pub mod generator;

pub use embedder::Embedder;
pub use generator::LlmGenerator;
