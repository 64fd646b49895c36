pub mod bootstrap;
pub mod clustering;
pub mod dedup;
pub mod extraction;
pub mod infra;
pub mod jobs;
pub mod pipeline;
pub mod preprocess;
pub mod retriever;
pub mod service;
pub mod store;
pub mod summarizer;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use jobs::{JobOrchestrator, JobRecord, JobStatus};
pub use pipeline::{PipelineDeps, ProblemPipeline, RunStats};
pub use service::{Accepted, ProcessService, StatusQuery, SubmitError};
