//! Persistence backends. Both implement ProblemStore, IssueSource and ReportSink.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;
