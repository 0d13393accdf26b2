//! Pipeline entry points.
//!
//! - `Analyzer`: infer a locator set for a URL and score it
//! - `SessionRunner`: drive one crawl session to a terminal state
//! - `SessionManager`: run sessions concurrently and answer status queries

pub mod analyze;
pub mod export;
pub mod manager;
pub mod retry;
pub mod session;

pub use analyze::{AnalysisOptions, Analyzer};
pub use export::{ExportArtifact, ExportRow};
pub use manager::SessionManager;
pub use retry::{Attempt, RetryPolicy};
pub use session::SessionRunner;
