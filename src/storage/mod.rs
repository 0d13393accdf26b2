//! Storage abstractions for session results.
//!
//! ## Directory Structure
//!
//! ```text
//! output/
//! ├── exports/              # Rendered artifacts of completed sessions
//! │   └── <session>.json|csv
//! ├── sessions/             # Final snapshot of every finished session
//! │   └── <session>.json
//! └── locators/             # Locator sets, keyed by fingerprint
//!     └── <fingerprint>.json
//! ```

pub mod local;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AnalysisReport, SessionSnapshot};
use crate::pipeline::ExportArtifact;

// Re-export for convenience
pub use local::LocalStorage;

/// Trait for result storage backends.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist the rendered export of a completed session; returns its location.
    async fn save_export(&self, artifact: &ExportArtifact) -> Result<String>;

    /// Persist the final snapshot of a session.
    async fn save_summary(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Load a previously saved snapshot.
    async fn load_summary(&self, id: Uuid) -> Result<Option<SessionSnapshot>>;

    /// Persist an analyzed locator set; returns its location.
    async fn save_locators(&self, report: &AnalysisReport) -> Result<String>;
}
