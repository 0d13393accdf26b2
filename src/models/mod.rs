// src/models/mod.rs

//! Domain models for the locator engine and crawl sessions.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod confidence;
mod evidence;
mod job;
mod locator;
mod session;

// Re-export all public types
pub use confidence::{ConfidenceReport, ScoreWeights};
pub use config::{
    Config, CrawlerConfig, ExtractionConfig, FusionConfig, PaginationConfig, SessionConfig,
    StorageConfig, ValidationConfig,
};
pub use evidence::{Candidate, CandidateSet, ElementBox, EvidenceSource, SemanticEvidence};
pub use job::{JobRecord, RawJob, derive_skills, normalize_whitespace, parse_date, validate_link};
pub use locator::{Field, LocatorSet};
pub use session::{
    CrawlOptions, CrawlSession, ErrorKind, ErrorLog, ExportFormat, PageCursor, Progress,
    SessionError, SessionSnapshot, SessionStatus,
};

/// Locators plus their validation result, as returned by page analysis.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnalysisReport {
    pub url: String,
    pub locators: LocatorSet,
    pub confidence: ConfidenceReport,
}
