//! Service layer for the locator engine.
//!
//! This module contains the business logic for:
//! - Evidence inference (`EvidenceProvider`)
//! - Candidate extraction (`CandidateExtractor`)
//! - Locator fusion (`LocatorFuser`)
//! - Record extraction (`JobExtractor`)
//! - Validation (`Validator`)
//! - Pagination (`PaginationController`)

mod evidence;
mod extractor;
mod fusion;
mod pagination;
mod records;
mod validator;

pub use evidence::{EvidenceProvider, NoEvidence, StaticEvidence};
pub use extractor::CandidateExtractor;
pub use fusion::{FusionOutcome, LocatorFuser, SourceWeights};
pub use pagination::{
    PaginationController, PaginationOutcome, PaginationState, Strategy, discover_targets,
};
pub use records::{JobExtractor, PageExtraction, match_count};
pub use validator::Validator;
