// src/models/evidence.rs

//! Evidence and candidate types consumed by the fuser.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::Field;

/// Where a candidate locator came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Semantic,
    Heuristic,
    Visual,
}

/// One proposed locator for one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source: EvidenceSource,
    pub field: Field,
    pub locator: String,
    /// Source-local score in [0, 1]
    pub raw_score: f64,
}

impl Candidate {
    pub fn new(source: EvidenceSource, field: Field, locator: impl Into<String>, raw_score: f64) -> Self {
        Self {
            source,
            field,
            locator: locator.into(),
            raw_score: raw_score.clamp(0.0, 1.0),
        }
    }
}

/// Ordered candidates per field for one inference pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    by_field: BTreeMap<Field, Vec<Candidate>>,
}

impl CandidateSet {
    pub fn push(&mut self, candidate: Candidate) {
        self.by_field.entry(candidate.field).or_default().push(candidate);
    }

    pub fn extend(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    pub fn for_field(&self, field: Field) -> &[Candidate] {
        self.by_field.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop every candidate of `source` for `field`.
    pub fn without(&self, field: Field, source: EvidenceSource) -> Self {
        let mut out = self.clone();
        if let Some(list) = out.by_field.get_mut(&field) {
            list.retain(|c| c.source != source);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.by_field.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locators proposed by the vision-capable model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticEvidence {
    #[serde(default)]
    pub locators: BTreeMap<Field, Vec<String>>,

    /// Model-reported confidence in [0, 1]
    #[serde(default)]
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl SemanticEvidence {
    pub fn is_empty(&self) -> bool {
        self.locators.values().all(Vec::is_empty)
    }
}

/// Rendered bounding box of one element, tagged with its structural signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    pub locator: String,

    /// Signature of the containing element, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}
