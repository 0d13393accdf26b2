//! Semantic evidence providers.
//!
//! The vision-capable model is an external collaborator; this module only
//! defines its contract and two local providers.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::SemanticEvidence;

/// Infers field locators from a document and a screenshot.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn infer(&self, html: &str, screenshot: &[u8]) -> Result<SemanticEvidence>;
}

/// Provider used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

#[async_trait]
impl EvidenceProvider for NoEvidence {
    async fn infer(&self, _html: &str, _screenshot: &[u8]) -> Result<SemanticEvidence> {
        Err(AppError::EvidenceUnavailable(
            "no semantic evidence provider configured".to_string(),
        ))
    }
}

/// Replays previously recorded model output.
#[derive(Debug, Clone, Default)]
pub struct StaticEvidence {
    evidence: SemanticEvidence,
}

impl StaticEvidence {
    pub fn new(evidence: SemanticEvidence) -> Self {
        Self { evidence }
    }

    /// Load recorded evidence from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let evidence: SemanticEvidence = serde_json::from_str(&content)?;
        Ok(Self::new(evidence))
    }
}

#[async_trait]
impl EvidenceProvider for StaticEvidence {
    async fn infer(&self, _html: &str, _screenshot: &[u8]) -> Result<SemanticEvidence> {
        if self.evidence.is_empty() {
            return Err(AppError::EvidenceUnavailable(
                "recorded evidence has no locators".to_string(),
            ));
        }
        Ok(self.evidence.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::models::Field;

    #[tokio::test]
    async fn test_no_evidence_is_unavailable() {
        let err = NoEvidence.infer("<html></html>", &[]).await.unwrap_err();
        assert!(matches!(err, AppError::EvidenceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_static_evidence_loads_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"locators": {{"jobItem": [".job-card"], "jobTitle": ["h2 a", "h2"]}}, "confidence": 0.8}}"#
        )
        .unwrap();

        let provider = StaticEvidence::load(file.path()).unwrap();
        let evidence = provider.infer("", &[]).await.unwrap();
        assert_eq!(evidence.confidence, 0.8);
        assert_eq!(evidence.locators[&Field::JobTitle], vec!["h2 a", "h2"]);
    }
}
