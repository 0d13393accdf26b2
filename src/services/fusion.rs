//! Locator scoring and fusion.
//!
//! Combines the candidates of each field into a single locator using a
//! weighted vote over evidence sources. Fusion is a pure function of its
//! inputs: the same candidates and document always give the same result.

use std::collections::BTreeMap;

use scraper::{Html, Selector};

use crate::models::{CandidateSet, EvidenceSource, Field, FusionConfig, LocatorSet};

const EPSILON: f64 = 1e-9;

/// Vote weight of each evidence source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceWeights {
    pub semantic: f64,
    pub heuristic: f64,
    pub visual: f64,
}

impl SourceWeights {
    fn weight(&self, source: EvidenceSource) -> f64 {
        match source {
            EvidenceSource::Semantic => self.semantic,
            EvidenceSource::Heuristic => self.heuristic,
            EvidenceSource::Visual => self.visual,
        }
    }

    /// Sources that vote on `field`; visual evidence only describes list shapes.
    fn applies(field: Field, source: EvidenceSource) -> bool {
        source != EvidenceSource::Visual || field.is_structural()
    }
}

impl From<&FusionConfig> for SourceWeights {
    fn from(config: &FusionConfig) -> Self {
        Self {
            semantic: config.semantic_weight.max(0.0),
            heuristic: config.heuristic_weight.max(0.0),
            visual: config.visual_weight.max(0.0),
        }
    }
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self::from(&FusionConfig::default())
    }
}

/// Chosen locators and the winning score of each field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FusionOutcome {
    pub locators: LocatorSet,
    pub field_confidence: BTreeMap<Field, f64>,
}

impl FusionOutcome {
    /// Mean confidence over the fields that resolved.
    pub fn mean_confidence(&self) -> f64 {
        if self.field_confidence.is_empty() {
            return 0.0;
        }
        self.field_confidence.values().sum::<f64>() / self.field_confidence.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct LocatorFuser {
    weights: SourceWeights,
}

impl LocatorFuser {
    pub fn new(weights: SourceWeights) -> Self {
        Self { weights }
    }

    pub fn fuse(&self, candidates: &CandidateSet, document: &Html) -> FusionOutcome {
        let mut outcome = FusionOutcome::default();
        let mut matches: BTreeMap<String, bool> = BTreeMap::new();

        for field in Field::ALL {
            let sources = [
                EvidenceSource::Semantic,
                EvidenceSource::Heuristic,
                EvidenceSource::Visual,
            ];
            let total: f64 = sources
                .iter()
                .filter(|s| SourceWeights::applies(field, **s))
                .map(|s| self.weights.weight(*s))
                .sum();
            if total <= 0.0 {
                continue;
            }

            // Best raw score per source for each locator.
            let mut votes: BTreeMap<&str, [f64; 3]> = BTreeMap::new();
            for candidate in candidates.for_field(field) {
                if !SourceWeights::applies(field, candidate.source) {
                    continue;
                }
                let resolves = *matches
                    .entry(candidate.locator.clone())
                    .or_insert_with(|| matches_any(document, &candidate.locator));
                if !resolves {
                    continue;
                }
                let slot = &mut votes.entry(candidate.locator.as_str()).or_default()
                    [candidate.source as usize];
                *slot = slot.max(candidate.raw_score);
            }

            let winner = votes
                .into_iter()
                .map(|(locator, best)| {
                    let score: f64 = sources
                        .iter()
                        .zip(best)
                        .map(|(source, raw)| self.weights.weight(*source) * raw)
                        .sum::<f64>()
                        / total;
                    (locator, score.clamp(0.0, 1.0))
                })
                .fold(None::<(&str, f64)>, |best, (locator, score)| match best {
                    Some((held, held_score)) if !beats(locator, score, held, held_score) => {
                        Some((held, held_score))
                    }
                    _ => Some((locator, score)),
                });

            if let Some((locator, score)) = winner.filter(|(_, s)| *s > 0.0) {
                log::debug!("Fused {field} -> '{locator}' ({score:.3})");
                outcome.locators.set(field, locator);
                outcome.field_confidence.insert(field, score);
            }
        }
        outcome
    }
}

impl Default for LocatorFuser {
    fn default() -> Self {
        Self::new(SourceWeights::default())
    }
}

/// Higher score wins; near-ties go to the shorter, then lexically smaller locator.
fn beats(locator: &str, score: f64, held: &str, held_score: f64) -> bool {
    if (score - held_score).abs() > EPSILON {
        return score > held_score;
    }
    (locator.len(), locator) < (held.len(), held)
}

fn matches_any(document: &Html, locator: &str) -> bool {
    Selector::parse(locator)
        .map(|s| document.select(&s).next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Candidate;

    fn document() -> Html {
        Html::parse_document(
            r#"<ul class="jobs">
                 <li class="job-card"><h2 class="title">A</h2></li>
                 <li class="job-card"><h2 class="title">B</h2></li>
               </ul>"#,
        )
    }

    fn candidates() -> CandidateSet {
        let mut set = CandidateSet::default();
        set.extend([
            Candidate::new(EvidenceSource::Semantic, Field::JobItem, "ul.jobs > li", 0.8),
            Candidate::new(EvidenceSource::Heuristic, Field::JobItem, "li.job-card", 0.9),
            Candidate::new(EvidenceSource::Visual, Field::JobItem, "li.job-card", 0.8),
            Candidate::new(EvidenceSource::Semantic, Field::JobList, "ul.jobs", 0.9),
            Candidate::new(EvidenceSource::Heuristic, Field::JobList, "div.missing", 0.9),
            Candidate::new(EvidenceSource::Semantic, Field::JobTitle, "h2.title", 0.8),
            Candidate::new(EvidenceSource::Visual, Field::JobTitle, "h2", 1.0),
        ]);
        set
    }

    #[test]
    fn test_fusion_is_deterministic() {
        let fuser = LocatorFuser::default();
        let doc = document();
        let first = fuser.fuse(&candidates(), &doc);
        for _ in 0..5 {
            assert_eq!(fuser.fuse(&candidates(), &doc), first);
        }
    }

    #[test]
    fn test_non_matching_locator_cannot_win() {
        let outcome = LocatorFuser::default().fuse(&candidates(), &document());
        assert_eq!(outcome.locators.get(Field::JobList), Some("ul.jobs"));
        assert!((outcome.field_confidence[&Field::JobList] - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_and_leaf_redistribution() {
        let outcome = LocatorFuser::default().fuse(&candidates(), &document());
        // 0.3 * 0.9 + 0.2 * 0.8 beats 0.5 * 0.8
        assert_eq!(outcome.locators.get(Field::JobItem), Some("li.job-card"));
        assert!((outcome.field_confidence[&Field::JobItem] - 0.43).abs() < 1e-9);
        // Visual votes are ignored for leaf fields; semantic gets 0.5 / 0.8
        assert_eq!(outcome.locators.get(Field::JobTitle), Some("h2.title"));
        assert!((outcome.field_confidence[&Field::JobTitle] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_ties_prefer_shorter_then_lexical() {
        let mut set = CandidateSet::default();
        set.extend([
            Candidate::new(EvidenceSource::Heuristic, Field::JobTitle, "li h2.title", 0.7),
            Candidate::new(EvidenceSource::Heuristic, Field::JobTitle, "h2.title", 0.7),
            Candidate::new(EvidenceSource::Heuristic, Field::JobTitle, "h2", 0.7),
        ]);
        let outcome = LocatorFuser::default().fuse(&set, &document());
        assert_eq!(outcome.locators.get(Field::JobTitle), Some("h2"));
    }

    #[test]
    fn test_removing_strong_source_never_raises_confidence() {
        let fuser = LocatorFuser::default();
        let doc = document();
        let full = fuser.fuse(&candidates(), &doc);
        for field in Field::ALL {
            for source in [
                EvidenceSource::Semantic,
                EvidenceSource::Heuristic,
                EvidenceSource::Visual,
            ] {
                let reduced = fuser.fuse(&candidates().without(field, source), &doc);
                let before = full.field_confidence.get(&field).copied().unwrap_or(0.0);
                let after = reduced.field_confidence.get(&field).copied().unwrap_or(0.0);
                assert!(after <= before + 1e-12, "{field} without {source:?}");
            }
        }
    }

    #[test]
    fn test_empty_candidates_give_empty_set() {
        let outcome = LocatorFuser::default().fuse(&CandidateSet::default(), &document());
        assert!(outcome.locators.is_empty());
        assert_eq!(outcome.mean_confidence(), 0.0);
    }
}
