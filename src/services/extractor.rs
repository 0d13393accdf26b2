//! Candidate extraction from semantic, heuristic and visual evidence.
//!
//! Each source runs independently. A source that finds nothing for a field
//! simply contributes no candidates; extraction itself never fails.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::models::{Candidate, CandidateSet, ElementBox, EvidenceSource, Field, FusionConfig, SemanticEvidence};

/// Structural pattern tried against the document for one field.
enum Pattern {
    /// Elements of `tags` whose class or id matches `attr`
    Attr {
        tags: &'static [&'static str],
        attr: &'static str,
    },
    /// A fixed locator, emitted when it matches
    Literal(&'static str),
}

/// Priority-ordered heuristic table.
const PATTERNS: &[(Field, &[Pattern])] = &[
    (
        Field::JobList,
        &[
            Pattern::Attr {
                tags: &["ul", "ol", "div", "section", "table", "tbody"],
                attr: r"(?i)jobs|job[-_]?list|listings|search[-_]?results?|vacancies|openings",
            },
            Pattern::Attr {
                tags: &["ul", "ol", "div", "section"],
                attr: r"(?i)results|list",
            },
        ],
    ),
    (
        Field::JobItem,
        &[
            Pattern::Attr {
                tags: &["li", "div", "article", "tr"],
                attr: r"(?i)job[-_]?(card|item|row|post|result|tile)|vacancy|posting|listing[-_]?item",
            },
            Pattern::Attr {
                tags: &["li", "div", "article"],
                attr: r"(?i)card|item|result",
            },
            Pattern::Literal("article"),
        ],
    ),
    (
        Field::JobTitle,
        &[
            Pattern::Attr {
                tags: &["h2", "h3", "h4", "a", "span"],
                attr: r"(?i)title|position|role|job[-_]?name",
            },
            Pattern::Literal("h2"),
            Pattern::Literal("h3"),
        ],
    ),
    (
        Field::JobLink,
        &[
            Pattern::Attr {
                tags: &["a"],
                attr: r"(?i)title|link|detail|apply|job",
            },
            Pattern::Literal("h2 a[href]"),
            Pattern::Literal("a[href]"),
        ],
    ),
    (
        Field::CompanyName,
        &[Pattern::Attr {
            tags: &["span", "div", "p", "a", "h4"],
            attr: r"(?i)company|employer|organi[sz]ation|firm",
        }],
    ),
    (
        Field::PublishedAt,
        &[
            Pattern::Literal("time"),
            Pattern::Attr {
                tags: &["span", "div", "p", "time"],
                attr: r"(?i)date|posted|publish|time",
            },
        ],
    ),
    (
        Field::Location,
        &[Pattern::Attr {
            tags: &["span", "div", "p"],
            attr: r"(?i)location|city|place|address|region",
        }],
    ),
    (
        Field::JobDescription,
        &[Pattern::Attr {
            tags: &["p", "div", "span"],
            attr: r"(?i)desc|summary|snippet|excerpt|teaser",
        }],
    ),
    (
        Field::NextPage,
        &[
            Pattern::Literal(r#"a[rel="next"]"#),
            Pattern::Attr {
                tags: &["a", "button", "li"],
                attr: r"(?i)next",
            },
        ],
    ),
];

const TOP_SCORE: f64 = 0.9;
const SCORE_STEP: f64 = 0.1;
const SCORE_FLOOR: f64 = 0.3;

fn css_ident() -> Option<&'static Regex> {
    static IDENT: OnceLock<Option<Regex>> = OnceLock::new();
    IDENT
        .get_or_init(|| Regex::new(r"^[A-Za-z_-][A-Za-z0-9_-]*$").ok())
        .as_ref()
}

/// Compiled form of an attribute pattern from the table.
fn attr_regex(attr: &str) -> Option<&'static Regex> {
    static COMPILED: OnceLock<HashMap<&'static str, Regex>> = OnceLock::new();
    COMPILED
        .get_or_init(|| {
            PATTERNS
                .iter()
                .flat_map(|(_, patterns)| patterns.iter())
                .filter_map(|pattern| match pattern {
                    Pattern::Attr { attr, .. } => Regex::new(attr).ok().map(|re| (*attr, re)),
                    Pattern::Literal(_) => None,
                })
                .collect()
        })
        .get(attr)
}

/// Produces candidates for every field from the available evidence.
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    min_visual_repeats: usize,
    stride_tolerance: f64,
}

impl CandidateExtractor {
    pub fn new(config: &FusionConfig) -> Self {
        Self {
            min_visual_repeats: config.min_visual_repeats.max(2),
            stride_tolerance: config.stride_tolerance.max(0.0),
        }
    }

    /// Run all three sources.
    pub fn extract(
        &self,
        document: &Html,
        semantic: Option<&SemanticEvidence>,
        boxes: &[ElementBox],
    ) -> CandidateSet {
        let mut candidates = CandidateSet::default();
        if let Some(evidence) = semantic {
            candidates.extend(Self::semantic(evidence));
        }
        candidates.extend(Self::heuristic(document));
        candidates.extend(self.visual(boxes));
        log::debug!("Extracted {} candidates", candidates.len());
        candidates
    }

    /// Model-proposed locators, discounted by rank within their field.
    pub fn semantic(evidence: &SemanticEvidence) -> Vec<Candidate> {
        evidence
            .locators
            .iter()
            .flat_map(|(field, locators)| {
                locators
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .enumerate()
                    .map(move |(rank, locator)| {
                        let score = evidence.confidence * (1.0 - SCORE_STEP * rank as f64);
                        Candidate::new(EvidenceSource::Semantic, *field, locator, score)
                    })
            })
            .collect()
    }

    /// Candidates from the fixed pattern table, one per element type.
    pub fn heuristic(document: &Html) -> Vec<Candidate> {
        let mut out = Vec::new();
        for (field, patterns) in PATTERNS {
            let mut seen = HashSet::new();
            let mut locators = Vec::new();
            for pattern in *patterns {
                for locator in Self::apply_pattern(document, pattern) {
                    if seen.insert(locator.clone()) {
                        locators.push(locator);
                    }
                }
            }
            out.extend(locators.into_iter().enumerate().map(|(rank, locator)| {
                let score = (TOP_SCORE - SCORE_STEP * rank as f64).max(SCORE_FLOOR);
                Candidate::new(EvidenceSource::Heuristic, *field, locator, score)
            }));
        }
        out
    }

    fn apply_pattern(document: &Html, pattern: &Pattern) -> Vec<String> {
        match pattern {
            Pattern::Literal(locator) => Selector::parse(locator)
                .ok()
                .filter(|s| document.select(s).next().is_some())
                .map(|_| vec![locator.to_string()])
                .unwrap_or_default(),
            Pattern::Attr { tags, attr } => {
                let Some(attr_re) = attr_regex(attr) else {
                    return Vec::new();
                };
                tags.iter()
                    .filter_map(|tag| Self::first_attr_match(document, tag, attr_re))
                    .collect()
            }
        }
    }

    /// `tag.class` or `tag#id` of the first `tag` element whose attribute matches.
    fn first_attr_match(document: &Html, tag: &str, attr_re: &Regex) -> Option<String> {
        let selector = Selector::parse(tag).ok()?;
        let ident = css_ident()?;
        document.select(&selector).find_map(|element| {
            let class = element
                .value()
                .classes()
                .find(|c| attr_re.is_match(c) && ident.is_match(c))
                .map(|c| format!("{tag}.{c}"));
            class.or_else(|| {
                element
                    .value()
                    .id()
                    .filter(|id| attr_re.is_match(id) && ident.is_match(id))
                    .map(|id| format!("{tag}#{id}"))
            })
        })
    }

    /// Repeated boxes at a near-constant vertical stride.
    pub fn visual(&self, boxes: &[ElementBox]) -> Vec<Candidate> {
        let mut groups: BTreeMap<&str, Vec<&ElementBox>> = BTreeMap::new();
        for b in boxes.iter().filter(|b| b.height > 0.0) {
            groups.entry(b.locator.as_str()).or_default().push(b);
        }

        let mut out = Vec::new();
        for (locator, mut group) in groups {
            group.sort_by(|a, b| a.y.total_cmp(&b.y));
            let Some((start, len, regularity)) = self.longest_run(&group) else {
                continue;
            };
            if len < self.min_visual_repeats {
                continue;
            }
            let score = regularity * (len as f64 / 5.0).min(1.0);
            out.push(Candidate::new(EvidenceSource::Visual, Field::JobItem, locator, score));
            if let Some(parent) = group[start].parent.as_deref().filter(|p| !p.trim().is_empty()) {
                out.push(Candidate::new(EvidenceSource::Visual, Field::JobList, parent, score));
            }
        }
        out
    }

    /// Start, length and regularity of the longest evenly spaced run.
    fn longest_run(&self, group: &[&ElementBox]) -> Option<(usize, usize, f64)> {
        let mut best: Option<(usize, usize, f64)> = None;
        for start in 0..group.len().saturating_sub(1) {
            let stride = group[start + 1].y - group[start].y;
            let height = group[start].height;
            if stride <= 0.0 {
                continue;
            }

            let mut end = start + 1;
            let mut deviation = 0.0;
            while end < group.len() {
                let step = group[end].y - group[end - 1].y;
                let stride_dev = (step - stride).abs() / stride;
                let height_dev = (group[end].height - height).abs() / height;
                if stride_dev > self.stride_tolerance || height_dev > self.stride_tolerance {
                    break;
                }
                deviation += stride_dev;
                end += 1;
            }

            let len = end - start;
            let regularity = (1.0 - deviation / (len - 1) as f64).clamp(0.0, 1.0);
            if best.is_none_or(|(_, l, _)| len > l) {
                best = Some((start, len, regularity));
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FusionConfig {
        FusionConfig::default()
    }

    fn listing() -> Html {
        Html::parse_document(
            r#"<html><body>
            <div class="jobs">
              <div class="job-card"><h2 class="job-title"><a href="/j/1">Rust Dev</a></h2>
                <span class="company">Acme</span><time>2024-05-01</time></div>
              <div class="job-card"><h2 class="job-title"><a href="/j/2">Go Dev</a></h2>
                <span class="company">Beta</span><time>2024-05-02</time></div>
            </div>
            <a rel="next" class="next" href="?page=2">Next</a>
            </body></html>"#,
        )
    }

    fn boxed(locator: &str, y: f64, height: f64) -> ElementBox {
        ElementBox {
            locator: locator.into(),
            parent: Some("div.jobs".into()),
            x: 0.0,
            y,
            width: 600.0,
            height,
        }
    }

    #[test]
    fn test_attr_patterns_are_compiled_once() {
        for (field, patterns) in PATTERNS {
            for pattern in *patterns {
                if let Pattern::Attr { attr, .. } = pattern {
                    let first = attr_regex(attr).unwrap_or_else(|| panic!("{field}: bad pattern"));
                    assert!(std::ptr::eq(first, attr_regex(attr).unwrap()));
                }
            }
        }
        assert!(attr_regex("(?i)not-in-table").is_none());
    }

    #[test]
    fn test_semantic_scores_decay_by_rank() {
        let mut evidence = SemanticEvidence {
            confidence: 0.8,
            ..Default::default()
        };
        evidence
            .locators
            .insert(Field::JobItem, vec![".job-card".into(), " ".into(), "li".into()]);

        let candidates = CandidateExtractor::semantic(&evidence);
        assert_eq!(candidates.len(), 2);
        assert!((candidates[0].raw_score - 0.8).abs() < 1e-9);
        assert!((candidates[1].raw_score - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_emits_one_candidate_per_element_type() {
        let candidates = CandidateExtractor::heuristic(&listing());
        let items: Vec<_> = candidates
            .iter()
            .filter(|c| c.field == Field::JobItem)
            .map(|c| c.locator.as_str())
            .collect();
        assert_eq!(items, vec!["div.job-card"]);

        let list = candidates.iter().find(|c| c.field == Field::JobList).unwrap();
        assert_eq!(list.locator, "div.jobs");
        assert!((list.raw_score - TOP_SCORE).abs() < 1e-9);

        assert!(
            candidates
                .iter()
                .any(|c| c.field == Field::NextPage && c.locator == r#"a[rel="next"]"#)
        );
    }

    #[test]
    fn test_heuristic_output_is_bounded_by_patterns() {
        let many: String = (0..500)
            .map(|i| format!(r#"<div class="job-card"><h2>Job {i}</h2></div>"#))
            .collect();
        let doc = Html::parse_document(&format!(r#"<div class="jobs">{many}</div>"#));
        let candidates = CandidateExtractor::heuristic(&doc);
        assert!(candidates.len() < 20);
    }

    #[test]
    fn test_visual_requires_repeats() {
        let extractor = CandidateExtractor::new(&config());
        let two = vec![boxed("div.job-card", 0.0, 80.0), boxed("div.job-card", 100.0, 80.0)];
        assert!(extractor.visual(&two).is_empty());

        let four: Vec<_> = (0..4)
            .map(|i| boxed("div.job-card", i as f64 * 100.0, 80.0))
            .collect();
        let candidates = extractor.visual(&four);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].field, Field::JobItem);
        assert!((candidates[0].raw_score - 0.8).abs() < 1e-9);
        assert_eq!(candidates[1].field, Field::JobList);
        assert_eq!(candidates[1].locator, "div.jobs");
    }

    #[test]
    fn test_visual_breaks_run_on_irregular_stride() {
        let extractor = CandidateExtractor::new(&config());
        let ys = [0.0, 100.0, 400.0, 500.0];
        let boxes: Vec<_> = ys.iter().map(|y| boxed("li.row", *y, 80.0)).collect();
        assert!(extractor.visual(&boxes).is_empty());
    }
}
