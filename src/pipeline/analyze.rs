// src/pipeline/analyze.rs

//! Page analysis: infer a locator set for a listing page and validate it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::driver::{BrowserDriver, DriverError, PageSnapshot, PageSource, Screenshot};
use crate::error::{AppError, Result};
use crate::models::{
    AnalysisReport, Config, ConfidenceReport, ElementBox, Field, LocatorSet, SemanticEvidence,
};
use crate::services::{
    CandidateExtractor, EvidenceProvider, FusionOutcome, JobExtractor, LocatorFuser, SourceWeights,
    Validator,
};

use super::retry::{Attempt, RetryPolicy};

/// Per-call analysis switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Capture a screenshot for visual and semantic evidence
    #[serde(default = "default_true")]
    pub screenshot: bool,

    /// Ask the evidence provider for semantic locators
    #[serde(default = "default_true")]
    pub semantic: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            screenshot: true,
            semantic: true,
        }
    }
}

/// Runs candidate extraction, fusion and validation for one URL.
#[derive(Debug, Clone)]
pub struct Analyzer {
    candidates: CandidateExtractor,
    fuser: LocatorFuser,
    validator: Validator,
    retry: RetryPolicy,
}

impl Analyzer {
    pub fn new(config: &Config) -> Self {
        Self {
            candidates: CandidateExtractor::new(&config.fusion),
            fuser: LocatorFuser::new(SourceWeights::from(&config.fusion)),
            validator: Validator::new(&config.validation, JobExtractor::new(&config.extraction)),
            retry: RetryPolicy::from(&config.crawler),
        }
    }

    /// Infer locators for `url` and attach their validation result.
    ///
    /// Fails with [`AppError::LocatorUnresolvable`] when fusion leaves a
    /// required structural field empty; the error carries the partial set.
    pub async fn analyze(
        &self,
        driver: &mut dyn BrowserDriver,
        evidence: &dyn EvidenceProvider,
        pages: &dyn PageSource,
        url: &str,
        options: &AnalysisOptions,
    ) -> Result<AnalysisReport> {
        log::info!("Analyzing {url}");
        let page = self.load(driver, url).await?;

        let screenshot = if options.screenshot {
            driver.screenshot().await.unwrap_or_else(|e| {
                log::debug!("No screenshot for {url}: {e}");
                Screenshot::default()
            })
        } else {
            Screenshot::default()
        };

        let semantic = if options.semantic {
            match evidence.infer(&page.html, &screenshot.image).await {
                Ok(found) => Some(found),
                Err(e) => {
                    log::warn!("Continuing without semantic evidence: {e}");
                    None
                }
            }
        } else {
            None
        };

        let fused = self.infer(&page, semantic.as_ref(), &screenshot.boxes);
        if let Some(field) = fused.locators.missing_required() {
            log::warn!("Analysis of {url} left {field} unresolved");
            return Err(AppError::LocatorUnresolvable {
                field,
                confidence: fused.mean_confidence(),
                partial: fused.locators,
            });
        }

        let confidence = self
            .validator
            .validate(pages, &page, &fused.locators, &fused.field_confidence)
            .await?;
        Ok(AnalysisReport {
            url: page.url,
            locators: fused.locators,
            confidence,
        })
    }

    /// Validate a known locator set against `url`.
    pub async fn validate(
        &self,
        pages: &dyn PageSource,
        url: &str,
        locators: &LocatorSet,
    ) -> Result<ConfidenceReport> {
        if let Some(field) = locators.missing_required() {
            return Err(AppError::LocatorUnresolvable {
                field,
                partial: locators.clone(),
                confidence: 0.0,
            });
        }
        let page = pages.fetch(url).await.map_err(|e| classify(url, e))?;
        self.validator
            .validate(pages, &page, locators, &BTreeMap::new())
            .await
    }

    async fn load(&self, driver: &mut dyn BrowserDriver, url: &str) -> Result<PageSnapshot> {
        let target = url.to_string();
        let loaded = self
            .retry
            .run(driver, move |d| {
                let target = target.clone();
                Box::pin(async move {
                    d.navigate(&target).await?;
                    d.extract_dom().await
                })
            })
            .await;
        match loaded {
            Attempt::Done(page) => Ok(page),
            Attempt::Exhausted(e) | Attempt::Fatal(e) => Err(classify(url, e)),
        }
    }

    /// Candidate extraction and fusion; synchronous since parsed documents stay on one thread.
    fn infer(
        &self,
        page: &PageSnapshot,
        semantic: Option<&SemanticEvidence>,
        boxes: &[ElementBox],
    ) -> FusionOutcome {
        let document = page.document();
        let candidates = self.candidates.extract(&document, semantic, boxes);
        self.fuser.fuse(&candidates, &document)
    }
}

/// Map a driver failure on `url` to the error taxonomy.
pub(crate) fn classify(url: &str, error: DriverError) -> AppError {
    if error.is_crash() {
        AppError::DriverCrash(error.message)
    } else {
        AppError::navigation(url, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MemorySite;
    use crate::services::{NoEvidence, StaticEvidence};

    const BASE: &str = "https://example.com/jobs";

    fn listing(page: usize, next: bool) -> String {
        let cards: String = (0..5)
            .map(|i| {
                format!(
                    r#"<div class="job-card"><h2 class="job-title"><a href="/j/{page}-{i}">Engineer {i}</a></h2>
                       <span class="company">Acme</span><span class="location">Remote</span>
                       <time>2024-06-0{}</time></div>"#,
                    i + 1
                )
            })
            .collect();
        let next = if next {
            format!(r#"<a rel="next" href="?page={}">Next</a>"#, page + 1)
        } else {
            String::new()
        };
        format!(r#"<html><body><div class="jobs">{cards}</div>{next}</body></html>"#)
    }

    fn site() -> MemorySite {
        let site = MemorySite::new();
        site.add_page(BASE, listing(1, true))
            .add_page(format!("{BASE}?page=2"), listing(2, false));
        site
    }

    #[tokio::test]
    async fn test_heuristics_alone_produce_a_usable_set() {
        let site = site();
        let analyzer = Analyzer::new(&Config::default());
        let mut driver = site.driver();

        let report = analyzer
            .analyze(&mut driver, &NoEvidence, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.locators.get(Field::JobList), Some("div.jobs"));
        assert_eq!(report.locators.get(Field::JobItem), Some("div.job-card"));
        assert_eq!(report.locators.get(Field::NextPage), Some(r#"a[rel="next"]"#));
        assert_eq!(report.confidence.single_page_accuracy(), 1.0);
        assert_eq!(report.confidence.sampled_pages(), 1);
        assert_eq!(report.confidence.multi_page_stability(), 1.0);
    }

    #[tokio::test]
    async fn test_semantic_evidence_outvotes_heuristics() {
        let site = site();
        let mut evidence = SemanticEvidence {
            confidence: 0.9,
            ..Default::default()
        };
        evidence
            .locators
            .insert(Field::JobTitle, vec!["h2.job-title a".into()]);
        let provider = StaticEvidence::new(evidence);

        let report = Analyzer::new(&Config::default())
            .analyze(&mut site.driver(), &provider, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.locators.get(Field::JobTitle), Some("h2.job-title a"));
    }

    #[tokio::test]
    async fn test_unresolvable_page_returns_partial_set() {
        let site = MemorySite::new();
        site.add_page(BASE, "<html><body><p>Nothing here</p></body></html>");

        let err = Analyzer::new(&Config::default())
            .analyze(&mut site.driver(), &NoEvidence, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap_err();
        match err {
            AppError::LocatorUnresolvable { field, partial, .. } => {
                assert_eq!(field, Field::JobList);
                assert!(!partial.is_usable());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_crash_during_load_is_driver_crash() {
        let site = site();
        site.fail_next(BASE, DriverError::crashed("browser gone"));

        let err = Analyzer::new(&Config::default())
            .analyze(&mut site.driver(), &NoEvidence, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DriverCrash(_)));
    }

    #[tokio::test]
    async fn test_validate_known_locators() {
        let site = site();
        let locators = LocatorSet::new()
            .with(Field::JobList, ".jobs")
            .with(Field::JobItem, ".job-card")
            .with(Field::JobTitle, "h2")
            .with(Field::JobLink, "h2 a")
            .with(Field::NextPage, r#"a[rel="next"]"#);

        let report = Analyzer::new(&Config::default())
            .validate(&site, BASE, &locators)
            .await
            .unwrap();
        assert_eq!(report.single_page_accuracy(), 1.0);
        assert_eq!(report.field_score(Field::JobItem), 1.0);
    }

    #[tokio::test]
    async fn test_repeated_layout_outvotes_top_heuristic() {
        let postings: String = (0..5)
            .map(|i| {
                format!(
                    r#"<article><h2 class="job-title"><a href="/j/{i}">Engineer {i}</a></h2>
                       <span class="company">Acme</span></article>"#
                )
            })
            .collect();
        let site = MemorySite::new();
        site.add_page(
            BASE,
            format!(
                r#"<html><body><div class="jobs"><div class="featured-card"><p>Sponsored</p></div>{postings}</div></body></html>"#
            ),
        );
        let analyzer = Analyzer::new(&Config::default());

        let page = site.fetch(BASE).await.unwrap();
        let plain = analyzer.infer(&page, None, &[]);
        assert_eq!(plain.locators.get(Field::JobItem), Some("div.featured-card"));

        let boxes = (0..5)
            .map(|i| ElementBox {
                locator: "article".into(),
                parent: Some("div.jobs".into()),
                x: 0.0,
                y: 100.0 + 120.0 * i as f64,
                width: 600.0,
                height: 100.0,
            })
            .collect();
        site.set_layout(BASE, boxes);

        let report = analyzer
            .analyze(&mut site.driver(), &NoEvidence, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.locators.get(Field::JobItem), Some("article"));
        let item = report.confidence.field_score(Field::JobItem);
        assert!(item > plain.field_confidence[&Field::JobItem]);
        assert!((item - 0.44).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_layout_ignored_without_screenshot() {
        let site = site();
        let boxes = (0..5)
            .map(|i| ElementBox {
                locator: "div.job-card".into(),
                parent: None,
                x: 0.0,
                y: 80.0 * i as f64,
                width: 400.0,
                height: 60.0,
            })
            .collect();
        site.set_layout(BASE, boxes);
        let analyzer = Analyzer::new(&Config::default());

        let with = analyzer
            .analyze(&mut site.driver(), &NoEvidence, &site, BASE, &AnalysisOptions::default())
            .await
            .unwrap();
        let without = analyzer
            .analyze(
                &mut site.driver(),
                &NoEvidence,
                &site,
                BASE,
                &AnalysisOptions {
                    screenshot: false,
                    semantic: false,
                },
            )
            .await
            .unwrap();
        assert!(
            with.confidence.field_score(Field::JobItem)
                > without.confidence.field_score(Field::JobItem)
        );
    }
}
