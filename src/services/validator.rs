//! Locator validation against live pages.
//!
//! Computes the three composite metrics of a [`ConfidenceReport`]:
//! single-page accuracy on the analyzed page, stability across sampled
//! later pages, and completeness of the records extracted along the way.
//! Sample fetch failures lower stability; they never abort validation.

use std::collections::{BTreeMap, HashSet};

use futures::stream::{self, StreamExt};
use url::Url;

use crate::driver::{PageSnapshot, PageSource};
use crate::error::Result;
use crate::models::{ConfidenceReport, Field, LocatorSet, ValidationConfig};

use super::pagination::discover_targets;
use super::records::{JobExtractor, match_count};

/// What one page says about a locator set.
#[derive(Debug, Clone, Default)]
struct PageInspection {
    resolved: BTreeMap<Field, bool>,
    items: usize,
    completeness: Vec<f64>,
    targets: Vec<String>,
}

impl PageInspection {
    fn all_required_resolve(&self) -> bool {
        Field::REQUIRED
            .iter()
            .all(|f| self.resolved.get(f).copied().unwrap_or(false))
    }

    fn accuracy(&self) -> f64 {
        let total: f64 = Field::REQUIRED.iter().map(Field::importance).sum();
        let hit: f64 = Field::REQUIRED
            .iter()
            .filter(|f| self.resolved.get(f).copied().unwrap_or(false))
            .map(Field::importance)
            .sum();
        hit / total
    }
}

#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    extractor: JobExtractor,
}

impl Validator {
    pub fn new(config: &ValidationConfig, extractor: JobExtractor) -> Self {
        Self {
            config: config.clone(),
            extractor,
        }
    }

    /// Validate `locators` on `first` and on up to `sample_pages` later pages.
    ///
    /// `fused` carries the fusion score of each field; a field missing from
    /// it counts as fully confident. Fields that do not resolve on the first
    /// page score zero.
    pub async fn validate(
        &self,
        source: &dyn PageSource,
        first: &PageSnapshot,
        locators: &LocatorSet,
        fused: &BTreeMap<Field, f64>,
    ) -> Result<ConfidenceReport> {
        let head = self.inspect(first, locators, 1)?;
        let mut completeness = head.completeness.clone();

        let mut seen: HashSet<String> = HashSet::from([first.url.clone()]);
        let mut frontier = head.targets.clone();
        let mut attempted = 0;
        let mut passed = 0;

        while attempted < self.config.sample_pages {
            let batch: Vec<String> = frontier
                .drain(..)
                .filter(|url| seen.insert(url.clone()))
                .take(self.config.sample_pages - attempted)
                .collect();
            if batch.is_empty() {
                break;
            }

            let fetched: Vec<_> = stream::iter(batch)
                .map(|url| async move {
                    let page = source.fetch(&url).await;
                    (url, page)
                })
                .buffered(self.config.fan_out.max(1))
                .collect()
                .await;

            for (url, page) in fetched {
                attempted += 1;
                let page = match page {
                    Ok(page) => page,
                    Err(e) => {
                        log::debug!("Sample page {url} unavailable: {e}");
                        continue;
                    }
                };
                let sample = self.inspect(&page, locators, attempted as u32 + 1)?;
                if self.sample_passes(&head, &sample) {
                    passed += 1;
                }
                completeness.extend(sample.completeness);
                frontier.extend(sample.targets);
            }
        }

        let stability = if attempted == 0 {
            if head.all_required_resolve() && head.items > 0 { 1.0 } else { 0.0 }
        } else {
            passed as f64 / attempted as f64
        };
        let data_completeness = if completeness.is_empty() {
            0.0
        } else {
            completeness.iter().sum::<f64>() / completeness.len() as f64
        };

        let field_scores = locators
            .iter()
            .map(|(field, _)| {
                let resolves = head.resolved.get(&field).copied().unwrap_or(false);
                let score = if resolves {
                    fused.get(&field).copied().unwrap_or(1.0)
                } else {
                    0.0
                };
                (field, score)
            })
            .collect();

        let report = ConfidenceReport::new(
            field_scores,
            head.accuracy(),
            stability,
            data_completeness,
            attempted,
            self.config.weights(),
        );
        log::info!(
            "Validated {}: accuracy {:.2}, stability {:.2} over {} sample(s), completeness {:.2}, overall {:.2}",
            first.url,
            report.single_page_accuracy(),
            report.multi_page_stability(),
            attempted,
            report.data_completeness(),
            report.overall_score()
        );
        Ok(report)
    }

    fn sample_passes(&self, head: &PageInspection, sample: &PageInspection) -> bool {
        if !sample.all_required_resolve() {
            return false;
        }
        if head.items == 0 {
            return sample.items == 0;
        }
        let drift = (sample.items as f64 - head.items as f64).abs() / head.items as f64;
        drift <= self.config.item_count_tolerance + 1e-9
    }

    fn inspect(&self, page: &PageSnapshot, locators: &LocatorSet, index: u32) -> Result<PageInspection> {
        let document = page.document();
        let url = Url::parse(&page.url)?;

        let resolved = locators
            .iter()
            .map(|(field, locator)| (field, match_count(&document, locator) > 0))
            .collect();
        let extraction = self.extractor.extract(&document, &url, locators)?;
        Ok(PageInspection {
            resolved,
            items: extraction.items(),
            completeness: extraction.records.iter().map(|r| r.completeness()).collect(),
            targets: discover_targets(&document, &page.url, locators.get(Field::NextPage), index),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::driver::{DriverError, MemorySite};

    const BASE: &str = "https://example.com/jobs";

    fn locators() -> LocatorSet {
        LocatorSet::new()
            .with(Field::JobList, ".jobs")
            .with(Field::JobItem, ".job-card")
            .with(Field::JobTitle, "h2")
            .with(Field::JobLink, "h2 a")
            .with(Field::CompanyName, ".company")
            .with(Field::NextPage, "a.next")
    }

    fn listing(count: usize, next: Option<&str>) -> String {
        let cards: String = (0..count)
            .map(|i| {
                format!(r#"<div class="job-card"><h2><a href="/j/{i}">Job {i}</a></h2><span class="company">Co</span></div>"#)
            })
            .collect();
        let next = next
            .map(|n| format!(r#"<a class="next" href="{n}">Next</a>"#))
            .unwrap_or_default();
        format!(r#"<div class="jobs">{cards}</div>{next}"#)
    }

    fn validator() -> Validator {
        Validator::new(&ValidationConfig::default(), JobExtractor::default())
    }

    fn site() -> MemorySite {
        let site = MemorySite::new();
        site.add_page(BASE, listing(10, Some("?page=2")))
            .add_page(format!("{BASE}?page=2"), listing(9, Some("?page=3")))
            .add_page(format!("{BASE}?page=3"), listing(2, Some("?page=4")))
            .add_page(format!("{BASE}?page=4"), listing(10, None));
        site
    }

    #[tokio::test]
    async fn test_stability_counts_drifting_pages() {
        let site = site();
        let first = site.fetch(BASE).await.unwrap();
        let report = validator()
            .validate(&site, &first, &locators(), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(report.single_page_accuracy(), 1.0);
        assert_eq!(report.sampled_pages(), 3);
        // Page 3 has 2 items against 10 on the first page.
        assert!((report.multi_page_stability() - 2.0 / 3.0).abs() < 1e-9);
        // Company present, location, date and description missing.
        assert!((report.data_completeness() - 0.25).abs() < 1e-9);
        assert_eq!(report.field_score(Field::JobTitle), 1.0);
    }

    #[tokio::test]
    async fn test_fetch_failure_lowers_stability() {
        let site = site();
        site.fail_next(format!("{BASE}?page=2"), DriverError::timeout("slow"));
        let first = site.fetch(BASE).await.unwrap();
        let report = validator()
            .validate(&site, &first, &locators(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(report.sampled_pages(), 1);
        assert_eq!(report.multi_page_stability(), 0.0);
    }

    #[tokio::test]
    async fn test_single_page_site_uses_first_page() {
        let site = MemorySite::new();
        site.add_page(BASE, listing(3, None));
        let first = site.fetch(BASE).await.unwrap();
        let report = validator()
            .validate(&site, &first, &locators(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(report.sampled_pages(), 0);
        assert_eq!(report.multi_page_stability(), 1.0);
    }

    #[tokio::test]
    async fn test_unresolved_fields_lower_accuracy() {
        let site = MemorySite::new();
        site.add_page(BASE, listing(3, None));
        let first = site.fetch(BASE).await.unwrap();
        let broken = locators().with(Field::JobLink, "a.apply");
        let report = validator()
            .validate(&site, &first, &broken, &BTreeMap::new())
            .await
            .unwrap();
        assert!((report.single_page_accuracy() - 5.0 / 6.0).abs() < 1e-9);
        assert_eq!(report.field_score(Field::JobLink), 0.0);
        assert_eq!(report.multi_page_stability(), 0.0);
    }

    #[tokio::test]
    async fn test_validation_is_idempotent() {
        let site = site();
        let first = site.fetch(BASE).await.unwrap();
        let mut fused = BTreeMap::new();
        fused.insert(Field::JobItem, 0.6);

        let a = validator().validate(&site, &first, &locators(), &fused).await.unwrap();
        let b = validator().validate(&site, &first, &locators(), &fused).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.field_score(Field::JobItem), 0.6);
        assert!((0.0..=1.0).contains(&a.overall_score()));
    }

    /// Counts concurrent fetches against an in-memory site.
    struct Throttled {
        site: MemorySite,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PageSource for Throttled {
        async fn fetch(&self, url: &str) -> std::result::Result<PageSnapshot, DriverError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.site.fetch(url).await
        }
    }

    #[tokio::test]
    async fn test_sample_fetches_respect_fan_out() {
        let site = MemorySite::new();
        for n in 1..=7 {
            let pager: String = (1..=7)
                .map(|i| match i {
                    i if i == n => format!(r#"<a class="current">{i}</a>"#),
                    1 => format!(r#"<a href="{BASE}">1</a>"#),
                    i => format!(r#"<a href="{BASE}?page={i}">{i}</a>"#),
                })
                .collect();
            let url = if n == 1 { BASE.to_string() } else { format!("{BASE}?page={n}") };
            site.add_page(url, format!(r#"{}<div class="pagination">{pager}</div>"#, listing(4, None)));
        }
        let first = site.fetch(BASE).await.unwrap();
        let source = Throttled {
            site,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };
        let config = ValidationConfig {
            sample_pages: 4,
            fan_out: 2,
            ..Default::default()
        };

        let report = Validator::new(&config, JobExtractor::default())
            .validate(&source, &first, &locators(), &BTreeMap::new())
            .await
            .unwrap();

        assert_eq!(report.sampled_pages(), 4);
        assert_eq!(report.multi_page_stability(), 1.0);
        assert_eq!(source.peak.load(Ordering::SeqCst), 2);
    }
}
