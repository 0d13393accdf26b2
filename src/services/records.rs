//! Applies a locator set to a page and builds job records.

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::Result;
use crate::models::{ExtractionConfig, Field, JobRecord, LocatorSet, RawJob};
use crate::utils::{element_text, parse_selector};

/// Records and match counts from one page.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    /// Elements matched by the `jobList` locator
    pub lists: usize,
    pub records: Vec<JobRecord>,
}

impl PageExtraction {
    pub fn items(&self) -> usize {
        self.records.len()
    }
}

/// Compiled leaf-field selectors.
struct LeafSelectors {
    title: Option<Selector>,
    link: Option<Selector>,
    company: Option<Selector>,
    location: Option<Selector>,
    published_at: Option<Selector>,
    description: Option<Selector>,
}

impl LeafSelectors {
    fn compile(locators: &LocatorSet) -> Result<Self> {
        let compile = |field| locators.get(field).map(parse_selector).transpose();
        Ok(Self {
            title: compile(Field::JobTitle)?,
            link: compile(Field::JobLink)?,
            company: compile(Field::CompanyName)?,
            location: compile(Field::Location)?,
            published_at: compile(Field::PublishedAt)?,
            description: compile(Field::JobDescription)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobExtractor {
    skill_keywords: Vec<String>,
}

impl JobExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            skill_keywords: config.skill_keywords.clone(),
        }
    }

    /// Extract one record per `jobItem` inside each `jobList` match.
    pub fn extract(
        &self,
        document: &Html,
        page_url: &Url,
        locators: &LocatorSet,
    ) -> Result<PageExtraction> {
        let (Some(list), Some(item)) = (locators.get(Field::JobList), locators.get(Field::JobItem))
        else {
            return Ok(PageExtraction::default());
        };
        let list_selector = parse_selector(list)?;
        let item_selector = parse_selector(item)?;
        let leaves = LeafSelectors::compile(locators)?;

        let mut extraction = PageExtraction::default();
        let mut seen = HashSet::new();
        for list in document.select(&list_selector) {
            extraction.lists += 1;
            for item in list.select(&item_selector) {
                // Nested list matches would otherwise yield the same item twice.
                if !seen.insert(item.id()) {
                    continue;
                }
                let raw = Self::raw_job(&item, &leaves);
                extraction
                    .records
                    .push(JobRecord::from_raw(raw, page_url, &self.skill_keywords));
            }
        }
        Ok(extraction)
    }

    fn raw_job(item: &ElementRef<'_>, leaves: &LeafSelectors) -> RawJob {
        let first = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .and_then(|s| item.select(s).next())
        };
        let text = |selector: &Option<Selector>| first(selector).map(|e| element_text(&e)).unwrap_or_default();

        let title = first(&leaves.title);
        let href = first(&leaves.link)
            .and_then(|e| href_of(&e))
            .or_else(|| title.and_then(|e| href_of(&e)))
            .or_else(|| href_of(item))
            .unwrap_or_default();

        let published_at = first(&leaves.published_at)
            .map(|e| {
                e.value()
                    .attr("datetime")
                    .map(str::to_string)
                    .unwrap_or_else(|| element_text(&e))
            })
            .unwrap_or_default();

        RawJob {
            title: title.map(|e| element_text(&e)).unwrap_or_default(),
            company: text(&leaves.company),
            location: text(&leaves.location),
            published_at,
            description: text(&leaves.description),
            href,
        }
    }
}

/// `href` of the element itself or of its first anchor descendant.
fn href_of(element: &ElementRef<'_>) -> Option<String> {
    if let Some(href) = element.value().attr("href") {
        return Some(href.to_string());
    }
    let anchor = Selector::parse("a[href]").ok()?;
    element
        .select(&anchor)
        .next()
        .and_then(|a| a.value().attr("href"))
        .map(str::to_string)
}

/// Number of elements `locator` matches; an invalid locator matches nothing.
pub fn match_count(document: &Html, locator: &str) -> usize {
    Selector::parse(locator)
        .map(|s| document.select(&s).count())
        .unwrap_or(0)
}
