// src/models/job.rs

//! Extracted job records and their quality scoring.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;
use url::Url;

/// A job listing extracted from one item of a listing page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub title: String,
    pub company: String,
    pub location: String,
    pub published_at: Option<NaiveDate>,
    pub description: String,

    /// Absolute http(s) URL of the listing, if one was found
    pub link: Option<String>,

    pub skills: BTreeSet<String>,
    pub quality_score: f64,
}

/// Raw text pulled from one item before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawJob {
    pub title: String,
    pub company: String,
    pub location: String,
    pub published_at: String,
    pub description: String,
    pub href: String,
}

impl JobRecord {
    /// Build a record from raw item text, resolving the link against `page_url`.
    pub fn from_raw(raw: RawJob, page_url: &Url, skill_keywords: &[String]) -> Self {
        let title = normalize_whitespace(&raw.title);
        let description = normalize_whitespace(&raw.description);
        let skills = derive_skills(&format!("{title} {description}"), skill_keywords);

        let mut record = Self {
            title,
            company: normalize_whitespace(&raw.company),
            location: normalize_whitespace(&raw.location),
            published_at: parse_date(&raw.published_at),
            description,
            link: validate_link(page_url, raw.href.trim()),
            skills,
            quality_score: 0.0,
        };
        record.quality_score = record.compute_quality();
        record
    }

    /// Weighted field presence plus a small bonus for derived skills.
    pub fn compute_quality(&self) -> f64 {
        let weighted = [
            (!self.title.is_empty(), 0.3),
            (!self.company.is_empty(), 0.2),
            (!self.description.is_empty(), 0.2),
            (!self.location.is_empty(), 0.1),
            (self.published_at.is_some(), 0.1),
            (self.link.is_some(), 0.1),
        ];
        let mut score: f64 = weighted
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, w)| w)
            .sum();
        if !self.skills.is_empty() {
            score += 0.1;
        }
        score.min(1.0)
    }

    /// Whether the record clears `threshold`.
    pub fn passes(&self, threshold: f64) -> bool {
        self.quality_score + 1e-9 >= threshold
    }

    /// Fraction of the optional fields (company, location, date, description) present.
    pub fn completeness(&self) -> f64 {
        let present = [
            !self.company.is_empty(),
            !self.location.is_empty(),
            self.published_at.is_some(),
            !self.description.is_empty(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        present as f64 / 4.0
    }

    /// Key used to drop repeats of the same listing within a session.
    pub fn dedup_key(&self) -> String {
        match &self.link {
            Some(link) => link.clone(),
            None => format!("{}\u{1f}{}", self.title.to_lowercase(), self.company.to_lowercase()),
        }
    }
}

/// Collapse runs of whitespace and trim.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve `href` against the page and keep it only if it is absolute http(s).
pub fn validate_link(page_url: &Url, href: &str) -> Option<String> {
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    let resolved = page_url.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" if resolved.host_str().is_some() => Some(resolved.to_string()),
        _ => None,
    }
}

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y", "%d/%m/%Y"];

/// Parse a calendar date from listing text, also when embedded in a phrase.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(date) = parse_exact(text) {
        return Some(date);
    }

    static EMBEDDED: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = EMBEDDED
        .get_or_init(|| Regex::new(r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}/\d{1,2}/\d{4}").ok())
        .as_ref()?;
    pattern
        .find_iter(text)
        .find_map(|m| parse_exact(m.as_str()))
}

fn parse_exact(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS.iter().find_map(|fmt| {
        NaiveDate::parse_from_str(text, fmt).ok().or_else(|| {
            NaiveDateTime::parse_from_str(text, &format!("{fmt} %H:%M:%S"))
                .ok()
                .map(|dt| dt.date())
        })
    })
}

/// Keywords found in `text`, lowercased.
pub fn derive_skills(text: &str, keywords: &[String]) -> BTreeSet<String> {
    let lowered = text.to_lowercase();
    let words: BTreeSet<&str> = lowered.unicode_words().collect();

    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .filter(|k| {
            if k.contains(char::is_whitespace) {
                normalize_whitespace(&lowered).contains(k.as_str())
            } else if k.unicode_words().count() == 1 && k.unicode_words().next() == Some(k.as_str()) {
                words.contains(k.as_str())
            } else {
                lowered.contains(k.as_str())
            }
        })
        .collect()
}
