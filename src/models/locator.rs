// src/models/locator.rs

//! Locator sets: one structural selector per extraction field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A field of a job listing page that a locator can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    JobList,
    JobItem,
    JobTitle,
    JobLink,
    CompanyName,
    PublishedAt,
    Location,
    JobDescription,
    NextPage,
}

impl Field {
    /// Every field, in canonical order.
    pub const ALL: [Field; 9] = [
        Field::JobList,
        Field::JobItem,
        Field::JobTitle,
        Field::JobLink,
        Field::CompanyName,
        Field::PublishedAt,
        Field::Location,
        Field::JobDescription,
        Field::NextPage,
    ];

    /// Fields that must resolve for a page to be considered analyzable.
    pub const REQUIRED: [Field; 4] = [
        Field::JobList,
        Field::JobItem,
        Field::JobTitle,
        Field::JobLink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::JobList => "jobList",
            Field::JobItem => "jobItem",
            Field::JobTitle => "jobTitle",
            Field::JobLink => "jobLink",
            Field::CompanyName => "companyName",
            Field::PublishedAt => "publishedAt",
            Field::Location => "location",
            Field::JobDescription => "jobDescription",
            Field::NextPage => "nextPage",
        }
    }

    /// List- and item-shaped fields; visual evidence only applies to these.
    pub fn is_structural(&self) -> bool {
        matches!(self, Field::JobList | Field::JobItem)
    }

    /// Relative weight used by single-page accuracy.
    pub fn importance(&self) -> f64 {
        if self.is_structural() { 2.0 } else { 1.0 }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mapping from field to structural locator (CSS selector).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorSet {
    locators: BTreeMap<Field, String>,
}

impl LocatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, ignoring blank locators.
    pub fn with(mut self, field: Field, locator: impl Into<String>) -> Self {
        self.set(field, locator);
        self
    }

    /// Set a locator. Blank values remove the field.
    pub fn set(&mut self, field: Field, locator: impl Into<String>) {
        let locator = locator.into().trim().to_string();
        if locator.is_empty() {
            self.locators.remove(&field);
        } else {
            self.locators.insert(field, locator);
        }
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.locators.get(&field).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.locators.iter().map(|(f, l)| (*f, l.as_str()))
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// First structural field that is missing, if any.
    pub fn missing_required(&self) -> Option<Field> {
        [Field::JobList, Field::JobItem]
            .into_iter()
            .find(|f| self.get(*f).is_none())
    }

    /// A set is usable when both `jobList` and `jobItem` are present.
    pub fn is_usable(&self) -> bool {
        self.missing_required().is_none()
    }

    /// Stable hex digest of the canonical form.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (field, locator) in &self.locators {
            hasher.update(field.as_str().as_bytes());
            hasher.update([0u8]);
            hasher.update(locator.as_bytes());
            hasher.update([0xffu8]);
        }
        hex::encode(hasher.finalize())
    }
}
