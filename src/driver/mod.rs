//! Browser-automation and page-fetch capabilities.
//!
//! The engine only talks to these traits:
//! - `BrowserDriver`: a stateful, session-scoped browser (`navigate`,
//!   `extract_dom`, `click`, `scroll`, `screenshot`)
//! - `PageSource`: read-only fetches used by validation sampling
//! - `DriverFactory`: launches a fresh driver per session
//!
//! Two implementations ship with the crate: `HttpDriver` (plain HTTP, no
//! rendering) and `MemorySite` (in-memory pages for replay and tests).

pub mod http;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorClass;
use crate::models::ElementBox;
use crate::utils::resolve;

pub use http::{HttpDriver, HttpFetcher};
pub use memory::{MemoryDriver, MemorySite};

/// Why a driver call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverErrorReason {
    Timeout,
    NotFound,
    Crashed,
}

impl fmt::Display for DriverErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::Crashed => "crashed",
        })
    }
}

/// Failure of a single driver call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct DriverError {
    pub reason: DriverErrorReason,
    pub message: String,
}

impl DriverError {
    pub fn new(reason: DriverErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DriverErrorReason::Timeout, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(DriverErrorReason::NotFound, message)
    }

    pub fn crashed(message: impl Into<String>) -> Self {
        Self::new(DriverErrorReason::Crashed, message)
    }

    pub fn is_crash(&self) -> bool {
        self.reason == DriverErrorReason::Crashed
    }

    /// Timeouts and missing pages may be retried; a crash may not.
    pub fn class(&self) -> ErrorClass {
        match self.reason {
            DriverErrorReason::Timeout | DriverErrorReason::NotFound => ErrorClass::Retryable,
            DriverErrorReason::Crashed => ErrorClass::Fatal,
        }
    }
}

/// Serialized document of the currently loaded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
    /// Rendered content height, used to detect scroll-loaded content
    pub content_height: u64,
}

impl PageSnapshot {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        let html = html.into();
        Self {
            url: url.into(),
            content_height: html.len() as u64,
            html,
        }
    }

    pub fn document(&self) -> Html {
        Html::parse_document(&self.html)
    }
}

/// Screenshot plus the rendered boxes of visible elements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Screenshot {
    pub image: Vec<u8>,
    pub boxes: Vec<ElementBox>,
}

/// A session-scoped browser.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError>;

    async fn extract_dom(&mut self) -> Result<PageSnapshot, DriverError>;

    async fn click(&mut self, locator: &str) -> Result<(), DriverError>;

    async fn scroll(&mut self) -> Result<(), DriverError>;

    async fn screenshot(&mut self) -> Result<Screenshot, DriverError>;

    /// Release the underlying browser.
    async fn close(&mut self) {}
}

/// Read-only page fetches, independent of any session cursor.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<PageSnapshot, DriverError>;
}

/// Launches a fresh driver for one session.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}

/// Navigation target of the first element matching `locator` on `page`.
///
/// Used by drivers without a real click: the element's `href` (or its
/// closest anchor descendant) is resolved against the page URL.
pub(crate) fn link_target(page: &PageSnapshot, locator: &str) -> Result<String, DriverError> {
    let selector = Selector::parse(locator)
        .map_err(|e| DriverError::not_found(format!("invalid locator '{locator}': {e:?}")))?;
    let document = page.document();
    let element = document
        .select(&selector)
        .next()
        .ok_or_else(|| DriverError::not_found(format!("no element matches '{locator}'")))?;

    let href = element.value().attr("href").or_else(|| {
        Selector::parse("a[href]")
            .ok()
            .and_then(|a| element.select(&a).next())
            .and_then(|a| a.value().attr("href"))
    });

    match href.map(str::trim) {
        Some(h) if !h.is_empty() && !h.starts_with('#') && !h.starts_with("javascript:") => {
            resolve(&page.url, h)
                .ok_or_else(|| DriverError::not_found(format!("cannot resolve '{h}'")))
        }
        _ => Err(DriverError::not_found(format!(
            "element '{locator}' has no navigable target"
        ))),
    }
}
