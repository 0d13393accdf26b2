//! Pagination controller.
//!
//! Each call to [`PaginationController::advance`] makes exactly one attempt
//! using the first applicable strategy, in priority order:
//!
//! 1. Next link: the element matched by the `nextPage` locator
//! 2. Numbered controls: the control for `current + 1` inside a pager
//! 3. Scroll loading: only when infinite scroll is enabled
//!
//! Strategy selection reads the page synchronously; only the chosen action
//! touches the driver.

use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::driver::{BrowserDriver, DriverError, PageSnapshot};
use crate::models::{PaginationConfig, validate_link};
use crate::utils::element_text;

const PAGER_CONTAINERS: &str = r#"[class*="pagination"], [class*="pager"], [class*="page-numbers"], nav[aria-label*="agination"]"#;
const PAGER_CONTROLS: &str = "a, button";
const ACTIVE_MARKERS: [&str; 3] = ["active", "current", "selected"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    NextLink,
    Numbered,
    Scroll,
    None,
}

/// Result of one pagination attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationOutcome {
    pub has_next: bool,
    pub navigated: bool,
    pub strategy_used: Strategy,
}

impl PaginationOutcome {
    fn end(strategy_used: Strategy) -> Self {
        Self {
            has_next: false,
            navigated: false,
            strategy_used,
        }
    }
}

/// Cursor kept between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationState {
    /// 1-based index of the current page
    pub page_index: u32,
    /// Scroll attempts since the last growth
    pub scroll_attempts: u32,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            page_index: 1,
            scroll_attempts: 0,
        }
    }
}

/// What to do, decided from the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Plan {
    Navigate(Strategy, String),
    Click(Strategy, String),
    Stop(Strategy),
    Scroll,
}

#[derive(Debug, Clone)]
pub struct PaginationController {
    config: PaginationConfig,
}

impl PaginationController {
    pub fn new(config: &PaginationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Try to reach the next page.
    pub async fn advance(
        &self,
        driver: &mut dyn BrowserDriver,
        page: &PageSnapshot,
        next_locator: Option<&str>,
        state: &mut PaginationState,
    ) -> Result<PaginationOutcome, DriverError> {
        let plan = self.plan(page, next_locator, state.page_index);
        log::debug!("Pagination plan for {}: {:?}", page.url, plan);

        match plan {
            Plan::Navigate(strategy, url) => {
                driver.navigate(&url).await?;
                Ok(self.moved(state, strategy))
            }
            Plan::Click(strategy, locator) => {
                driver.click(&locator).await?;
                Ok(self.moved(state, strategy))
            }
            Plan::Stop(strategy) => Ok(PaginationOutcome::end(strategy)),
            Plan::Scroll => self.scroll(driver, page, state).await,
        }
    }

    /// URL that `advance` would navigate to, if it would navigate at all.
    pub fn target(&self, page: &PageSnapshot, next_locator: Option<&str>, index: u32) -> Option<String> {
        match self.plan(page, next_locator, index) {
            Plan::Navigate(_, url) => Some(url),
            _ => None,
        }
    }

    fn moved(&self, state: &mut PaginationState, strategy: Strategy) -> PaginationOutcome {
        state.page_index += 1;
        state.scroll_attempts = 0;
        PaginationOutcome {
            has_next: true,
            navigated: true,
            strategy_used: strategy,
        }
    }

    async fn scroll(
        &self,
        driver: &mut dyn BrowserDriver,
        page: &PageSnapshot,
        state: &mut PaginationState,
    ) -> Result<PaginationOutcome, DriverError> {
        let before = page.content_height;
        driver.scroll().await?;
        state.scroll_attempts += 1;

        for _ in 0..=self.config.scroll_retries {
            if self.config.scroll_wait_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.scroll_wait_ms)).await;
            }
            let height = driver.extract_dom().await?.content_height;
            if height >= before.saturating_add(self.config.min_scroll_delta) {
                state.page_index += 1;
                state.scroll_attempts = 0;
                return Ok(PaginationOutcome {
                    has_next: true,
                    navigated: false,
                    strategy_used: Strategy::Scroll,
                });
            }
        }
        Ok(PaginationOutcome::end(Strategy::Scroll))
    }

    fn plan(&self, page: &PageSnapshot, next_locator: Option<&str>, index: u32) -> Plan {
        let document = page.document();

        if let Some(plan) = next_link(&document, &page.url, next_locator) {
            return plan;
        }
        if let Some(plan) = numbered(&document, &page.url, index) {
            return plan;
        }
        if self.config.infinite_scroll {
            Plan::Scroll
        } else {
            Plan::Stop(Strategy::None)
        }
    }
}

/// URLs of later pages advertised by the document, nearest first.
///
/// Used for read-only sampling; the session cursor is never touched.
pub fn discover_targets(
    document: &Html,
    page_url: &str,
    next_locator: Option<&str>,
    index: u32,
) -> Vec<String> {
    let mut targets = Vec::new();
    if let Some(Plan::Navigate(_, url)) = next_link(document, page_url, next_locator) {
        targets.push(url);
    }

    let controls = pager_controls(document);
    let current = current_index(&controls).unwrap_or(index);
    let mut later: Vec<(u32, String)> = controls
        .iter()
        .filter(|c| c.number > current)
        .filter_map(|c| c.url(page_url).map(|u| (c.number, u)))
        .collect();
    later.sort();
    for (_, url) in later {
        if url != page_url && !targets.contains(&url) {
            targets.push(url);
        }
    }
    targets
}

fn next_link(document: &Html, page_url: &str, next_locator: Option<&str>) -> Option<Plan> {
    let locator = next_locator.map(str::trim).filter(|l| !l.is_empty())?;
    let selector = Selector::parse(locator).ok()?;
    let mut matched = document.select(&selector).peekable();
    matched.peek()?;

    match matched.find(is_enabled) {
        None => Some(Plan::Stop(Strategy::NextLink)),
        Some(element) => Some(
            element
                .value()
                .attr("href")
                .and_then(|href| link_url(page_url, href))
                .map(|url| Plan::Navigate(Strategy::NextLink, url))
                .unwrap_or_else(|| Plan::Click(Strategy::NextLink, locator.to_string())),
        ),
    }
}

fn numbered(document: &Html, page_url: &str, index: u32) -> Option<Plan> {
    let controls = pager_controls(document);
    if controls.is_empty() {
        return None;
    }
    let current = current_index(&controls).unwrap_or(index);
    match controls.iter().find(|c| c.number == current + 1) {
        Some(control) => control
            .url(page_url)
            .map(|url| Plan::Navigate(Strategy::Numbered, url)),
        None => Some(Plan::Stop(Strategy::Numbered)),
    }
}

/// A numbered page control.
struct PageControl {
    number: u32,
    href: Option<String>,
    active: bool,
}

impl PageControl {
    fn url(&self, page_url: &str) -> Option<String> {
        self.href.as_deref().and_then(|h| link_url(page_url, h))
    }
}

fn pager_controls(document: &Html) -> Vec<PageControl> {
    let (Ok(containers), Ok(controls)) = (
        Selector::parse(PAGER_CONTAINERS),
        Selector::parse(PAGER_CONTROLS),
    ) else {
        return Vec::new();
    };

    let mut out: Vec<PageControl> = Vec::new();
    for container in document.select(&containers) {
        for control in container.select(&controls) {
            let Ok(number) = element_text(&control).parse::<u32>() else {
                continue;
            };
            if out.iter().any(|c| c.number == number) {
                continue;
            }
            out.push(PageControl {
                number,
                href: control.value().attr("href").map(str::to_string),
                active: is_active(&control),
            });
        }
    }
    out
}

fn current_index(controls: &[PageControl]) -> Option<u32> {
    controls.iter().find(|c| c.active).map(|c| c.number)
}

fn is_active(element: &ElementRef<'_>) -> bool {
    let marked = |e: &ElementRef<'_>| {
        e.value().attr("aria-current").is_some()
            || e
                .value()
                .classes()
                .any(|c| ACTIVE_MARKERS.iter().any(|m| c.eq_ignore_ascii_case(m)))
    };
    marked(element)
        || element
            .parent()
            .and_then(ElementRef::wrap)
            .is_some_and(|p| marked(&p))
}

fn is_enabled(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    value.attr("disabled").is_none()
        && !value.classes().any(|c| c.eq_ignore_ascii_case("disabled"))
        && value.attr("aria-disabled") != Some("true")
}

fn link_url(page_url: &str, href: &str) -> Option<String> {
    let base = url::Url::parse(page_url).ok()?;
    validate_link(&base, href.trim())
}
