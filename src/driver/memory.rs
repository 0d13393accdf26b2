// src/driver/memory.rs

//! In-memory site for replaying saved pages.
//!
//! Pages are keyed by URL. A page may have several scroll stages, each one
//! a longer document, so scroll-triggered loading can be replayed too.
//! Faults can be queued per URL and are returned by the next navigations.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::models::ElementBox;

use super::{
    BrowserDriver, DriverError, DriverFactory, PageSnapshot, PageSource, Screenshot, link_target,
};

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, Vec<String>>,
    layouts: HashMap<String, Vec<ElementBox>>,
    faults: HashMap<String, VecDeque<DriverError>>,
    navigations: Vec<String>,
    launches: usize,
    closes: usize,
}

/// Shared collection of pages; cheap to clone.
#[derive(Clone, Default)]
pub struct MemorySite {
    state: Arc<Mutex<SiteState>>,
}

impl MemorySite {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a static page.
    pub fn add_page(&self, url: impl Into<String>, html: impl Into<String>) -> &Self {
        self.state().pages.insert(url.into(), vec![html.into()]);
        self
    }

    /// Register a page whose content grows with each scroll.
    pub fn add_scroll_page(&self, url: impl Into<String>, stages: Vec<String>) -> &Self {
        self.state().pages.insert(url.into(), stages);
        self
    }

    /// Rendered boxes reported by `screenshot` on this page.
    pub fn set_layout(&self, url: impl Into<String>, boxes: Vec<ElementBox>) -> &Self {
        self.state().layouts.insert(url.into(), boxes);
        self
    }

    /// Make the next navigation (or fetch) of `url` fail with `error`.
    pub fn fail_next(&self, url: impl Into<String>, error: DriverError) -> &Self {
        self.state()
            .faults
            .entry(url.into())
            .or_default()
            .push_back(error);
        self
    }

    /// URLs navigated to so far, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.state().navigations.clone()
    }

    pub fn launches(&self) -> usize {
        self.state().launches
    }

    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// A driver over this site.
    pub fn driver(&self) -> MemoryDriver {
        MemoryDriver {
            site: self.clone(),
            current: None,
        }
    }

    fn load(&self, url: &str, record: bool) -> Result<(), DriverError> {
        let mut state = self.state();
        if record {
            state.navigations.push(url.to_string());
        }
        if let Some(error) = state.faults.get_mut(url).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if state.pages.contains_key(url) {
            Ok(())
        } else {
            Err(DriverError::not_found(format!("{url} is not part of the site")))
        }
    }

    fn stage(&self, url: &str, stage: usize) -> Option<(String, usize)> {
        let state = self.state();
        let stages = state.pages.get(url)?;
        let last = stages.len().saturating_sub(1);
        let index = stage.min(last);
        stages.get(index).map(|html| (html.clone(), last))
    }
}

#[async_trait]
impl PageSource for MemorySite {
    async fn fetch(&self, url: &str) -> Result<PageSnapshot, DriverError> {
        self.load(url, false)?;
        let (html, _) = self
            .stage(url, 0)
            .ok_or_else(|| DriverError::not_found(url.to_string()))?;
        Ok(PageSnapshot::new(url, html))
    }
}

#[async_trait]
impl DriverFactory for MemorySite {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        self.state().launches += 1;
        Ok(Box::new(self.driver()))
    }
}

/// Driver over a `MemorySite`.
pub struct MemoryDriver {
    site: MemorySite,
    /// Loaded URL and scroll stage
    current: Option<(String, usize)>,
}

impl MemoryDriver {
    fn snapshot(&self) -> Result<PageSnapshot, DriverError> {
        let (url, stage) = self
            .current
            .as_ref()
            .ok_or_else(|| DriverError::not_found("no page loaded"))?;
        let (html, _) = self
            .site
            .stage(url, *stage)
            .ok_or_else(|| DriverError::not_found(url.clone()))?;
        Ok(PageSnapshot::new(url.clone(), html))
    }
}

#[async_trait]
impl BrowserDriver for MemoryDriver {
    async fn navigate(&mut self, url: &str) -> Result<(), DriverError> {
        self.site.load(url, true)?;
        self.current = Some((url.to_string(), 0));
        Ok(())
    }

    async fn extract_dom(&mut self) -> Result<PageSnapshot, DriverError> {
        self.snapshot()
    }

    async fn click(&mut self, locator: &str) -> Result<(), DriverError> {
        let target = link_target(&self.snapshot()?, locator)?;
        self.navigate(&target).await
    }

    async fn scroll(&mut self) -> Result<(), DriverError> {
        let (url, stage) = self
            .current
            .clone()
            .ok_or_else(|| DriverError::not_found("no page loaded"))?;
        if let Some((_, last)) = self.site.stage(&url, stage) {
            self.current = Some((url, (stage + 1).min(last)));
        }
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Screenshot, DriverError> {
        let (url, _) = self
            .current
            .as_ref()
            .ok_or_else(|| DriverError::not_found("no page loaded"))?;
        let boxes = self
            .site
            .state()
            .layouts
            .get(url)
            .cloned()
            .unwrap_or_default();
        Ok(Screenshot {
            image: Vec::new(),
            boxes,
        })
    }

    async fn close(&mut self) {
        self.current = None;
        self.site.state().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_navigate_and_click_through_pages() {
        let site = MemorySite::new();
        site.add_page(
            "https://example.com/p1",
            r#"<a class="next" href="/p2">next</a>"#,
        )
        .add_page("https://example.com/p2", "<p>two</p>");

        let mut driver = site.driver();
        driver.navigate("https://example.com/p1").await.unwrap();
        driver.click("a.next").await.unwrap();

        let page = driver.extract_dom().await.unwrap();
        assert_eq!(page.url, "https://example.com/p2");
        assert_eq!(
            site.navigations(),
            vec!["https://example.com/p1", "https://example.com/p2"]
        );
    }

    #[tokio::test]
    async fn test_queued_fault_is_returned_once() {
        let site = MemorySite::new();
        site.add_page("https://example.com/", "<p>ok</p>")
            .fail_next("https://example.com/", DriverError::timeout("slow"));

        let mut driver = site.driver();
        assert_eq!(
            driver.navigate("https://example.com/").await.unwrap_err(),
            DriverError::timeout("slow")
        );
        assert!(driver.navigate("https://example.com/").await.is_ok());
    }

    #[tokio::test]
    async fn test_scroll_advances_stages_and_height() {
        let site = MemorySite::new();
        site.add_scroll_page(
            "https://example.com/feed",
            vec!["<li>1</li>".into(), "<li>1</li><li>2</li>".into()],
        );

        let mut driver = site.driver();
        driver.navigate("https://example.com/feed").await.unwrap();
        let before = driver.extract_dom().await.unwrap().content_height;
        driver.scroll().await.unwrap();
        let after = driver.extract_dom().await.unwrap().content_height;
        driver.scroll().await.unwrap();
        let last = driver.extract_dom().await.unwrap().content_height;

        assert!(after > before);
        assert_eq!(after, last);
    }

    #[tokio::test]
    async fn test_factory_counts_launches_and_closes() {
        let site = MemorySite::new();
        let mut driver = site.launch().await.unwrap();
        driver.close().await;
        assert_eq!(site.launches(), 1);
        assert_eq!(site.closes(), 1);
    }
}
