// src/driver/http.rs

//! Plain HTTP driver.
//!
//! Fetches documents with reqwest. There is no rendering engine behind it:
//! `click` follows the element's link, `scroll` never loads more content and
//! `screenshot` is unavailable.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::CrawlerConfig;

use super::{
    BrowserDriver, DriverError, DriverFactory, PageSnapshot, PageSource, Screenshot, link_target,
};

/// Shared HTTP client acting as page source and driver factory.
///
/// Sampling fetches use the configured `user_agent`. With rotation on, every
/// launched driver gets its own client with an agent drawn from the pool.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: String,
    user_agents: Vec<String>,
    rotation: bool,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher with a configured asynchronous HTTP client.
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(&config.user_agent, timeout)?,
            user_agent: config.user_agent.clone(),
            user_agents: config
                .user_agents
                .iter()
                .map(|ua| ua.trim())
                .filter(|ua| !ua.is_empty())
                .map(String::from)
                .collect(),
            rotation: config.user_agent_rotation,
            timeout,
        })
    }

    /// User agent for a new browsing session.
    pub fn session_user_agent(&self) -> &str {
        if self.rotation && !self.user_agents.is_empty() {
            &self.user_agents[fastrand::usize(..self.user_agents.len())]
        } else {
            &self.user_agent
        }
    }

    /// A driver with its own client, identified by a per-session agent.
    pub fn driver(&self) -> Result<HttpDriver> {
        let user_agent = self.session_user_agent().to_string();
        let fetcher = Self {
            client: build_client(&user_agent, self.timeout)?,
            ..self.clone()
        };
        log::debug!("Launching HTTP driver as '{user_agent}'");
        Ok(HttpDriver {
            fetcher,
            user_agent,
            current: None,
        })
    }

    async fn get(&self, url: &str) -> std::result::Result<PageSnapshot, DriverError> {
        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriverError::not_found(format!("{url} returned {status}")));
        }
        let final_url = response.url().to_string();
        let html = response.text().await.map_err(classify)?;
        Ok(PageSnapshot::new(final_url, html))
    }
}

fn build_client(user_agent: &str, timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .build()?)
}

fn classify(error: reqwest::Error) -> DriverError {
    if error.is_timeout() || error.is_connect() {
        DriverError::timeout(error.to_string())
    } else {
        DriverError::not_found(error.to_string())
    }
}

#[async_trait]
impl PageSource for HttpFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<PageSnapshot, DriverError> {
        self.get(url).await
    }
}

#[async_trait]
impl DriverFactory for HttpFetcher {
    async fn launch(&self) -> std::result::Result<Box<dyn BrowserDriver>, DriverError> {
        let driver = self
            .driver()
            .map_err(|e| DriverError::crashed(format!("cannot build HTTP client: {e}")))?;
        Ok(Box::new(driver))
    }
}

/// Session-scoped HTTP "browser" holding the current document.
pub struct HttpDriver {
    fetcher: HttpFetcher,
    user_agent: String,
    current: Option<PageSnapshot>,
}

impl HttpDriver {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    fn current(&self) -> std::result::Result<&PageSnapshot, DriverError> {
        self.current
            .as_ref()
            .ok_or_else(|| DriverError::not_found("no page loaded"))
    }
}

#[async_trait]
impl BrowserDriver for HttpDriver {
    async fn navigate(&mut self, url: &str) -> std::result::Result<(), DriverError> {
        let page = self.fetcher.get(url).await?;
        log::debug!("Loaded {} ({} bytes)", page.url, page.html.len());
        self.current = Some(page);
        Ok(())
    }

    async fn extract_dom(&mut self) -> std::result::Result<PageSnapshot, DriverError> {
        self.current().cloned()
    }

    async fn click(&mut self, locator: &str) -> std::result::Result<(), DriverError> {
        let target = link_target(self.current()?, locator)?;
        self.navigate(&target).await
    }

    async fn scroll(&mut self) -> std::result::Result<(), DriverError> {
        self.current().map(|_| ())
    }

    async fn screenshot(&mut self) -> std::result::Result<Screenshot, DriverError> {
        Err(DriverError::not_found(
            "screenshots require a rendering browser",
        ))
    }

    async fn close(&mut self) {
        self.current = None;
    }
}
