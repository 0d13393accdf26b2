// src/pipeline/manager.rs

//! Session manager: the operations exposed to an outer service layer.
//!
//! Each crawl runs in its own task and owns its session exclusively. Status
//! reads go through a `watch` channel and always return copies. A semaphore
//! bounds the number of sessions holding a browser at once; extra sessions
//! wait for a permit instead of failing.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use tokio::sync::{RwLock, Semaphore, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::driver::{DriverFactory, PageSource};
use crate::error::{AppError, Result};
use crate::models::{
    AnalysisReport, ConfidenceReport, Config, CrawlOptions, CrawlSession, JobRecord, LocatorSet,
    SessionSnapshot, SessionStatus,
};
use crate::services::EvidenceProvider;
use crate::storage::ResultStore;

use super::analyze::{AnalysisOptions, Analyzer, classify};
use super::export::ExportArtifact;
use super::session::SessionRunner;

struct SessionEntry {
    status: watch::Receiver<SessionSnapshot>,
    cancel: CancellationToken,
    /// Set once the session reached a terminal state
    outcome: Option<CrawlSession>,
}

/// Runs analyses and crawl sessions against shared collaborators.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<Config>,
    drivers: Arc<dyn DriverFactory>,
    evidence: Arc<dyn EvidenceProvider>,
    pages: Arc<dyn PageSource>,
    store: Arc<dyn ResultStore>,
    permits: Arc<Semaphore>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionEntry>>>,
}

impl SessionManager {
    pub fn new(
        config: Config,
        drivers: Arc<dyn DriverFactory>,
        evidence: Arc<dyn EvidenceProvider>,
        pages: Arc<dyn PageSource>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.crawler.max_concurrent_sessions.max(1)));
        Self {
            config: Arc::new(config),
            drivers,
            evidence,
            pages,
            store,
            permits,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Infer and validate a locator set for `url`.
    pub async fn analyze_url(&self, url: &str, options: AnalysisOptions) -> Result<AnalysisReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| AppError::config(e.to_string()))?;
        let mut driver = self.drivers.launch().await.map_err(|e| classify(url, e))?;

        let analyzer = Analyzer::new(&self.config);
        let result = analyzer
            .analyze(
                driver.as_mut(),
                self.evidence.as_ref(),
                self.pages.as_ref(),
                url,
                &options,
            )
            .await;
        driver.close().await;

        let report = result?;
        if let Err(e) = self.store.save_locators(&report).await {
            log::warn!("Could not save locator set for {url}: {e}");
        }
        Ok(report)
    }

    /// Re-validate a known locator set.
    pub async fn validate(&self, url: &str, locators: &LocatorSet) -> Result<ConfidenceReport> {
        Analyzer::new(&self.config)
            .validate(self.pages.as_ref(), url, locators)
            .await
    }

    /// Register a session and start it in the background.
    pub async fn start_crawl(
        &self,
        url: &str,
        locators: LocatorSet,
        options: CrawlOptions,
    ) -> Result<Uuid> {
        options.validate()?;
        url::Url::parse(url)?;

        let session = CrawlSession::new(
            url,
            locators,
            options,
            self.config.session.error_log_capacity,
        );
        let id = session.id();
        let (tx, rx) = watch::channel(session.snapshot());
        let cancel = CancellationToken::new();

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                status: rx,
                cancel: cancel.clone(),
                outcome: None,
            },
        );
        log::info!("Session {id} queued for {url}");

        let manager = self.clone();
        tokio::spawn(async move {
            manager.drive(session, cancel, tx).await;
        });
        Ok(id)
    }

    async fn drive(
        &self,
        session: CrawlSession,
        cancel: CancellationToken,
        tx: watch::Sender<SessionSnapshot>,
    ) {
        let id = session.id();
        let session = match self.permits.clone().acquire_owned().await {
            Ok(_permit) => match self.drivers.launch().await {
                Ok(mut driver) => {
                    let runner = SessionRunner::new(&self.config);
                    let pending = session.clone();
                    let outcome = AssertUnwindSafe(runner.run(session, driver.as_mut(), &cancel, &tx))
                        .catch_unwind()
                        .await;
                    driver.close().await;
                    outcome.unwrap_or_else(|_| abandon(pending, "crawl loop panicked".to_string()))
                }
                Err(e) => abandon(session, format!("browser driver unavailable: {e}")),
            },
            Err(e) => abandon(session, format!("no crawl slot available: {e}")),
        };

        let snapshot = session.snapshot();
        self.persist(&session, &snapshot).await;
        if let Some(entry) = self.sessions.write().await.get_mut(&id) {
            entry.outcome = Some(session);
        }
        tx.send_replace(snapshot);
    }

    async fn persist(&self, session: &CrawlSession, snapshot: &SessionSnapshot) {
        if session.status() == SessionStatus::Completed {
            let artifact = artifact_of(session);
            if let Err(e) = self.store.save_export(&artifact).await {
                log::error!("Failed to save export of session {}: {e}", session.id());
            }
        }
        if let Err(e) = self.store.save_summary(snapshot).await {
            log::error!("Failed to save summary of session {}: {e}", session.id());
        }
    }

    /// Snapshot copy of a session's status and progress.
    pub async fn get_status(&self, id: Uuid) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.status.borrow().clone())
    }

    /// Snapshots of all known sessions, newest first.
    pub async fn list(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .sessions
            .read()
            .await
            .values()
            .map(|entry| entry.status.borrow().clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }

    /// Request cancellation; observed at the next iteration boundary.
    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Wait until the session is terminal and return its final snapshot.
    pub async fn wait(&self, id: Uuid) -> Result<SessionSnapshot> {
        let mut status = self
            .sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.status.clone())
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;

        let snapshot = status
            .wait_for(|s| s.status.is_terminal())
            .await
            .map_err(|_| AppError::SessionNotFound(id.to_string()))?
            .clone();
        Ok(snapshot)
    }

    /// Export artifact; only completed sessions have one.
    pub async fn export(&self, id: Uuid) -> Result<ExportArtifact> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        match &entry.outcome {
            Some(session) if session.status() == SessionStatus::Completed => {
                Ok(artifact_of(session))
            }
            Some(session) => Err(AppError::ExportUnavailable(format!(
                "session {id} ended {}",
                session.status()
            ))),
            None => Err(AppError::ExportUnavailable(format!(
                "session {id} is still running"
            ))),
        }
    }

    /// Records accepted so far by a finished session, whatever its outcome.
    pub async fn partial_records(&self, id: Uuid) -> Result<Vec<JobRecord>> {
        let sessions = self.sessions.read().await;
        let entry = sessions
            .get(&id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_string()))?;
        Ok(entry
            .outcome
            .as_ref()
            .map(|s| s.records().to_vec())
            .unwrap_or_default())
    }
}

fn artifact_of(session: &CrawlSession) -> ExportArtifact {
    ExportArtifact::new(
        session.id(),
        session.target_url(),
        session.options().export_format,
        session.records(),
    )
}

/// Fail a session that never got to run.
fn abandon(mut session: CrawlSession, reason: String) -> CrawlSession {
    log::error!("Session {} failed: {reason}", session.id());
    let started = session.start().and_then(|()| session.fail(reason));
    if let Err(e) = started {
        log::error!("{e}");
    }
    session
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::driver::{BrowserDriver, DriverError, MemorySite};
    use crate::models::{ExportFormat, Field};
    use crate::services::NoEvidence;
    use crate::storage::LocalStorage;

    const BASE: &str = "https://example.com/jobs";

    fn listing(n: usize, last: usize) -> String {
        let cards: String = (0..3)
            .map(|i| {
                format!(
                    r#"<div class="job-card"><h2><a href="/j/{n}-{i}">Engineer {n}-{i}</a></h2>
                       <span class="company">Acme</span><span class="location">Berlin</span>
                       <p class="summary">Build services</p><time>2024-05-01</time></div>"#
                )
            })
            .collect();
        let next = if n < last {
            format!(r#"<a class="next" href="{BASE}?page={}">Next</a>"#, n + 1)
        } else {
            String::new()
        };
        format!(r#"<div class="jobs">{cards}</div>{next}"#)
    }

    fn site(pages: usize) -> MemorySite {
        let site = MemorySite::new();
        site.add_page(BASE, listing(1, pages));
        for n in 2..=pages {
            site.add_page(format!("{BASE}?page={n}"), listing(n, pages));
        }
        site
    }

    fn locators() -> LocatorSet {
        LocatorSet::new()
            .with(Field::JobList, ".jobs")
            .with(Field::JobItem, ".job-card")
            .with(Field::JobTitle, "h2")
            .with(Field::JobLink, "h2 a")
            .with(Field::CompanyName, ".company")
            .with(Field::Location, ".location")
            .with(Field::JobDescription, ".summary")
            .with(Field::PublishedAt, "time")
            .with(Field::NextPage, "a.next")
    }

    fn options() -> CrawlOptions {
        CrawlOptions {
            delay_min_ms: 0,
            delay_max_ms: 0,
            ..CrawlOptions::default()
        }
    }

    fn config(max_concurrent_sessions: usize) -> Config {
        let mut config = Config::default();
        config.crawler.max_concurrent_sessions = max_concurrent_sessions;
        config.crawler.retry_delay_ms = 0;
        config
    }

    fn manager(site: &MemorySite, dir: &TempDir, config: Config) -> SessionManager {
        SessionManager::new(
            config,
            Arc::new(site.clone()),
            Arc::new(NoEvidence),
            Arc::new(site.clone()),
            Arc::new(LocalStorage::new(dir.path())),
        )
    }

    #[tokio::test]
    async fn test_crawl_completes_and_exports() {
        let site = site(3);
        let dir = TempDir::new().unwrap();
        let manager = manager(&site, &dir, config(2));

        let id = manager.start_crawl(BASE, locators(), options()).await.unwrap();
        let done = manager.wait(id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.progress.pages_crawled, 3);
        assert_eq!(done.progress.jobs_saved, 9);

        let artifact = manager.export(id).await.unwrap();
        assert_eq!(artifact.len(), 9);
        assert_eq!(artifact.format, ExportFormat::Json);
        assert!(dir.path().join(format!("exports/{id}.json")).exists());
        assert!(dir.path().join(format!("sessions/{id}.json")).exists());
        assert_eq!(site.launches(), 1);
        assert_eq!(site.closes(), 1);
    }

    #[tokio::test]
    async fn test_failed_session_keeps_partial_records() {
        let site = site(3);
        site.fail_next(format!("{BASE}?page=2"), DriverError::crashed("renderer died"));
        let dir = TempDir::new().unwrap();
        let manager = manager(&site, &dir, config(2));

        let id = manager.start_crawl(BASE, locators(), options()).await.unwrap();
        let done = manager.wait(id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("renderer died"));
        assert!(matches!(
            manager.export(id).await,
            Err(AppError::ExportUnavailable(_))
        ));
        assert_eq!(manager.partial_records(id).await.unwrap().len(), 3);
        assert_eq!(site.closes(), 1);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let site = site(1);
        let dir = TempDir::new().unwrap();
        let manager = manager(&site, &dir, config(1));
        let id = Uuid::new_v4();

        assert!(manager.get_status(id).await.is_none());
        assert!(matches!(manager.cancel(id).await, Err(AppError::SessionNotFound(_))));
        assert!(matches!(manager.wait(id).await, Err(AppError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_options_are_rejected() {
        let site = site(1);
        let dir = TempDir::new().unwrap();
        let manager = manager(&site, &dir, config(1));
        let bad = CrawlOptions {
            max_pages: 0,
            ..options()
        };
        assert!(manager.start_crawl(BASE, locators(), bad).await.is_err());
        assert!(manager.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_analyze_saves_locators() {
        let site = MemorySite::new();
        site.add_page(
            BASE,
            r#"<div class="jobs"><div class="job-card"><h2 class="job-title"><a href="/j/1">A</a></h2></div>
               <div class="job-card"><h2 class="job-title"><a href="/j/2">B</a></h2></div></div>"#,
        );
        let dir = TempDir::new().unwrap();
        let manager = manager(&site, &dir, config(1));

        let report = manager.analyze_url(BASE, AnalysisOptions::default()).await.unwrap();
        assert!(report.locators.is_usable());
        let saved = dir
            .path()
            .join(format!("locators/{}.json", report.locators.fingerprint()));
        assert!(saved.exists());
        assert_eq!(site.closes(), 1);
    }

    /// Counts drivers alive at once and holds each navigation briefly.
    struct Gauge {
        site: MemorySite,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    struct GaugeDriver {
        inner: Box<dyn BrowserDriver>,
        active: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DriverFactory for Gauge {
        async fn launch(&self) -> std::result::Result<Box<dyn BrowserDriver>, DriverError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(GaugeDriver {
                inner: self.site.launch().await?,
                active: self.active.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserDriver for GaugeDriver {
        async fn navigate(&mut self, url: &str) -> std::result::Result<(), DriverError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.navigate(url).await
        }

        async fn extract_dom(&mut self) -> std::result::Result<crate::driver::PageSnapshot, DriverError> {
            self.inner.extract_dom().await
        }

        async fn click(&mut self, locator: &str) -> std::result::Result<(), DriverError> {
            self.inner.click(locator).await
        }

        async fn scroll(&mut self) -> std::result::Result<(), DriverError> {
            self.inner.scroll().await
        }

        async fn screenshot(&mut self) -> std::result::Result<crate::driver::Screenshot, DriverError> {
            self.inner.screenshot().await
        }

        async fn close(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_queues_sessions() {
        let site = site(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let gauge = Gauge {
            site: site.clone(),
            active: Arc::new(AtomicUsize::new(0)),
            peak: peak.clone(),
        };
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(
            config(2),
            Arc::new(gauge),
            Arc::new(NoEvidence),
            Arc::new(site.clone()),
            Arc::new(LocalStorage::new(dir.path())),
        );

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(manager.start_crawl(BASE, locators(), options()).await.unwrap());
        }
        for id in &ids {
            let done = manager.wait(*id).await.unwrap();
            assert_eq!(done.status, SessionStatus::Completed);
        }

        assert_eq!(site.launches(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(manager.list().await.len(), 5);
    }

    /// Hands out drivers that blow up when reading the page.
    struct Faulty {
        site: MemorySite,
    }

    struct FaultyDriver {
        inner: Box<dyn BrowserDriver>,
    }

    #[async_trait]
    impl DriverFactory for Faulty {
        async fn launch(&self) -> std::result::Result<Box<dyn BrowserDriver>, DriverError> {
            Ok(Box::new(FaultyDriver {
                inner: self.site.launch().await?,
            }))
        }
    }

    #[async_trait]
    impl BrowserDriver for FaultyDriver {
        async fn navigate(&mut self, url: &str) -> std::result::Result<(), DriverError> {
            self.inner.navigate(url).await
        }

        async fn extract_dom(&mut self) -> std::result::Result<crate::driver::PageSnapshot, DriverError> {
            panic!("renderer state corrupted")
        }

        async fn click(&mut self, locator: &str) -> std::result::Result<(), DriverError> {
            self.inner.click(locator).await
        }

        async fn scroll(&mut self) -> std::result::Result<(), DriverError> {
            self.inner.scroll().await
        }

        async fn screenshot(&mut self) -> std::result::Result<crate::driver::Screenshot, DriverError> {
            self.inner.screenshot().await
        }

        async fn close(&mut self) {
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn test_panicking_crawl_fails_session_and_closes_driver() {
        let site = site(2);
        let dir = TempDir::new().unwrap();
        let manager = SessionManager::new(
            config(1),
            Arc::new(Faulty { site: site.clone() }),
            Arc::new(NoEvidence),
            Arc::new(site.clone()),
            Arc::new(LocalStorage::new(dir.path())),
        );

        let id = manager.start_crawl(BASE, locators(), options()).await.unwrap();
        let done = manager.wait(id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Failed);
        assert!(done.failure_reason.unwrap().contains("panicked"));
        assert_eq!(site.closes(), 1);
        assert!(dir.path().join(format!("sessions/{id}.json")).exists());

        // The slot is released for the next session.
        let next = manager.start_crawl(BASE, locators(), options()).await.unwrap();
        assert_eq!(manager.wait(next).await.unwrap().status, SessionStatus::Failed);
        assert_eq!(site.closes(), 2);
    }

    #[tokio::test]
    async fn test_cancel_running_session() {
        let site = site(50);
        let dir = TempDir::new().unwrap();
        let mut config = config(1);
        config.crawler.retry_delay_ms = 0;
        let manager = manager(&site, &dir, config);
        let slow = CrawlOptions {
            max_pages: 50,
            delay_min_ms: 20,
            delay_max_ms: 20,
            ..options()
        };

        let id = manager.start_crawl(BASE, locators(), slow).await.unwrap();
        manager.cancel(id).await.unwrap();
        let done = manager.wait(id).await.unwrap();

        assert_eq!(done.status, SessionStatus::Cancelled);
        assert!(done.progress.pages_crawled < 50);
        assert!(manager.export(id).await.is_err());
    }
}
