// src/pipeline/session.rs

//! The crawl session loop.
//!
//! One iteration extracts the current page, filters and accepts its
//! records, then makes one pagination attempt. The loop ends when there is
//! no next page, a page or job limit is reached, cancellation is observed at
//! an iteration boundary, or the driver fails fatally.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::driver::{BrowserDriver, DriverError, PageSnapshot};
use crate::error::AppError;
use crate::models::{Config, CrawlSession, ErrorKind, Field, SessionSnapshot};
use crate::services::{
    JobExtractor, PaginationController, PaginationOutcome, PaginationState, discover_targets,
};

use super::retry::{Attempt, RetryPolicy};

/// How an iteration ended.
enum Step {
    Continue,
    Finished,
    Crashed(String),
}

/// Where the crawl can resume from when a page cannot be reached.
#[derive(Default)]
struct Walk {
    /// Last page that was extracted, kept while the next one is pending
    last_good: Option<PageSnapshot>,
    /// Pagination index of `last_good`
    last_index: u32,
    /// URL the driver was sent to for the pending page
    arrived_via: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRunner {
    extractor: JobExtractor,
    pagination: PaginationController,
    retry: RetryPolicy,
}

impl SessionRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            extractor: JobExtractor::new(&config.extraction),
            pagination: PaginationController::new(&config.pagination),
            retry: RetryPolicy::from(&config.crawler),
        }
    }

    /// Drive `session` to a terminal state.
    ///
    /// Snapshots are published after start and after every iteration; the
    /// terminal snapshot is left to the caller so it can store the outcome
    /// first.
    pub async fn run(
        &self,
        mut session: CrawlSession,
        driver: &mut dyn BrowserDriver,
        cancel: &CancellationToken,
        progress: &watch::Sender<SessionSnapshot>,
    ) -> CrawlSession {
        if let Err(e) = session.start() {
            log::error!("Session {} cannot start: {e}", session.id());
            return session;
        }
        log::info!("Session {} started on {}", session.id(), session.target_url());
        progress.send_replace(session.snapshot());

        if let Some(field) = session.locators().missing_required() {
            let reason = format!("locator set is unusable: no locator for {field}");
            session.record_error(ErrorKind::LocatorUnresolvable, reason.clone());
            finish_failed(&mut session, reason);
            return session;
        }

        let target = session.target_url().to_string();
        let mut step = match self.navigate(driver, &target).await {
            Attempt::Done(()) => Step::Continue,
            Attempt::Exhausted(e) => {
                // Nothing to paginate from.
                self.skip_page(&mut session, &e);
                progress.send_replace(session.snapshot());
                Step::Finished
            }
            Attempt::Fatal(e) => {
                crashed(&mut session, &e);
                return session;
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        let mut state = PaginationState::default();
        let mut walk = Walk::default();

        while let Step::Continue = step {
            if cancel.is_cancelled() {
                log::info!(
                    "Session {} cancelled after {} page(s)",
                    session.id(),
                    session.progress().pages_crawled
                );
                if let Err(e) = session.cancel() {
                    log::error!("{e}");
                }
                return session;
            }

            step = self
                .iterate(&mut session, driver, &mut state, &mut walk, &mut seen)
                .await;
            progress.send_replace(session.snapshot());
        }

        match step {
            Step::Crashed(reason) => finish_failed(&mut session, reason),
            _ => {
                if let Err(e) = session.complete() {
                    log::error!("{e}");
                }
                log::info!(
                    "Session {} completed: {} page(s), {} skipped, {}/{} job(s) saved",
                    session.id(),
                    session.progress().pages_crawled,
                    session.progress().pages_skipped,
                    session.progress().jobs_saved,
                    session.progress().jobs_found
                );
            }
        }
        session
    }

    async fn iterate(
        &self,
        session: &mut CrawlSession,
        driver: &mut dyn BrowserDriver,
        state: &mut PaginationState,
        walk: &mut Walk,
        seen: &mut HashSet<String>,
    ) -> Step {
        let page = match self.retry.run(driver, |d| d.extract_dom()).await {
            Attempt::Done(page) => page,
            Attempt::Exhausted(e) => {
                self.skip_page(session, &e);
                let Some(last) = walk.last_good.take() else {
                    return Step::Finished;
                };
                let failed = walk.arrived_via.take();
                let step = self
                    .recover(session, driver, &last, walk.last_index, failed, state, &mut walk.arrived_via)
                    .await;
                walk.last_good = Some(last);
                return step;
            }
            Attempt::Fatal(e) => return Step::Crashed(crash_reason(session, &e)),
        };

        session.set_cursor(state.page_index, page.url.clone());
        self.absorb(session, &page, seen);
        session.progress_mut().pages_crawled += 1;
        session.progress_mut().iterations += 1;
        progress_log(session);

        let index = state.page_index;
        walk.last_index = index;
        if self.at_limit(session) {
            return Step::Finished;
        }

        self.pace(session).await;
        let next = session.locators().get(Field::NextPage).map(str::to_string);
        let planned = self.pagination.target(&page, next.as_deref(), index);
        let advanced = self.advance(driver, &page, next.as_deref(), state).await;
        let step = match advanced {
            Attempt::Done(outcome) if outcome.has_next => {
                walk.arrived_via = planned;
                Step::Continue
            }
            Attempt::Done(outcome) => {
                log::debug!("No next page ({:?})", outcome.strategy_used);
                Step::Finished
            }
            Attempt::Exhausted(e) => {
                self.skip_page(session, &e);
                self.recover(session, driver, &page, index, planned, state, &mut walk.arrived_via)
                    .await
            }
            Attempt::Fatal(e) => Step::Crashed(crash_reason(session, &e)),
        };
        walk.last_good = Some(page);
        step
    }

    /// Continue past an unreachable page.
    ///
    /// Walks the later pages advertised by the last extracted page, starting
    /// after `failed`, until one loads. Every page that still cannot be
    /// reached is skipped and consumes an iteration.
    #[allow(clippy::too_many_arguments)]
    async fn recover(
        &self,
        session: &mut CrawlSession,
        driver: &mut dyn BrowserDriver,
        last: &PageSnapshot,
        last_index: u32,
        failed: Option<String>,
        state: &mut PaginationState,
        arrived_via: &mut Option<String>,
    ) -> Step {
        let targets = {
            let document = last.document();
            let next = session.locators().get(Field::NextPage);
            discover_targets(&document, &last.url, next, last_index)
        };
        let first = failed
            .as_ref()
            .and_then(|f| targets.iter().position(|t| t == f))
            .map_or(0, |p| p + 1);

        for (offset, target) in targets.iter().enumerate().skip(first) {
            if self.at_limit(session) {
                return Step::Finished;
            }
            log::info!("Session {} resuming at {target}", session.id());
            match self.navigate(driver, target).await {
                Attempt::Done(()) => {
                    state.page_index = last_index + offset as u32 + 1;
                    state.scroll_attempts = 0;
                    *arrived_via = Some(target.clone());
                    return Step::Continue;
                }
                Attempt::Exhausted(e) => self.skip_page(session, &e),
                Attempt::Fatal(e) => return Step::Crashed(crash_reason(session, &e)),
            }
        }
        Step::Finished
    }

    fn at_limit(&self, session: &CrawlSession) -> bool {
        let progress = session.progress();
        progress.iterations >= session.options().max_pages
            || progress.jobs_saved >= session.options().max_jobs
    }

    async fn navigate(&self, driver: &mut dyn BrowserDriver, url: &str) -> Attempt<()> {
        let url = url.to_string();
        self.retry
            .run(driver, move |d| {
                let url = url.clone();
                Box::pin(async move { d.navigate(&url).await })
            })
            .await
    }

    /// One pagination attempt per try, retried like any other driver call.
    async fn advance(
        &self,
        driver: &mut dyn BrowserDriver,
        page: &PageSnapshot,
        next_locator: Option<&str>,
        state: &mut PaginationState,
    ) -> Attempt<PaginationOutcome> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.pagination.advance(driver, page, next_locator, state).await {
                Ok(outcome) => return Attempt::Done(outcome),
                Err(error) => match self.retry.after_failure(attempt, error) {
                    ControlFlow::Break(outcome) => return outcome,
                    ControlFlow::Continue(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                },
            }
        }
    }

    /// Deduplicate, score and accept the records of one page.
    fn absorb(&self, session: &mut CrawlSession, page: &PageSnapshot, seen: &mut HashSet<String>) {
        let extracted = Url::parse(&page.url)
            .map_err(AppError::from)
            .and_then(|url| self.extractor.extract(&page.document(), &url, session.locators()));
        let extraction = match extracted {
            Ok(extraction) => extraction,
            Err(e) => {
                log::warn!("Extraction failed on {}: {e}", page.url);
                session.record_error(ErrorKind::from(&e), e.to_string());
                return;
            }
        };

        if extraction.lists == 0 {
            let message = format!("{} matched nothing on {}", Field::JobList, page.url);
            log::warn!("{message}");
            session.record_error(ErrorKind::LocatorUnresolvable, message);
        }

        let threshold = session.options().quality_threshold;
        let max_jobs = session.options().max_jobs;
        let mut accepted = Vec::new();
        for record in extraction.records {
            if !seen.insert(record.dedup_key()) {
                session.progress_mut().duplicates += 1;
                continue;
            }
            session.progress_mut().jobs_found += 1;
            if !record.passes(threshold) {
                log::debug!(
                    "Rejected '{}' (quality {:.2} < {threshold})",
                    record.title,
                    record.quality_score
                );
                session.progress_mut().jobs_rejected += 1;
                continue;
            }
            if session.progress().jobs_saved + accepted.len() < max_jobs {
                accepted.push(record);
            }
        }
        session.accept(accepted);
    }

    /// Uniform delay before the next page fetch.
    async fn pace(&self, session: &CrawlSession) {
        let (min, max) = (session.options().delay_min_ms, session.options().delay_max_ms);
        let millis = if max > min { fastrand::u64(min..=max) } else { min };
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn skip_page(&self, session: &mut CrawlSession, error: &DriverError) {
        log::warn!(
            "Skipping page {} of session {}: {error}",
            session.cursor().index,
            session.id()
        );
        session.progress_mut().pages_skipped += 1;
        session.progress_mut().iterations += 1;
        session.record_error(ErrorKind::NavigationFailure, error.to_string());
    }
}

fn progress_log(session: &CrawlSession) {
    let p = session.progress();
    log::debug!(
        "Session {} iteration {}: crawled {}, found {}, saved {}, rejected {}",
        session.id(),
        p.iterations,
        p.pages_crawled,
        p.jobs_found,
        p.jobs_saved,
        p.jobs_rejected
    );
}

fn crash_reason(session: &mut CrawlSession, error: &DriverError) -> String {
    session.record_error(ErrorKind::DriverCrash, error.to_string());
    format!("browser driver crashed: {}", error.message)
}

fn crashed(session: &mut CrawlSession, error: &DriverError) {
    let reason = crash_reason(session, error);
    finish_failed(session, reason);
}

fn finish_failed(session: &mut CrawlSession, reason: String) {
    log::error!("Session {} failed: {reason}", session.id());
    if let Err(e) = session.fail(reason) {
        log::error!("{e}");
    }
}
