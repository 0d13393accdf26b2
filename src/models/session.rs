// src/models/session.rs

//! Crawl session state, progress counters and snapshots.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::{JobRecord, LocatorSet, SessionConfig};

/// Lifecycle state of a crawl session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of the final export artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

/// Per-session crawl limits and policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlOptions {
    pub max_pages: u32,
    pub max_jobs: usize,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub quality_threshold: f64,
    pub export_format: ExportFormat,
}

impl From<&SessionConfig> for CrawlOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            max_pages: config.max_pages,
            max_jobs: config.max_jobs,
            delay_min_ms: config.delay_min_ms,
            delay_max_ms: config.delay_max_ms,
            quality_threshold: config.quality_threshold,
            export_format: config.export_format,
        }
    }
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl CrawlOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_pages == 0 {
            return Err(AppError::validation("max_pages must be > 0"));
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(AppError::validation("delay_min_ms must not exceed delay_max_ms"));
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(AppError::validation("quality_threshold must be within [0, 1]"));
        }
        Ok(())
    }
}

/// Progress counters of a running session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub max_pages: u32,
    pub iterations: u32,
    pub pages_crawled: u32,
    pub pages_skipped: u32,
    pub jobs_found: usize,
    pub jobs_saved: usize,
    pub jobs_rejected: usize,
    pub duplicates: usize,
    pub errors_count: usize,
}

impl Progress {
    /// Saved over found; zero before anything was found.
    pub fn success_rate(&self) -> f64 {
        if self.jobs_found == 0 {
            0.0
        } else {
            self.jobs_saved as f64 / self.jobs_found as f64
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        if self.max_pages == 0 {
            0.0
        } else {
            (self.pages_crawled as f64 / self.max_pages as f64 * 100.0).min(100.0)
        }
    }
}

/// Position of the session within the paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// 1-based page index
    pub index: u32,
    pub url: String,
}

/// Kind of a logged session error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EvidenceUnavailable,
    LocatorUnresolvable,
    NavigationFailure,
    DriverCrash,
    Internal,
}

impl From<&AppError> for ErrorKind {
    fn from(error: &AppError) -> Self {
        match error {
            AppError::EvidenceUnavailable(_) => Self::EvidenceUnavailable,
            AppError::LocatorUnresolvable { .. } => Self::LocatorUnresolvable,
            AppError::NavigationFailure { .. } | AppError::Http(_) => Self::NavigationFailure,
            AppError::DriverCrash(_) => Self::DriverCrash,
            AppError::Driver(e) if e.is_crash() => Self::DriverCrash,
            AppError::Driver(_) => Self::NavigationFailure,
            _ => Self::Internal,
        }
    }
}

/// One entry of the recent-error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionError {
    pub at: DateTime<Utc>,
    pub page: u32,
    pub kind: ErrorKind,
    pub message: String,
}

/// Bounded log of recent errors; the oldest entry is dropped past capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLog {
    capacity: usize,
    entries: VecDeque<SessionError>,
    total: usize,
}

impl ErrorLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, error: SessionError) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(error);
        self.total += 1;
    }

    /// Errors ever recorded, including dropped ones.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn recent(&self) -> Vec<SessionError> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::with_capacity(50)
    }
}

/// The unit of orchestration, exclusively owned by its control loop.
#[derive(Debug, Clone)]
pub struct CrawlSession {
    id: Uuid,
    target_url: String,
    locators: LocatorSet,
    options: CrawlOptions,
    status: SessionStatus,
    progress: Progress,
    cursor: PageCursor,
    errors: ErrorLog,
    records: Vec<JobRecord>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl CrawlSession {
    pub fn new(
        target_url: impl Into<String>,
        locators: LocatorSet,
        options: CrawlOptions,
        error_capacity: usize,
    ) -> Self {
        let target_url = target_url.into();
        Self {
            id: Uuid::new_v4(),
            cursor: PageCursor {
                index: 1,
                url: target_url.clone(),
            },
            target_url,
            locators,
            progress: Progress {
                max_pages: options.max_pages,
                ..Progress::default()
            },
            options,
            status: SessionStatus::Created,
            errors: ErrorLog::with_capacity(error_capacity),
            records: Vec::new(),
            failure_reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn locators(&self) -> &LocatorSet {
        &self.locators
    }

    pub fn options(&self) -> &CrawlOptions {
        &self.options
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    pub fn set_cursor(&mut self, index: u32, url: impl Into<String>) {
        self.cursor = PageCursor {
            index,
            url: url.into(),
        };
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Append accepted records and count them as saved.
    pub fn accept(&mut self, records: impl IntoIterator<Item = JobRecord>) {
        for record in records {
            self.records.push(record);
            self.progress.jobs_saved += 1;
        }
    }

    /// Record an error in the bounded log.
    pub fn record_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.errors.push(SessionError {
            at: Utc::now(),
            page: self.cursor.index,
            kind,
            message: message.into(),
        });
        self.progress.errors_count = self.errors.total();
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    /// `created → running`
    pub fn start(&mut self) -> Result<()> {
        self.transition(SessionStatus::Running, &[SessionStatus::Created])?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `running → completed`; requires at least one iteration.
    pub fn complete(&mut self) -> Result<()> {
        if self.status == SessionStatus::Running && self.progress.iterations == 0 {
            return Err(AppError::transition(
                "running (no iterations)",
                SessionStatus::Completed,
            ));
        }
        self.transition(SessionStatus::Completed, &[SessionStatus::Running])?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `running → failed`, preserving the reason.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(SessionStatus::Failed, &[SessionStatus::Running])?;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// `running → cancelled`
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(SessionStatus::Cancelled, &[SessionStatus::Running])?;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: SessionStatus, allowed_from: &[SessionStatus]) -> Result<()> {
        if !allowed_from.contains(&self.status) {
            return Err(AppError::transition(self.status, to));
        }
        log::debug!("Session {}: {} -> {}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }

    /// Copy of the externally visible state.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            target_url: self.target_url.clone(),
            status: self.status,
            progress: self.progress.clone(),
            success_rate: self.progress.success_rate(),
            progress_percentage: self.progress.progress_percentage(),
            cursor: self.cursor.clone(),
            recent_errors: self.errors.recent(),
            failure_reason: self.failure_reason.clone(),
            locator_fingerprint: self.locators.fingerprint(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_secs: match (self.started_at, self.finished_at) {
                (Some(start), Some(end)) => Some((end - start).num_seconds().max(0)),
                _ => None,
            },
        }
    }
}

/// Immutable point-in-time view of a session for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub target_url: String,
    pub status: SessionStatus,
    pub progress: Progress,
    pub success_rate: f64,
    pub progress_percentage: f64,
    pub cursor: PageCursor,
    pub recent_errors: Vec<SessionError>,
    pub failure_reason: Option<String>,
    pub locator_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}
