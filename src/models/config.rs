//! Application configuration structures.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

use super::{ExportFormat, ScoreWeights};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Driver and request behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Default crawl session policy
    #[serde(default)]
    pub session: SessionConfig,

    /// Candidate fusion weights and visual clustering
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Locator validation sampling
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Pagination strategies
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Record extraction
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Result persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::validation("crawler.user_agent is empty"));
        }
        if self.crawler.user_agent_rotation
            && self.crawler.user_agents.iter().all(|ua| ua.trim().is_empty())
        {
            return Err(AppError::validation(
                "crawler.user_agents is empty but rotation is enabled",
            ));
        }
        if self.crawler.timeout_secs == 0 {
            return Err(AppError::validation("crawler.timeout_secs must be > 0"));
        }
        if self.crawler.max_concurrent_sessions == 0 {
            return Err(AppError::validation(
                "crawler.max_concurrent_sessions must be > 0",
            ));
        }
        if self.session.max_pages == 0 {
            return Err(AppError::validation("session.max_pages must be > 0"));
        }
        if self.session.delay_min_ms > self.session.delay_max_ms {
            return Err(AppError::validation(
                "session.delay_min_ms must not exceed session.delay_max_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.session.quality_threshold) {
            return Err(AppError::validation(
                "session.quality_threshold must be within [0, 1]",
            ));
        }
        let f = &self.fusion;
        if [f.semantic_weight, f.heuristic_weight, f.visual_weight]
            .iter()
            .any(|w| *w < 0.0)
            || f.semantic_weight + f.heuristic_weight <= 0.0
        {
            return Err(AppError::validation(
                "fusion weights must be >= 0 and semantic + heuristic > 0",
            ));
        }
        if f.min_visual_repeats < 3 {
            return Err(AppError::validation("fusion.min_visual_repeats must be >= 3"));
        }
        let v = &self.validation;
        if v.fan_out == 0 {
            return Err(AppError::validation("validation.fan_out must be > 0"));
        }
        if v.accuracy_weight + v.stability_weight + v.completeness_weight <= 0.0 {
            return Err(AppError::validation("validation weights must not all be 0"));
        }
        if self.storage.output_dir.trim().is_empty() {
            return Err(AppError::validation("storage.output_dir is empty"));
        }
        Ok(())
    }
}

/// Driver and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Pool drawn from once per launched driver when rotation is on
    #[serde(default = "defaults::user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "defaults::user_agent_rotation")]
    pub user_agent_rotation: bool,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Sessions allowed to run at once; further starts queue
    #[serde(default = "defaults::max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    /// Retries of a retryable driver failure before the page is skipped
    #[serde(default = "defaults::retry_limit")]
    pub retry_limit: u32,

    /// Base delay between retries in milliseconds (multiplied by attempt)
    #[serde(default = "defaults::retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            user_agents: defaults::user_agents(),
            user_agent_rotation: defaults::user_agent_rotation(),
            timeout_secs: defaults::timeout(),
            max_concurrent_sessions: defaults::max_concurrent_sessions(),
            retry_limit: defaults::retry_limit(),
            retry_delay_ms: defaults::retry_delay(),
        }
    }
}

/// Default limits of a crawl session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "defaults::max_pages")]
    pub max_pages: u32,

    #[serde(default = "defaults::max_jobs")]
    pub max_jobs: usize,

    /// Lower bound of the delay between page fetches
    #[serde(default = "defaults::delay_min")]
    pub delay_min_ms: u64,

    /// Upper bound of the delay between page fetches
    #[serde(default = "defaults::delay_max")]
    pub delay_max_ms: u64,

    /// Records scoring below this are dropped
    #[serde(default = "defaults::quality_threshold")]
    pub quality_threshold: f64,

    #[serde(default)]
    pub export_format: ExportFormat,

    /// Capacity of the recent-error ring
    #[serde(default = "defaults::error_log_capacity")]
    pub error_log_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_pages: defaults::max_pages(),
            max_jobs: defaults::max_jobs(),
            delay_min_ms: defaults::delay_min(),
            delay_max_ms: defaults::delay_max(),
            quality_threshold: defaults::quality_threshold(),
            export_format: ExportFormat::default(),
            error_log_capacity: defaults::error_log_capacity(),
        }
    }
}

/// Weighted-vote settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default = "defaults::semantic_weight")]
    pub semantic_weight: f64,

    #[serde(default = "defaults::heuristic_weight")]
    pub heuristic_weight: f64,

    /// Only applied to list/item fields
    #[serde(default = "defaults::visual_weight")]
    pub visual_weight: f64,

    /// Minimum repeats of a box before it counts as a list item
    #[serde(default = "defaults::min_visual_repeats")]
    pub min_visual_repeats: usize,

    /// Relative deviation allowed in stride and height
    #[serde(default = "defaults::stride_tolerance")]
    pub stride_tolerance: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            semantic_weight: defaults::semantic_weight(),
            heuristic_weight: defaults::heuristic_weight(),
            visual_weight: defaults::visual_weight(),
            min_visual_repeats: defaults::min_visual_repeats(),
            stride_tolerance: defaults::stride_tolerance(),
        }
    }
}

/// Validation sampling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Additional pages re-checked for stability
    #[serde(default = "defaults::sample_pages")]
    pub sample_pages: usize,

    /// Concurrent sample fetches
    #[serde(default = "defaults::fan_out")]
    pub fan_out: usize,

    /// Allowed relative item-count deviation from the first page
    #[serde(default = "defaults::item_count_tolerance")]
    pub item_count_tolerance: f64,

    #[serde(default = "defaults::accuracy_weight")]
    pub accuracy_weight: f64,

    #[serde(default = "defaults::stability_weight")]
    pub stability_weight: f64,

    #[serde(default = "defaults::completeness_weight")]
    pub completeness_weight: f64,
}

impl ValidationConfig {
    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            accuracy: self.accuracy_weight,
            stability: self.stability_weight,
            completeness: self.completeness_weight,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            sample_pages: defaults::sample_pages(),
            fan_out: defaults::fan_out(),
            item_count_tolerance: defaults::item_count_tolerance(),
            accuracy_weight: defaults::accuracy_weight(),
            stability_weight: defaults::stability_weight(),
            completeness_weight: defaults::completeness_weight(),
        }
    }
}

/// Pagination strategy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    /// Try scroll-triggered loading when no link or numbered control exists
    #[serde(default)]
    pub infinite_scroll: bool,

    /// Extra height samples after a scroll before giving up
    #[serde(default = "defaults::scroll_retries")]
    pub scroll_retries: u32,

    /// Minimum content growth that counts as new content
    #[serde(default = "defaults::min_scroll_delta")]
    pub min_scroll_delta: u64,

    #[serde(default = "defaults::scroll_wait")]
    pub scroll_wait_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            infinite_scroll: false,
            scroll_retries: defaults::scroll_retries(),
            min_scroll_delta: defaults::min_scroll_delta(),
            scroll_wait_ms: defaults::scroll_wait(),
        }
    }
}

/// Record extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Keywords turned into skill tags
    #[serde(default = "defaults::skill_keywords")]
    pub skill_keywords: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            skill_keywords: defaults::skill_keywords(),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::output_dir")]
    pub output_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: defaults::output_dir(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; jobscout/0.1)".into()
    }
    pub fn user_agents() -> Vec<String> {
        [
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn user_agent_rotation() -> bool {
        true
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn max_concurrent_sessions() -> usize {
        5
    }
    pub fn retry_limit() -> u32 {
        3
    }
    pub fn retry_delay() -> u64 {
        500
    }

    // Session defaults
    pub fn max_pages() -> u32 {
        10
    }
    pub fn max_jobs() -> usize {
        1000
    }
    pub fn delay_min() -> u64 {
        1000
    }
    pub fn delay_max() -> u64 {
        3000
    }
    pub fn quality_threshold() -> f64 {
        0.7
    }
    pub fn error_log_capacity() -> usize {
        50
    }

    // Fusion defaults
    pub fn semantic_weight() -> f64 {
        0.5
    }
    pub fn heuristic_weight() -> f64 {
        0.3
    }
    pub fn visual_weight() -> f64 {
        0.2
    }
    pub fn min_visual_repeats() -> usize {
        3
    }
    pub fn stride_tolerance() -> f64 {
        0.15
    }

    // Validation defaults
    pub fn sample_pages() -> usize {
        3
    }
    pub fn fan_out() -> usize {
        3
    }
    pub fn item_count_tolerance() -> f64 {
        0.5
    }
    pub fn accuracy_weight() -> f64 {
        0.4
    }
    pub fn stability_weight() -> f64 {
        0.4
    }
    pub fn completeness_weight() -> f64 {
        0.2
    }

    // Pagination defaults
    pub fn scroll_retries() -> u32 {
        2
    }
    pub fn min_scroll_delta() -> u64 {
        200
    }
    pub fn scroll_wait() -> u64 {
        500
    }

    // Extraction defaults
    pub fn skill_keywords() -> Vec<String> {
        [
            "rust", "python", "java", "javascript", "typescript", "go", "golang", "c++",
            "c#", "sql", "postgresql", "mysql", "redis", "kafka", "aws", "gcp", "azure",
            "docker", "kubernetes", "linux", "react", "vue", "angular", "node.js",
            "spark", "tensorflow", "pytorch", "machine learning", "data analysis",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    // Storage defaults
    pub fn output_dir() -> String {
        "output".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_rotation_without_pool() {
        let mut config = Config::default();
        config.crawler.user_agents = vec![String::new()];
        assert!(config.validate().is_err());
        config.crawler.user_agent_rotation = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.crawler.max_concurrent_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_delays() {
        let mut config = Config::default();
        config.session.delay_min_ms = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.session.quality_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [session]
            max_pages = 3
            export_format = "csv"

            [fusion]
            visual_weight = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.session.max_pages, 3);
        assert_eq!(config.session.export_format, ExportFormat::Csv);
        assert_eq!(config.session.quality_threshold, 0.7);
        assert_eq!(config.fusion.semantic_weight, 0.5);
        assert_eq!(config.fusion.visual_weight, 0.0);
        assert_eq!(config.validation.sample_pages, 3);
        assert!(config.crawler.user_agent_rotation);
        assert_eq!(config.crawler.user_agents.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_or_default_falls_back() {
        let config = Config::load_or_default("/definitely/not/here.toml");
        assert_eq!(config.crawler.max_concurrent_sessions, 5);
    }
}
