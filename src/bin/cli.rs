//! jobscout CLI
//!
//! Local execution entry point: analyze a listing page, crawl it with a
//! locator set, or re-validate a saved locator set.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use jobscout::{
    driver::HttpFetcher,
    error::{AppError, Result},
    models::{AnalysisReport, Config, CrawlOptions, ExportFormat, LocatorSet, SessionStatus},
    pipeline::{AnalysisOptions, SessionManager},
    services::{EvidenceProvider, NoEvidence, StaticEvidence},
    storage::LocalStorage,
};

/// jobscout - locator inference and crawl sessions for job listings
#[derive(Parser, Debug)]
#[command(
    name = "jobscout",
    version,
    about = "Infer extraction locators for job-listing pages and crawl them"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "jobscout.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Infer a locator set for a listing page
    Analyze {
        url: String,

        /// Semantic evidence (JSON) to fuse with the page heuristics
        #[arg(long)]
        evidence: Option<PathBuf>,

        /// Skip the screenshot pass
        #[arg(long)]
        no_screenshot: bool,

        /// Write the analysis report here as well
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Crawl a listing with a saved locator set
    Crawl {
        url: String,

        /// Locator set or analysis report (JSON)
        #[arg(short, long)]
        locators: PathBuf,

        #[arg(long)]
        max_pages: Option<u32>,

        #[arg(long)]
        max_jobs: Option<usize>,

        /// Export format
        #[arg(long, value_enum, ignore_case = true)]
        format: Option<ExportFormat>,
    },

    /// Re-validate a saved locator set against a listing
    Validate {
        url: String,

        #[arg(short, long)]
        locators: PathBuf,
    },

    /// Check the configuration file
    Check,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Accepts either a bare locator set or a full analysis report.
fn load_locators(path: &Path) -> Result<LocatorSet> {
    let content = std::fs::read_to_string(path)?;
    if let Ok(report) = serde_json::from_str::<AnalysisReport>(&content) {
        return Ok(report.locators);
    }
    Ok(serde_json::from_str(&content)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    config.validate()?;
    log::info!("Loaded configuration from {}", cli.config.display());

    let evidence: Arc<dyn EvidenceProvider> = match &cli.command {
        Command::Analyze {
            evidence: Some(path),
            ..
        } => Arc::new(StaticEvidence::load(path)?),
        _ => Arc::new(NoEvidence),
    };
    let fetcher = Arc::new(HttpFetcher::new(&config.crawler)?);
    let storage = Arc::new(LocalStorage::new(&config.storage.output_dir));
    let session_defaults = CrawlOptions::from(&config.session);
    let manager = SessionManager::new(config, fetcher.clone(), evidence, fetcher, storage);

    match cli.command {
        Command::Analyze {
            url,
            evidence,
            no_screenshot,
            output,
        } => {
            let options = AnalysisOptions {
                screenshot: !no_screenshot,
                semantic: evidence.is_some(),
            };
            let report = manager.analyze_url(&url, options).await?;

            log::info!("Locator set {}:", report.locators.fingerprint());
            for (field, locator) in report.locators.iter() {
                log::info!("  {field:<16} {locator}");
            }
            log::info!(
                "Confidence {:.3} (stability {:.3} over {} sample page(s))",
                report.confidence.overall_score(),
                report.confidence.multi_page_stability(),
                report.confidence.sampled_pages()
            );

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
                log::info!("Report saved to {}", path.display());
            }
        }

        Command::Crawl {
            url,
            locators,
            max_pages,
            max_jobs,
            format,
        } => {
            let locators = load_locators(&locators)?;
            let options = CrawlOptions {
                max_pages: max_pages.unwrap_or(session_defaults.max_pages),
                max_jobs: max_jobs.unwrap_or(session_defaults.max_jobs),
                export_format: format.unwrap_or(session_defaults.export_format),
                ..session_defaults
            };

            let id = manager.start_crawl(&url, locators, options).await?;
            let done = manager.wait(id).await?;

            log::info!(
                "Session {id} {}: {} page(s), {}/{} job(s) saved, success rate {:.1}%",
                done.status,
                done.progress.pages_crawled,
                done.progress.jobs_saved,
                done.progress.jobs_found,
                done.success_rate * 100.0
            );
            for error in &done.recent_errors {
                log::warn!("  [{:?}] {}", error.kind, error.message);
            }

            if done.status != SessionStatus::Completed {
                let reason = done
                    .failure_reason
                    .unwrap_or_else(|| done.status.to_string());
                return Err(AppError::ExportUnavailable(reason));
            }
        }

        Command::Validate { url, locators } => {
            let locators = load_locators(&locators)?;
            let report = manager.validate(&url, &locators).await?;

            for (field, score) in report.field_scores() {
                log::info!("  {field:<16} {score:.3}");
            }
            log::info!(
                "Overall {:.3}: accuracy {:.3}, stability {:.3}, completeness {:.3}",
                report.overall_score(),
                report.single_page_accuracy(),
                report.multi_page_stability(),
                report.data_completeness()
            );
        }

        Command::Check => {
            log::info!("Config OK");
        }
    }

    Ok(())
}
