use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Semaphore;

use crate::search::SearchEngine;

/// Sheet column indices (0-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub company: u16,
    pub legal: u16,
    pub email: u16,
    pub website: u16,
    pub remark: u16,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            company: 1,
            legal: 2,
            email: 4,
            website: 5,
            remark: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub timeout: Duration,

    pub input_file: PathBuf,
    /// Mirror path for the updated workbook; `None` rewrites `input_file`.
    pub output_workbook: Option<PathBuf>,
    pub output_csv: PathBuf,
    pub progress_file: PathBuf,

    pub proxy_api_url: String,
    pub proxy_pool_min_size: usize,
    pub proxy_pool_poll: Duration,
    pub proxy_ready_timeout: Duration,
    pub proxy_max_transport_failures: u32,

    pub search_engine: SearchEngine,
    pub search_domain: String,
    pub monitor_interval: Duration,
    pub columns: Columns,
    /// Raw search pages and a company export are written here when set.
    pub debug_dump_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 3,
            min_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(4000),
            max_retries: 2,
            timeout: Duration::from_millis(15000),
            input_file: PathBuf::from("faren.xlsx"),
            output_workbook: None,
            output_csv: PathBuf::from("results.csv"),
            progress_file: PathBuf::from("progress.txt"),
            proxy_api_url: String::new(),
            proxy_pool_min_size: 1,
            proxy_pool_poll: Duration::from_millis(5000),
            proxy_ready_timeout: Duration::from_millis(60000),
            proxy_max_transport_failures: 0,
            search_engine: SearchEngine::Google,
            search_domain: SearchEngine::Google.default_domain().to_string(),
            monitor_interval: Duration::from_millis(10000),
            columns: Columns::default(),
            debug_dump_dir: None,
        }
    }
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {}: {} ({})", key, raw, e)),
        _ => Ok(default),
    }
}

fn millis(key: &str, default: Duration) -> Result<Duration> {
    parsed(key, default.as_millis() as u64).map(Duration::from_millis)
}

fn path(key: &str, default: PathBuf) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}

/// Largest worker count the dispatcher's semaphore can hand out at once.
pub fn max_concurrency() -> usize {
    Semaphore::MAX_PERMITS.min(u32::MAX as usize)
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let d = Config::default();

        let search_engine: SearchEngine = parsed("SEARCH_ENGINE", d.search_engine)?;
        let search_domain = env::var("SEARCH_DOMAIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| search_engine.default_domain().to_string());

        let proxy_api_url = env::var("PROXY_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .context("PROXY_API_URL must be set")?;

        let config = Config {
            concurrency: parsed("CONCURRENCY", d.concurrency)?,
            min_delay: millis("MIN_DELAY_MS", d.min_delay)?,
            max_delay: millis("MAX_DELAY_MS", d.max_delay)?,
            max_retries: parsed("MAX_RETRIES", d.max_retries)?,
            timeout: millis("TIMEOUT_MS", d.timeout)?,
            input_file: path("INPUT_FILE", d.input_file),
            output_workbook: env::var("OUTPUT_WORKBOOK")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            output_csv: path("OUTPUT_CSV", d.output_csv),
            progress_file: path("PROGRESS_FILE", d.progress_file),
            proxy_api_url,
            proxy_pool_min_size: parsed("PROXY_POOL_MIN_SIZE", d.proxy_pool_min_size)?,
            proxy_pool_poll: millis("PROXY_POOL_POLL_MS", d.proxy_pool_poll)?,
            proxy_ready_timeout: millis("PROXY_READY_TIMEOUT_MS", d.proxy_ready_timeout)?,
            proxy_max_transport_failures: parsed(
                "PROXY_MAX_TRANSPORT_FAILURES",
                d.proxy_max_transport_failures,
            )?,
            search_engine,
            search_domain,
            monitor_interval: millis("MONITOR_INTERVAL_MS", d.monitor_interval)?,
            columns: Columns {
                company: parsed("COMPANY_COLUMN", d.columns.company)?,
                legal: parsed("LEGAL_COLUMN", d.columns.legal)?,
                email: parsed("EMAIL_COLUMN", d.columns.email)?,
                website: parsed("WEBSITE_COLUMN", d.columns.website)?,
                remark: parsed("REMARK_COLUMN", d.columns.remark)?,
            },
            debug_dump_dir: env::var("DEBUG_DUMP_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        };
        Ok(config.sanitized())
    }

    /// Clamps values that would stall or break the pipeline.
    pub fn sanitized(mut self) -> Self {
        self.concurrency = self.concurrency.clamp(1, max_concurrency());
        self.max_retries = self.max_retries.max(1);
        if self.min_delay > self.max_delay {
            std::mem::swap(&mut self.min_delay, &mut self.max_delay);
        }
        if self.monitor_interval.is_zero() {
            self.monitor_interval = Duration::from_millis(10000);
        }
        self
    }

    /// Where the updated workbook is written at the end of a run.
    pub fn workbook_target(&self) -> &PathBuf {
        self.output_workbook.as_ref().unwrap_or(&self.input_file)
    }
}
