//! Bounded worker pool driving every pending company through the worker
//! state machine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::csv_sink::CsvSink;
use crate::fetcher::PageFetcher;
use crate::model::{CompanyInput, EnrichedRow};
use crate::monitor;
use crate::progress::ProgressStore;
use crate::proxy::ProxyPool;
use crate::search::SearchAdapter;
use crate::worker;

#[derive(Debug, Default)]
pub struct Counters {
    processed: AtomicUsize,
    success: AtomicUsize,
    fail: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub processed: usize,
    pub success: usize,
    pub fail: usize,
}

impl Counters {
    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail(&self) {
        self.fail.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            fail: self.fail.load(Ordering::Relaxed),
        }
    }
}

/// Everything a worker needs, shared by reference across tasks.
pub struct PipelineContext {
    pub config: Config,
    pub pool: Arc<ProxyPool>,
    pub progress: Arc<ProgressStore>,
    pub sink: Arc<CsvSink>,
    pub search: Arc<dyn SearchAdapter>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub counters: Counters,
    pub shutdown: CancellationToken,
    results: Mutex<Vec<EnrichedRow>>,
}

impl PipelineContext {
    pub fn new(
        config: Config,
        pool: Arc<ProxyPool>,
        progress: Arc<ProgressStore>,
        sink: Arc<CsvSink>,
        search: Arc<dyn SearchAdapter>,
        fetcher: Arc<dyn PageFetcher>,
    ) -> Self {
        Self {
            config,
            pool,
            progress,
            sink,
            search,
            fetcher,
            counters: Counters::default(),
            shutdown: CancellationToken::new(),
            results: Mutex::new(Vec::new()),
        }
    }

    pub fn random_delay(&self) -> Duration {
        let min = self.config.min_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Sleeps a random delay in the configured range; returns early on shutdown.
    pub async fn pause(&self) {
        let delay = self.random_delay();
        if delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = sleep(delay) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    pub fn record(&self, row: EnrichedRow) {
        self.results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(row);
    }

    /// Drains collected rows. Meant to be called after [`run`] returns.
    pub fn take_results(&self) -> Vec<EnrichedRow> {
        std::mem::take(&mut *self.results.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub pending: usize,
    pub skipped: usize,
    pub counters: CounterSnapshot,
    pub elapsed: Duration,
}

/// Processes every company not already in the progress store, with at most
/// `config.concurrency` companies in flight. Returns once all dispatched
/// workers have finished.
pub async fn run(ctx: Arc<PipelineContext>, companies: Vec<CompanyInput>) -> RunSummary {
    let started = Instant::now();
    let total_input = companies.len();
    let pending: Vec<CompanyInput> = companies
        .into_iter()
        .filter(|c| !ctx.progress.contains(&c.name))
        .collect();
    let total = pending.len();
    let skipped = total_input - total;
    info!("Companies to process: {} (skipped {} already done)", total, skipped);

    let concurrency = ctx.config.concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let reporter = monitor::spawn(ctx.clone(), total);
    let mut workers = JoinSet::new();

    for company in pending {
        let permit = tokio::select! {
            biased;
            _ = ctx.shutdown.cancelled() => {
                warn!("Shutdown requested, no further companies will be dispatched");
                break;
            }
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let ctx = ctx.clone();
        workers.spawn(async move {
            let _permit = permit;
            worker::process_company(&ctx, company).await;
        });
    }

    // all permits back means no worker is in flight
    let _quiescent = semaphore.acquire_many(concurrency as u32).await;
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Worker task failed: {}", e);
        }
    }
    reporter.abort();

    let counters = ctx.counters.snapshot();
    RunSummary {
        pending: total,
        skipped,
        counters,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, SearchError};
    use crate::model::SearchResult;
    use crate::proxy::Proxy;
    use crate::search::{GoogleSearch, SearchEngine};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::path::Path;

    /// Serves canned bodies per URL; unknown URLs answer 404.
    #[derive(Default)]
    struct RoutedFetcher {
        routes: Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl RoutedFetcher {
        fn route(&self, url: &str, body: Result<String, FetchError>) {
            self.routes
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(body);
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for RoutedFetcher {
        async fn fetch(&self, url: &str, proxy: Option<&Proxy>) -> Result<String, FetchError> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), proxy.map(|p| p.endpoint())));
            self.routes
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|q| q.pop_front())
                .unwrap_or(Err(FetchError::Status(404)))
        }
    }

    fn google_page(results: &[(&str, &str)]) -> String {
        let blocks: String = results
            .iter()
            .map(|(title, url)| format!(r#"<div class="g"><a href="{url}"><h3>{title}</h3></a></div>"#))
            .collect();
        format!("<html><body><div id=\"search\">{blocks}</div></body></html>")
    }

    fn google_url(query: &str) -> String {
        GoogleSearch::new("www.google.com", Arc::new(RoutedFetcher::default())).query_url(query)
    }

    fn company(name: &str, row: u32) -> CompanyInput {
        CompanyInput {
            name: name.to_string(),
            legal: String::new(),
            row_index: row,
        }
    }

    fn proxies(n: usize) -> Vec<Proxy> {
        (0..n)
            .map(|i| Proxy::parse(&format!("10.0.0.{}:3128", i + 1)).unwrap())
            .collect()
    }

    async fn context(
        dir: &Path,
        search: Arc<dyn SearchAdapter>,
        fetcher: Arc<dyn PageFetcher>,
        pool_size: usize,
        concurrency: usize,
    ) -> Arc<PipelineContext> {
        let config = Config {
            concurrency,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            output_csv: dir.join("results.csv"),
            progress_file: dir.join("progress.txt"),
            monitor_interval: Duration::from_millis(20),
            ..Config::default()
        };
        let pool = Arc::new(ProxyPool::from_proxies(proxies(pool_size), 0));
        let progress = Arc::new(ProgressStore::load(&config.progress_file).await);
        let sink = Arc::new(CsvSink::open(&config.output_csv).await.unwrap());
        Arc::new(PipelineContext::new(config, pool, progress, sink, search, fetcher))
    }

    async fn google_context(dir: &Path, fetcher: Arc<RoutedFetcher>, pool_size: usize) -> Arc<PipelineContext> {
        let search = SearchEngine::Google.build("www.google.com", fetcher.clone(), None);
        context(dir, search, fetcher, pool_size, 3).await
    }

    fn csv_rows(dir: &Path) -> Vec<String> {
        let text = std::fs::read_to_string(dir.join("results.csv")).unwrap();
        text.trim_start_matches('\u{FEFF}').lines().skip(1).map(str::to_string).collect()
    }

    #[tokio::test]
    async fn exact_match_extracts_emails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        fetcher.route(
            &google_url("台積電股份有限公司"),
            Ok(google_page(&[("台積電股份有限公司 - 官方網站", "https://www.tsmc.com")])),
        );
        fetcher.route(
            "https://www.tsmc.com",
            Ok("<p>Contact: contact@tsmc.com</p><img alt=\"logo.png@tsmc.com\"><p>logo.png@tsmc.com</p>".into()),
        );
        let ctx = google_context(dir.path(), fetcher.clone(), 2).await;

        let summary = run(ctx.clone(), vec![company("台積電股份有限公司", 1)]).await;
        assert_eq!(summary.counters.success, 1);
        assert_eq!(summary.counters.fail, 0);
        assert_eq!(summary.counters.processed, 1);

        assert_eq!(
            csv_rows(dir.path()),
            vec!["\"台積電股份有限公司\",\"contact@tsmc.com\",\"\",\"https://www.tsmc.com\",\"已找到\""]
        );
        assert!(ctx.progress.contains("台積電股份有限公司"));

        let rows = ctx.take_results();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].output.emails, vec!["contact@tsmc.com"]);
        // landing page fetched through a proxy
        let calls = fetcher.calls();
        assert!(calls.iter().any(|(u, p)| u == "https://www.tsmc.com" && p.is_some()));
    }

    #[tokio::test]
    async fn suffix_stripped_match_counts_as_success_without_emails() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        fetcher.route(
            &google_url("鴻海精密工業股份有限公司"),
            Ok(google_page(&[("鴻海精密 | Foxconn", "https://www.foxconn.com")])),
        );
        // landing page is not routed: the fetch fails with 404
        let ctx = google_context(dir.path(), fetcher, 1).await;

        let summary = run(ctx.clone(), vec![company("鴻海精密工業股份有限公司", 1)]).await;
        assert_eq!(summary.counters.success, 1);
        let rows = ctx.take_results();
        assert_eq!(rows[0].output.website, "https://www.foxconn.com");
        assert!(rows[0].output.emails.is_empty());
        assert!(csv_rows(dir.path())[0].ends_with("\"已找到\""));
    }

    #[tokio::test]
    async fn unmatched_company_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        fetcher.route(
            &google_url("無此公司"),
            Ok(google_page(&[("Random site", "https://example.com")])),
        );
        let ctx = google_context(dir.path(), fetcher, 1).await;

        let summary = run(ctx.clone(), vec![company("無此公司", 1)]).await;
        assert_eq!(summary.counters.fail, 1);
        assert_eq!(summary.counters.success, 0);
        assert_eq!(
            csv_rows(dir.path()),
            vec!["\"無此公司\",\"\",\"\",\"未找到匹配\",\"未找到官网\""]
        );
        assert!(ctx.progress.contains("無此公司"));
    }

    #[tokio::test]
    async fn blocked_proxy_is_retired_and_search_retried() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        let url = google_url("台積電股份有限公司");
        fetcher.route(&url, Ok("<html><body>Our systems have detected unusual traffic</body></html>".into()));
        fetcher.route(&url, Ok(google_page(&[("台積電股份有限公司", "https://www.tsmc.com")])));
        let ctx = google_context(dir.path(), fetcher.clone(), 2).await;
        assert_eq!(ctx.pool.healthy(), 2);

        let summary = run(ctx.clone(), vec![company("台積電股份有限公司", 1)]).await;
        assert_eq!(summary.counters.success, 1);
        assert_eq!(ctx.pool.healthy(), 1);

        let search_proxies: Vec<Option<String>> = fetcher
            .calls()
            .into_iter()
            .filter(|(u, _)| *u == url)
            .map(|(_, p)| p)
            .collect();
        assert_eq!(search_proxies.len(), 2);
        assert_ne!(search_proxies[0], search_proxies[1]);
    }

    #[tokio::test]
    async fn exhausted_pool_fails_fast_but_every_company_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        fetcher.route(&google_url("甲公司"), Ok("<p>captcha</p>".into()));
        let search = SearchEngine::Google.build("www.google.com", fetcher.clone(), None);
        let ctx = context(dir.path(), search, fetcher.clone(), 1, 1).await;

        let summary = run(ctx.clone(), vec![company("甲公司", 1), company("乙公司", 2)]).await;
        assert_eq!(summary.counters.fail, 2);
        assert_eq!(summary.counters.processed, 2);
        assert_eq!(ctx.pool.healthy(), 0);
        assert_eq!(csv_rows(dir.path()).len(), 2);
        // the second company never reached the network
        assert!(fetcher.calls().iter().all(|(u, _)| *u == google_url("甲公司")));
    }

    #[tokio::test]
    async fn resume_skips_completed_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("progress.txt"), "A\nB\n").unwrap();
        std::fs::write(
            dir.path().join("results.csv"),
            "\u{FEFF}公司名称,邮箱,法人,官网,备注\n\"A\",\"\",\"\",\"未找到匹配\",\"未找到官网\"\n",
        )
        .unwrap();

        let fetcher = Arc::new(RoutedFetcher::default());
        let ctx = google_context(dir.path(), fetcher.clone(), 1).await;
        let summary = run(ctx.clone(), vec![company("A", 1), company("B", 2), company("C", 3)]).await;

        assert_eq!(summary.pending, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.counters.processed, 1);
        let searched: HashSet<String> = fetcher.calls().into_iter().map(|(u, _)| u).collect();
        assert_eq!(searched, HashSet::from([google_url("C")]));

        let rows = csv_rows(dir.path());
        assert_eq!(rows.len(), 2);
        assert!(rows[0].starts_with("\"A\""));
        assert!(rows[1].starts_with("\"C\""));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("progress.txt")).unwrap(),
            "A\nB\nC\n"
        );
    }

    #[tokio::test]
    async fn second_run_is_a_no_op_and_progress_implies_csv_row() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        let names = ["甲", "乙", "丙", "丁", "戊"];
        let inputs: Vec<CompanyInput> = names
            .iter()
            .enumerate()
            .map(|(i, n)| company(n, i as u32 + 1))
            .collect();

        let ctx = google_context(dir.path(), fetcher.clone(), 2).await;
        run(ctx, inputs.clone()).await;

        let progress = std::fs::read_to_string(dir.path().join("progress.txt")).unwrap();
        let done: HashSet<&str> = progress.lines().collect();
        assert_eq!(done, names.iter().copied().collect());
        let rows = csv_rows(dir.path());
        for name in &done {
            assert!(rows.iter().any(|r| r.starts_with(&format!("\"{}\"", name))));
        }

        let calls_before = fetcher.calls().len();
        let ctx = google_context(dir.path(), fetcher.clone(), 2).await;
        let summary = run(ctx, inputs).await;
        assert_eq!(summary.pending, 0);
        assert_eq!(fetcher.calls().len(), calls_before);
    }

    /// Search stub that tracks how many searches run at once.
    #[derive(Default)]
    struct SlowSearch {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SearchAdapter for SlowSearch {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn search(&self, _query: &str, _proxy: &Proxy) -> Result<Vec<SearchResult>, SearchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![SearchResult::new("unrelated", "https://unrelated.example")])
        }
    }

    #[tokio::test]
    async fn never_exceeds_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(SlowSearch::default());
        let fetcher = Arc::new(RoutedFetcher::default());
        let ctx = context(dir.path(), search.clone(), fetcher, 2, 3).await;

        let inputs: Vec<CompanyInput> = (0..12).map(|i| company(&format!("公司{i}"), i + 1)).collect();
        let summary = run(ctx, inputs).await;

        assert_eq!(summary.counters.processed, 12);
        let peak = search.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak {peak}");
        assert!(peak >= 2, "workers did not overlap (peak {peak})");
    }

    /// Requests shutdown during its first search, which comes back empty;
    /// later searches find the company.
    #[derive(Default)]
    struct InterruptingSearch {
        calls: AtomicUsize,
        shutdown: std::sync::OnceLock<CancellationToken>,
    }

    #[async_trait]
    impl SearchAdapter for InterruptingSearch {
        fn name(&self) -> &'static str {
            "interrupting"
        }

        async fn search(&self, query: &str, _proxy: &Proxy) -> Result<Vec<SearchResult>, SearchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                if let Some(token) = self.shutdown.get() {
                    token.cancel();
                }
                return Err(SearchError::EmptyPage);
            }
            Ok(vec![SearchResult::new(query, "https://jia.example")])
        }
    }

    #[tokio::test]
    async fn shutdown_mid_company_still_spends_retry_budget() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(InterruptingSearch::default());
        let fetcher = Arc::new(RoutedFetcher::default());
        let base = context(dir.path(), search.clone(), fetcher, 1, 1).await;

        let mut config = base.config.clone();
        config.min_delay = Duration::from_secs(30);
        config.max_delay = Duration::from_secs(30);
        config.max_retries = 2;
        let ctx = Arc::new(PipelineContext::new(
            config,
            base.pool.clone(),
            base.progress.clone(),
            base.sink.clone(),
            base.search.clone(),
            base.fetcher.clone(),
        ));
        assert!(search.shutdown.set(ctx.shutdown.clone()).is_ok());

        // the 30s pauses are cut short, so this finishes quickly
        let summary = tokio::time::timeout(Duration::from_secs(5), run(ctx.clone(), vec![company("甲公司", 1)]))
            .await
            .expect("run should not wait out the pacing delay");

        assert_eq!(search.calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.counters.success, 1);
        assert_eq!(summary.counters.fail, 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("progress.txt")).unwrap(),
            "甲公司\n"
        );
        assert!(csv_rows(dir.path())[0].ends_with("\"已找到\""));
    }

    #[tokio::test]
    async fn pause_returns_early_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(RoutedFetcher::default());
        let ctx = google_context(dir.path(), fetcher, 1).await;
        let mut config = ctx.config.clone();
        config.min_delay = Duration::from_secs(30);
        config.max_delay = Duration::from_secs(30);
        let slow = PipelineContext::new(
            config,
            ctx.pool.clone(),
            ctx.progress.clone(),
            ctx.sink.clone(),
            ctx.search.clone(),
            ctx.fetcher.clone(),
        );
        slow.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), slow.pause())
            .await
            .expect("pause should end when shutdown is requested");
    }

    #[test]
    fn random_delay_stays_in_range() {
        let config = Config {
            min_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..Config::default()
        };
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ctx = rt.block_on(async {
            let progress = Arc::new(ProgressStore::load(dir.path().join("p.txt")).await);
            let sink = Arc::new(CsvSink::open(dir.path().join("r.csv")).await.unwrap());
            let fetcher: Arc<dyn PageFetcher> = Arc::new(RoutedFetcher::default());
            PipelineContext::new(
                config,
                Arc::new(ProxyPool::from_proxies(proxies(1), 0)),
                progress,
                sink,
                SearchEngine::Bing.build("www.bing.com", fetcher.clone(), None),
                fetcher,
            )
        });
        for _ in 0..50 {
            let d = ctx.random_delay();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
    }
}
