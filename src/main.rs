mod config;
mod csv_sink;
mod dump;
mod error;
mod extract;
mod fetcher;
mod matcher;
mod model;
mod monitor;
mod pipeline;
mod progress;
mod proxy;
mod search;
mod workbook;
mod worker;

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::csv_sink::CsvSink;
use crate::dump::DebugDump;
use crate::fetcher::{HttpFetcher, PageFetcher};
use crate::pipeline::PipelineContext;
use crate::progress::ProgressStore;
use crate::proxy::ProxyPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    info!("🏢 Company enricher starting");
    info!(
        "⚙️ Concurrency: {} | Engine: {:?} ({}) | Delay: {:?}-{:?} | Retries: {}",
        config.concurrency,
        config.search_engine,
        config.search_domain,
        config.min_delay,
        config.max_delay,
        config.max_retries
    );

    // 1. Proxy pool
    let pool = Arc::new(ProxyPool::new(config.proxy_max_transport_failures));
    pool.initialize(&config.proxy_api_url)
        .await
        .context("Failed to initialize proxy pool")?;
    if tokio::time::timeout(
        config.proxy_ready_timeout,
        pool.wait_ready(config.proxy_pool_min_size, config.proxy_pool_poll),
    )
    .await
    .is_err()
    {
        bail!(
            "proxy pool not ready after {:?} ({} of {} required)",
            config.proxy_ready_timeout,
            pool.healthy(),
            config.proxy_pool_min_size
        );
    }

    // 2. Durable state and input
    let progress = Arc::new(ProgressStore::load(&config.progress_file).await);
    let sink = Arc::new(
        CsvSink::open(&config.output_csv)
            .await
            .with_context(|| format!("Failed to open {}", config.output_csv.display()))?,
    );
    let companies = workbook::load_companies(&config.input_file, &config.columns)
        .with_context(|| format!("Failed to read {}", config.input_file.display()))?;

    let dump = match &config.debug_dump_dir {
        Some(dir) => {
            let dump = DebugDump::create(dir)
                .with_context(|| format!("Failed to create dump directory {}", dir.display()))?;
            if let Err(e) = dump.export_companies(&companies) {
                warn!("⚠️ Company export failed: {}", e);
            }
            Some(Arc::new(dump))
        }
        None => None,
    };

    // 3. Engine and shared context
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(config.timeout));
    let search = config
        .search_engine
        .build(&config.search_domain, fetcher.clone(), dump);
    let ctx = Arc::new(PipelineContext::new(
        config.clone(),
        pool,
        progress,
        sink,
        search,
        fetcher,
    ));

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, finishing in-flight companies");
            shutdown.cancel();
        }
    });

    // 4. Run
    let summary = pipeline::run(ctx.clone(), companies).await;

    // 5. Workbook rewrite; the CSV and progress file already hold every result
    let rows = ctx.take_results();
    if !rows.is_empty() {
        if let Err(e) = workbook::write_results(
            &config.input_file,
            config.workbook_target(),
            &rows,
            &config.columns,
        ) {
            error!("🔥 Workbook update failed: {}", e);
        }
    }

    info!("✅ Done in {:.1}s", summary.elapsed.as_secs_f64());
    info!(
        "📊 Processed: {}/{} | Found: {} | Not found: {} | Skipped (already done): {}",
        summary.counters.processed,
        summary.pending,
        summary.counters.success,
        summary.counters.fail,
        summary.skipped
    );
    for entry in ctx.pool.entries() {
        debug!(
            "Proxy {} served {} requests{}",
            entry.proxy(),
            entry.usage(),
            if entry.is_failed() { " (failed)" } else { "" }
        );
    }
    info!(
        "💾 Results: {} | Progress: {} companies done",
        config.output_csv.display(),
        ctx.progress.len()
    );
    Ok(())
}
