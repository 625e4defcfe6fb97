use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::pipeline::{CounterSnapshot, PipelineContext};

/// Periodic progress line until every pending company is processed.
pub fn spawn(ctx: Arc<PipelineContext>, total: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(ctx.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let snapshot = ctx.counters.snapshot();
            info!("{}", report(snapshot, total, ctx.pool.healthy(), ctx.pool.len()));
            if snapshot.processed >= total {
                break;
            }
        }
    })
}

pub fn report(snapshot: CounterSnapshot, total: usize, healthy: usize, pool_size: usize) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        snapshot.processed as f64 * 100.0 / total as f64
    };
    format!(
        "📊 Progress: {}/{} ({:.1}%) | ✓ {} | ✗ {} | proxies {}/{}",
        snapshot.processed, total, percent, snapshot.success, snapshot.fail, healthy, pool_size
    )
}
