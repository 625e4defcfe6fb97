use tracing::{debug, error, info, warn};

use crate::error::SearchError;
use crate::extract::emails_from_page;
use crate::matcher::{find_match, normalize};
use crate::model::{CompanyInput, CompanyOutput, EnrichedRow, SearchResult};
use crate::pipeline::PipelineContext;

/// Runs one company through search, match, email extraction and
/// persistence. Never fails: every outcome ends as a recorded row.
pub async fn process_company(ctx: &PipelineContext, company: CompanyInput) {
    info!(company = %company.name, "🚀 [Worker] Processing");

    // 1. Search with proxy rotation
    let output = match search_with_retries(ctx, &company.name).await {
        Ok(results) => match find_match(&results, &company.name) {
            Some(hit) => {
                info!(company = %company.name, "✓ [Worker] Matched {} ({})", hit.url, hit.title);
                // 2. Landing page emails
                let emails = fetch_emails(ctx, &hit.url).await;
                CompanyOutput::found(&company, hit.url.clone(), emails)
            }
            None => {
                info!(company = %company.name, "✗ [Worker] No matching result");
                log_candidates(&company.name, &results);
                CompanyOutput::unmatched(&company)
            }
        },
        Err(e) => {
            warn!(company = %company.name, "⚠️ [Worker] Search gave up: {}", e);
            CompanyOutput::unmatched(&company)
        }
    };

    if output.is_found() {
        ctx.counters.record_success();
    } else {
        ctx.counters.record_fail();
    }

    // 3. Persist: CSV row first, then the progress line
    match ctx.sink.append(&output).await {
        Ok(()) => {
            if let Err(e) = ctx.progress.mark_complete(&company.name).await {
                error!(company = %company.name, "🔥 [Worker] Progress write failed: {}", e);
            }
        }
        Err(e) => error!(company = %company.name, "🔥 [Worker] CSV write failed: {}", e),
    }

    ctx.record(EnrichedRow { input: company, output });
    ctx.counters.record_processed();

    // 4. Pace before the permit is released
    ctx.pause().await;
}

/// Up to `max_retries` attempts, each on a freshly selected proxy. A blocked
/// proxy is retired before the next attempt; pool exhaustion ends the search.
async fn search_with_retries(ctx: &PipelineContext, query: &str) -> Result<Vec<SearchResult>, SearchError> {
    let attempts = ctx.config.max_retries.max(1);
    let mut last_error = SearchError::EmptyPage;

    for attempt in 1..=attempts {
        let entry = ctx.pool.select()?;
        debug!(company = %query, "Attempt {}/{} via {}", attempt, attempts, entry.proxy());

        match ctx.search.search(query, entry.proxy()).await {
            Ok(results) if !results.is_empty() => {
                ctx.pool.record_success(&entry);
                return Ok(results);
            }
            Ok(_) => {
                ctx.pool.record_success(&entry);
                last_error = SearchError::EmptyPage;
            }
            Err(SearchError::Blocked) => {
                warn!(company = %query, "🚫 {} flagged proxy {}", ctx.search.name(), entry.proxy());
                ctx.pool.mark_failed(&entry);
                last_error = SearchError::Blocked;
            }
            Err(SearchError::Fetch(e)) => {
                if e.is_transport() {
                    ctx.pool.record_transport_failure(&entry);
                } else {
                    ctx.pool.record_success(&entry);
                }
                warn!(company = %query, "Search attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = SearchError::Fetch(e);
            }
            Err(e) => {
                warn!(company = %query, "Search attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = e;
            }
        }

        // shutdown only shortens the pause; the attempt budget is always spent
        if attempt < attempts {
            ctx.pause().await;
        }
    }

    Err(last_error)
}

/// Any failure here leaves the email list empty; the match still stands.
async fn fetch_emails(ctx: &PipelineContext, url: &str) -> Vec<String> {
    let entry = match ctx.pool.select() {
        Ok(entry) => entry,
        Err(e) => {
            warn!("📧 Skipping email extraction for {}: {}", url, e);
            return Vec::new();
        }
    };

    match ctx.fetcher.fetch(url, Some(entry.proxy())).await {
        Ok(html) => {
            ctx.pool.record_success(&entry);
            let emails = emails_from_page(&html);
            info!("📧 {} email(s) on {}", emails.len(), url);
            emails
        }
        Err(e) => {
            if e.is_transport() {
                ctx.pool.record_transport_failure(&entry);
            }
            warn!("📧 Landing page fetch failed for {}: {}", url, e);
            Vec::new()
        }
    }
}

fn log_candidates(company: &str, results: &[SearchResult]) {
    debug!("Normalized query: {}", normalize(company));
    for (i, r) in results.iter().take(5).enumerate() {
        debug!("  {}. {} -> {}", i + 1, normalize(&r.title), r.url);
    }
}
