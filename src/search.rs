//! Search-engine front ends. Both engines share the [`SearchAdapter`]
//! capability and are chosen by configuration.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use reqwest::Url;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::dump::DebugDump;
use crate::error::SearchError;
use crate::extract::page_text;
use crate::fetcher::PageFetcher;
use crate::model::SearchResult;
use crate::proxy::Proxy;

#[async_trait]
pub trait SearchAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str, proxy: &Proxy) -> Result<Vec<SearchResult>, SearchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEngine {
    Google,
    Bing,
}

impl SearchEngine {
    pub fn default_domain(self) -> &'static str {
        match self {
            SearchEngine::Google => "www.google.com",
            SearchEngine::Bing => "www.bing.com",
        }
    }

    pub fn build(
        self,
        domain: &str,
        fetcher: Arc<dyn PageFetcher>,
        dump: Option<Arc<DebugDump>>,
    ) -> Arc<dyn SearchAdapter> {
        match self {
            SearchEngine::Google => Arc::new(GoogleSearch::new(domain, fetcher).with_dump(dump)),
            SearchEngine::Bing => Arc::new(BingSearch::new(domain, fetcher).with_dump(dump)),
        }
    }
}

impl FromStr for SearchEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(SearchEngine::Google),
            "bing" => Ok(SearchEngine::Bing),
            other => Err(format!("unknown search engine '{}'", other)),
        }
    }
}

// ============================================================================
// Google-style engine
// ============================================================================

const CHALLENGE_PATTERNS: [&str; 2] = ["unusual traffic", "captcha"];

pub struct GoogleSearch {
    domain: String,
    fetcher: Arc<dyn PageFetcher>,
    dump: Option<Arc<DebugDump>>,
}

impl GoogleSearch {
    pub fn new(domain: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            domain: domain.to_string(),
            fetcher,
            dump: None,
        }
    }

    /// Saves every fetched result page under the dump directory.
    pub fn with_dump(mut self, dump: Option<Arc<DebugDump>>) -> Self {
        self.dump = dump;
        self
    }

    pub fn query_url(&self, query: &str) -> String {
        format!(
            "https://{}/search?q={}&num=20&hl=zh-TW&gl=TW&gws_rd=cr",
            self.domain,
            urlencoding::encode(query)
        )
    }

    fn is_valid_url(&self, url: &str) -> bool {
        url.starts_with("http")
            && !url.contains(&self.domain)
            && !url.contains("google.com")
            && !url.contains("youtube.com")
            && !url.contains("webcache")
    }

    pub fn parse_results(&self, html: &str) -> Result<Vec<SearchResult>, SearchError> {
        let text = page_text(html);
        if CHALLENGE_PATTERNS.iter().any(|p| text.contains(p)) {
            return Err(SearchError::Blocked);
        }

        let document = Html::parse_document(html);
        let result_selector = Selector::parse("div.g, div.Gx5Zad").expect("result selector");
        let link_selector = Selector::parse(r#"a[href^="http"]"#).expect("link selector");
        let title_selector = Selector::parse("h3").expect("title selector");

        let mut results = Vec::new();
        for block in document.select(&result_selector) {
            let Some(link) = block.select(&link_selector).next() else {
                continue;
            };
            let href = link.value().attr("href").unwrap_or_default();
            let Some(title) = block
                .select(&title_selector)
                .next()
                .map(|h| h.text().collect::<String>().trim().to_string())
            else {
                continue;
            };

            if !self.is_valid_url(href) {
                debug!("Skipping result URL: {}", href);
                continue;
            }
            results.push(SearchResult::new(title, href));
        }

        if results.is_empty() {
            return Err(SearchError::EmptyPage);
        }
        Ok(results)
    }
}

#[async_trait]
impl SearchAdapter for GoogleSearch {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn search(&self, query: &str, proxy: &Proxy) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.query_url(query);
        info!("🔎 Google search via {}: {}", proxy, url);
        let html = self.fetcher.fetch(&url, Some(proxy)).await?;
        debug!("Google response length: {}", html.len());
        if let Some(dump) = &self.dump {
            dump.save_search_page(query, &html).await;
        }
        self.parse_results(&html)
    }
}

// ============================================================================
// Bing-style engine
// ============================================================================

pub struct BingSearch {
    domain: String,
    fetcher: Arc<dyn PageFetcher>,
    dump: Option<Arc<DebugDump>>,
}

impl BingSearch {
    pub fn new(domain: &str, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            domain: domain.to_string(),
            fetcher,
            dump: None,
        }
    }

    /// Saves every fetched result page under the dump directory.
    pub fn with_dump(mut self, dump: Option<Arc<DebugDump>>) -> Self {
        self.dump = dump;
        self
    }

    pub fn query_url(&self, query: &str) -> String {
        format!("https://{}/search?q={}", self.domain, urlencoding::encode(query))
    }

    pub fn parse_results(&self, html: &str) -> Result<Vec<SearchResult>, SearchError> {
        let document = Html::parse_document(html);
        let result_selector = Selector::parse("li.b_algo").expect("result selector");
        let title_selector = Selector::parse("h2 a").expect("title selector");

        let mut entries = document.select(&result_selector).peekable();
        if entries.peek().is_none() {
            return Err(SearchError::EmptyPage);
        }

        let mut results = Vec::new();
        for element in entries {
            let Some(anchor) = element.select(&title_selector).next() else {
                continue;
            };
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let url = if href.contains("/ck/a?") {
                decode_bing_redirect(href).unwrap_or_else(|| href.to_string())
            } else {
                href.to_string()
            };
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                debug!("Skipping result URL: {}", url);
                continue;
            }
            let title = anchor.text().collect::<String>().trim().to_string();
            results.push(SearchResult::new(title, url));
        }
        Ok(results)
    }
}

#[async_trait]
impl SearchAdapter for BingSearch {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn search(&self, query: &str, proxy: &Proxy) -> Result<Vec<SearchResult>, SearchError> {
        let url = self.query_url(query);
        info!("🔎 Bing search via {}: {}", proxy, url);
        let html = self.fetcher.fetch(&url, Some(proxy)).await?;
        debug!("Bing response length: {}", html.len());
        if let Some(dump) = &self.dump {
            dump.save_search_page(query, &html).await;
        }
        let results = self.parse_results(&html)?;
        if results.is_empty() {
            warn!("Bing page had entries but no usable links");
            return Err(SearchError::EmptyPage);
        }
        Ok(results)
    }
}

/// Decodes a Bing click-tracking link (`/ck/a?...&u=a1<base64>`) to the
/// destination URL. Returns `None` when the link carries no decodable target.
pub fn decode_bing_redirect(href: &str) -> Option<String> {
    let base = Url::parse("https://www.bing.com/").ok()?;
    let parsed = base.join(href).ok()?;
    let encoded = parsed
        .query_pairs()
        .find(|(k, _)| k == "u")
        .map(|(_, v)| v.into_owned())?;

    // form-decoding turns '+' into ' '
    let encoded = encoded.replace(' ', "+");
    let encoded = encoded.strip_prefix("a1").unwrap_or(&encoded);
    let trimmed = encoded.trim_end_matches('=');
    let padded = format!("{}{}", trimmed, "=".repeat((4 - trimmed.len() % 4) % 4));

    let bytes = STANDARD
        .decode(&padded)
        .or_else(|_| URL_SAFE.decode(&padded))
        .ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    debug!("Decoded Bing URL: {}", decoded);
    Some(decoded)
}
