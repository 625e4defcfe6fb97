//! Rotating pool of outbound HTTP proxies fetched once from the vendor API.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::error::ProxyError;

/// Parsed vendor entry: `host:port` or `host:port:user:pass`.
#[derive(Clone, PartialEq, Eq)]
pub enum Proxy {
    Anonymous {
        host: String,
        port: u16,
    },
    Authenticated {
        host: String,
        port: u16,
        user: String,
        pass: String,
    },
}

impl Proxy {
    pub fn parse(entry: &str) -> Result<Self, ProxyError> {
        let invalid = |why: &str| ProxyError::Invalid(mask(entry), why.to_string());

        let parts: Vec<&str> = entry.trim().splitn(4, ':').collect();
        let (host, port) = match parts.as_slice() {
            [host, port, ..] => (*host, *port),
            _ => return Err(invalid("expected host:port")),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("bad port"))?;

        match parts.as_slice() {
            [_, _] => Ok(Proxy::Anonymous {
                host: host.to_string(),
                port,
            }),
            [_, _, user, pass] => Ok(Proxy::Authenticated {
                host: host.to_string(),
                port,
                user: user.to_string(),
                pass: pass.to_string(),
            }),
            _ => Err(invalid("expected host:port:user:pass")),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Proxy::Anonymous { host, .. } | Proxy::Authenticated { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Proxy::Anonymous { port, .. } | Proxy::Authenticated { port, .. } => *port,
        }
    }

    pub fn requires_auth(&self) -> bool {
        matches!(self, Proxy::Authenticated { .. })
    }

    /// Key used for identity and logging. Never contains credentials.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    pub fn to_reqwest(&self) -> reqwest::Result<reqwest::Proxy> {
        let proxy = reqwest::Proxy::all(format!("http://{}", self.endpoint()))?;
        Ok(match self {
            Proxy::Anonymous { .. } => proxy,
            Proxy::Authenticated { user, pass, .. } => proxy.basic_auth(user, pass),
        })
    }
}

// credentials stay out of Debug output as well
impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.requires_auth() {
            write!(f, "{} (auth)", self.endpoint())
        } else {
            f.write_str(&self.endpoint())
        }
    }
}

fn mask(entry: &str) -> String {
    entry.trim().splitn(3, ':').take(2).collect::<Vec<_>>().join(":")
}

/// Pool-owned record for one proxy.
#[derive(Debug)]
pub struct ProxyEntry {
    proxy: Proxy,
    usage: AtomicU64,
    failed: AtomicBool,
    transport_failures: AtomicU32,
}

impl ProxyEntry {
    fn new(proxy: Proxy) -> Self {
        Self {
            proxy,
            usage: AtomicU64::new(0),
            failed: AtomicBool::new(false),
            transport_failures: AtomicU32::new(0),
        }
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Parses a vendor response: `{"data":["host:port",...]}` or plaintext
/// entries separated by whitespace or commas.
pub fn parse_proxy_list(body: &str) -> Vec<Proxy> {
    let body = body.trim();

    if body.contains("\"data\"") {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(items) = value.get("data").and_then(|d| d.as_array()) {
                return items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .filter_map(|s| Proxy::parse(s).ok())
                    .collect();
            }
        }
    }

    body.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| token.contains(':') && !token.contains('{'))
        .filter_map(|token| match Proxy::parse(token) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("⚠️ Skipping proxy entry: {}", e);
                None
            }
        })
        .collect()
}

pub struct ProxyPool {
    entries: RwLock<Vec<Arc<ProxyEntry>>>,
    next: AtomicUsize,
    /// Consecutive transport failures that retire a proxy; 0 disables.
    max_transport_failures: u32,
}

impl ProxyPool {
    pub fn new(max_transport_failures: u32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next: AtomicUsize::new(0),
            max_transport_failures,
        }
    }

    pub fn from_proxies(proxies: Vec<Proxy>, max_transport_failures: u32) -> Self {
        let pool = Self::new(max_transport_failures);
        pool.replace(proxies);
        pool
    }

    /// Fetches the proxy list once from the vendor endpoint and populates the pool.
    pub async fn initialize(&self, api_url: &str) -> Result<usize, ProxyError> {
        info!("🔌 Fetching proxies from vendor API...");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProxyError::Fetch(e.to_string()))?;

        let body = client
            .get(api_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ProxyError::Fetch(e.to_string()))?
            .text()
            .await
            .map_err(|e| ProxyError::Fetch(e.to_string()))?;

        let preview: String = body.chars().take(200).collect();
        info!("Proxy API response: {}", mask_response(&preview));

        let proxies = parse_proxy_list(&body);
        if proxies.is_empty() {
            return Err(ProxyError::Empty);
        }
        for p in &proxies {
            info!("✅ Proxy: {}", p);
        }
        let count = proxies.len();
        self.replace(proxies);
        info!("✅ Loaded {} proxies", count);
        Ok(count)
    }

    fn replace(&self, proxies: Vec<Proxy>) {
        let fresh: Vec<Arc<ProxyEntry>> =
            proxies.into_iter().map(|p| Arc::new(ProxyEntry::new(p))).collect();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        *entries = fresh;
    }

    /// Next healthy proxy in round-robin order.
    pub fn select(&self) -> Result<Arc<ProxyEntry>, ProxyError> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let available: Vec<&Arc<ProxyEntry>> = entries.iter().filter(|e| !e.is_failed()).collect();
        if available.is_empty() {
            warn!("⚠️ All proxies have failed");
            return Err(ProxyError::Exhausted);
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % available.len();
        let entry = Arc::clone(available[idx]);
        entry.usage.fetch_add(1, Ordering::Relaxed);
        Ok(entry)
    }

    pub fn mark_failed(&self, entry: &ProxyEntry) {
        if !entry.failed.swap(true, Ordering::AcqRel) {
            warn!(
                "❌ Proxy failed: {} (healthy remaining: {})",
                entry.proxy,
                self.healthy()
            );
        }
    }

    /// Counts a network-level failure; retires the proxy once the configured
    /// threshold of consecutive failures is reached.
    pub fn record_transport_failure(&self, entry: &ProxyEntry) {
        let failures = entry.transport_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if self.max_transport_failures > 0 && failures >= self.max_transport_failures {
            self.mark_failed(entry);
        }
    }

    pub fn record_success(&self, entry: &ProxyEntry) {
        entry.transport_failures.store(0, Ordering::Release);
    }

    pub fn healthy(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| !e.is_failed()).count()
    }

    /// Current entries, healthy or not, in pool order.
    pub fn entries(&self) -> Vec<Arc<ProxyEntry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Blocks until at least `min_size` healthy proxies are present.
    pub async fn wait_ready(&self, min_size: usize, poll_interval: Duration) {
        loop {
            let healthy = self.healthy();
            if healthy >= min_size {
                info!("✅ Proxy pool ready: {} proxies", healthy);
                return;
            }
            info!("⏳ Waiting for proxy pool... {}/{}", healthy, min_size);
            sleep(poll_interval).await;
        }
    }
}

// plaintext vendor responses carry credentials in the 3rd/4th field
fn mask_response(preview: &str) -> String {
    preview
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| if t.matches(':').count() >= 3 { mask(t) } else { t.to_string() })
        .collect::<Vec<_>>()
        .join(" ")
}
