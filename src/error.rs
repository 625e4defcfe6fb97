use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy vendor request failed: {0}")]
    Fetch(String),

    #[error("proxy vendor returned no usable entries")]
    Empty,

    #[error("all proxies are marked failed")]
    Exhausted,

    #[error("invalid proxy {0}: {1}")]
    Invalid(String, String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {0}")]
    Status(u16),
}

impl FetchError {
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::Transport(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search engine flagged the request (captcha / unusual traffic)")]
    Blocked,

    #[error("search page contained no result entries")]
    EmptyPage,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("cannot open workbook {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: calamine::Error,
    },

    #[error("workbook {0} has no worksheet")]
    NoSheet(String),

    #[error("cannot write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("name {0:?} contains a line break")]
    LineBreak(String),
}
