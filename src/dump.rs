//! Optional debug output: raw search pages and the loaded company list.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::model::CompanyInput;

pub const COMPANIES_FILE: &str = "companies.json";

pub struct DebugDump {
    dir: PathBuf,
}

impl DebugDump {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!("🧪 Debug dumps enabled: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn search_page_path(&self, query: &str) -> PathBuf {
        self.dir.join(format!("{}.srch.htm", file_stem(query)))
    }

    /// Best effort; a failed write is only logged.
    pub async fn save_search_page(&self, query: &str, html: &str) {
        let path = self.search_page_path(query);
        match tokio::fs::write(&path, html).await {
            Ok(()) => debug!(company = %query, "Search page saved to {}", path.display()),
            Err(e) => warn!(company = %query, "Cannot save search page {}: {}", path.display(), e),
        }
    }

    pub fn export_companies(&self, companies: &[CompanyInput]) -> Result<PathBuf, StoreError> {
        let path = self.dir.join(COMPANIES_FILE);
        let json = serde_json::to_vec_pretty(companies)?;
        std::fs::write(&path, json)?;
        info!("🧪 Exported {} companies to {}", companies.len(), path.display());
        Ok(path)
    }
}

// characters Windows and POSIX refuse in file names
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() {
        "_".to_string()
    } else {
        stem
    }
}
