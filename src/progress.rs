use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::StoreError;

/// Append-only record of completed company names.
pub struct ProgressStore {
    path: PathBuf,
    completed: RwLock<HashSet<String>>,
    append_lock: Mutex<()>,
}

impl ProgressStore {
    /// Loads the completed set. A missing or unreadable file starts fresh.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let completed = match tokio::fs::read(&path).await {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
                Err(e) => {
                    warn!("Progress file {} is not valid UTF-8 ({}). Starting fresh.", path.display(), e);
                    HashSet::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No progress file found. Starting fresh.");
                HashSet::new()
            }
            Err(e) => {
                warn!("Failed to read progress file {}: {}. Starting fresh.", path.display(), e);
                HashSet::new()
            }
        };

        if !completed.is_empty() {
            info!("Resuming previous session: {} companies already done", completed.len());
        }

        Self {
            path,
            completed: RwLock::new(completed),
            append_lock: Mutex::new(()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.completed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    pub fn len(&self) -> usize {
        self.completed.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Appends `name` durably, then records it in memory. Names holding a
    /// line break are refused since they would not reload as one entry.
    pub async fn mark_complete(&self, name: &str) -> Result<(), StoreError> {
        if name.contains(['\n', '\r']) {
            return Err(StoreError::LineBreak(name.to_string()));
        }
        let _guard = self.append_lock.lock().await;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", name).as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        self.completed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string());
        Ok(())
    }
}
