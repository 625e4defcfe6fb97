use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::CompanyOutput;

const BOM: &str = "\u{FEFF}";
pub const HEADER: &str = "公司名称,邮箱,法人,官网,备注";

/// Incremental results log, one quoted row per processed company.
pub struct CsvSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl CsvSink {
    /// Creates the file with BOM and header if it does not exist yet.
    /// Existing content is kept and appended to.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::write(&path, format!("{}{}\n", BOM, HEADER)).await?;
            info!("Created results file {}", path.display());
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn append(&self, output: &CompanyOutput) -> Result<(), StoreError> {
        let line = encode_row(output)?;

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        debug!(company = %output.name, "CSV row written");
        Ok(())
    }
}

fn clean(field: &str) -> String {
    field.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// One fully quoted CSV line: name, emails, legal, website, remark.
fn encode_row(output: &CompanyOutput) -> Result<Vec<u8>, StoreError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record([
        clean(&output.name),
        clean(&output.joined_emails()),
        clean(&output.legal),
        clean(&output.website),
        output.remark().as_str().to_string(),
    ])?;

    writer
        .into_inner()
        .map_err(|e| StoreError::Io(e.into_error()))
}
