// Writing per-repository results to disk.

use std::path::{Path, PathBuf};

use tracing::info;

use codeintegrity_core::error::PersistError;
use codeintegrity_core::report::IntegrityReport;
use codeintegrity_core::runner::ReportSink;

/// Write `report` as pretty JSON to `<out_dir>/<owner><repo>-result.json`,
/// creating `out_dir` if needed. Returns the written path.
pub async fn store_result(out_dir: &Path, report: &IntegrityReport) -> Result<PathBuf, PersistError> {
    tokio::fs::create_dir_all(out_dir).await?;
    let path = out_dir.join(report.file_name());
    let mut json = serde_json::to_vec_pretty(report)?;
    json.push(b'\n');
    tokio::fs::write(&path, json).await?;
    Ok(path)
}

/// Sink that writes each report into one directory.
#[derive(Debug)]
pub struct FileSink {
    out_dir: PathBuf,
}

impl FileSink {
    pub fn new(out_dir: PathBuf) -> Self {
        Self { out_dir }
    }
}

#[async_trait::async_trait]
impl ReportSink for FileSink {
    async fn store(&self, report: IntegrityReport) -> codeintegrity_core::error::Result<()> {
        let path = store_result(&self.out_dir, &report).await?;
        info!(
            owner = %report.owner,
            repo = %report.repo,
            score = report.score,
            path = %path.display(),
            "Stored result"
        );
        Ok(())
    }
}
