//! Backtest report port trait.

use std::path::{Path, PathBuf};

use crate::domain::backtest::BacktestReport;
use crate::domain::error::SignalbotError;

pub trait ReportPort {
    fn write(&self, report: &BacktestReport, output_path: &Path) -> Result<(), SignalbotError>;

    /// Default implementation: one file per run, named `<stem>_<run id>.<ext>`
    /// next to `output_path`.
    fn write_batch(
        &self,
        reports: &[BacktestReport],
        output_path: &Path,
    ) -> Result<Vec<PathBuf>, SignalbotError> {
        let stem = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "report".to_string());
        let extension = output_path
            .extension()
            .map(|e| e.to_string_lossy().into_owned());

        let mut written = Vec::with_capacity(reports.len());
        for report in reports {
            let name = match &extension {
                Some(ext) => format!("{}_{}.{}", stem, report.run_id, ext),
                None => format!("{}_{}", stem, report.run_id),
            };
            let path = output_path.with_file_name(name);
            self.write(report, &path)?;
            written.push(path);
        }
        Ok(written)
    }
}
