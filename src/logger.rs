//! Run logging: tracing setup, the per-epoch table and scalar summaries.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tensorboard_rs::summary_writer::SummaryWriter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::error::Result;

pub const PROGRESS_FILE: &str = "progress.csv";

/// Installs the global subscriber. Non-root ranks only report warnings
/// unless `RUST_LOG` says otherwise.
pub fn init_tracing(rank: usize) {
    let default = if rank == 0 { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Only rank 0 owns the requested directory; every other rank, and rank 0
/// without a request, gets a fresh scratch directory.
pub fn configure_logdir(rank: usize, requested: Option<&Path>) -> PathBuf {
    match requested {
        Some(dir) if rank == 0 => dir.to_path_buf(),
        _ => std::env::temp_dir().join(format!("hertrain-{}", Uuid::new_v4())),
    }
}

/// Key/value rows dumped once per epoch as an aligned table and a CSV line.
pub struct TabularLogger {
    dir: PathBuf,
    row: Vec<(String, f64)>,
    header: Option<Vec<String>>,
}

impl TabularLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            row: Vec::new(),
            header: None,
        }
    }

    pub fn record(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.row.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.row.push((key, value)),
        }
    }

    pub fn row(&self) -> &[(String, f64)] {
        &self.row
    }

    pub fn render(&self) -> String {
        let key_width = self.row.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let values: Vec<String> = self.row.iter().map(|(_, v)| format!("{v:<8.3}")).collect();
        let value_width = values.iter().map(String::len).max().unwrap_or(0);
        let dashes = "-".repeat(key_width + value_width + 7);

        let mut out = String::new();
        out.push_str(&dashes);
        out.push('\n');
        for ((key, _), value) in self.row.iter().zip(&values) {
            out.push_str(&format!("| {key:<key_width$} | {value:<value_width$} |\n"));
        }
        out.push_str(&dashes);
        out
    }

    /// Emits the current row and clears it.
    pub fn dump(&mut self) -> Result<()> {
        if self.row.is_empty() {
            return Ok(());
        }
        info!("\n{}", self.render());
        self.append_csv()?;
        self.row.clear();
        Ok(())
    }

    fn append_csv(&mut self) -> Result<()> {
        let path = self.dir.join(PROGRESS_FILE);
        let mut file = if self.header.is_some() {
            OpenOptions::new().append(true).open(&path)?
        } else {
            let mut file = File::create(&path)?;
            let header: Vec<String> = self.row.iter().map(|(k, _)| k.clone()).collect();
            writeln!(file, "{}", header.join(","))?;
            self.header = Some(header);
            file
        };

        let header = self.header.as_deref().unwrap_or_default();
        for (key, _) in &self.row {
            if !header.contains(key) {
                warn!(key = %key, "column not in {PROGRESS_FILE} header, dropped");
            }
        }
        let line: Vec<String> = header
            .iter()
            .map(|col| {
                self.row
                    .iter()
                    .find(|(k, _)| k == col)
                    .map(|(_, v)| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        writeln!(file, "{}", line.join(","))?;
        Ok(())
    }
}

/// TensorBoard event file under the log directory, one scalar per metric
/// and epoch.
pub struct ScalarSummary {
    writer: SummaryWriter,
}

impl ScalarSummary {
    pub fn create(dir: &Path) -> Self {
        Self {
            writer: SummaryWriter::new(dir),
        }
    }

    pub fn add_scalars(&mut self, scalars: &[(String, f64)], step: usize) {
        for (tag, value) in scalars {
            self.writer.add_scalar(tag, *value as f32, step);
        }
        self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_only_rank_zero_owns_requested_dir() {
        let requested = Path::new("/tmp/some-run");
        assert_eq!(configure_logdir(0, Some(requested)), requested);
        assert_ne!(configure_logdir(1, Some(requested)), requested);
        assert_ne!(configure_logdir(0, None), configure_logdir(0, None));
    }

    #[test]
    fn test_record_overwrites_and_keeps_order() {
        let dir = tempdir().unwrap();
        let mut logger = TabularLogger::new(dir.path());
        logger.record("epoch", 0.0);
        logger.record("test/success_rate", 0.5);
        logger.record("epoch", 1.0);
        assert_eq!(
            logger.row(),
            &[
                ("epoch".to_string(), 1.0),
                ("test/success_rate".to_string(), 0.5)
            ]
        );
        let table = logger.render();
        assert!(table.contains("| epoch"));
        assert!(table.starts_with('-'));
    }

    #[test]
    fn test_dump_writes_csv_rows() {
        let dir = tempdir().unwrap();
        let mut logger = TabularLogger::new(dir.path());
        for epoch in 0..2 {
            logger.record("epoch", epoch as f64);
            logger.record("loss", 0.25);
            logger.dump().unwrap();
            assert!(logger.row().is_empty());
        }
        let csv = std::fs::read_to_string(dir.path().join(PROGRESS_FILE)).unwrap();
        assert_eq!(csv, "epoch,loss\n0,0.25\n1,0.25\n");
    }

    #[test]
    fn test_scalars_go_to_event_file() {
        let dir = tempdir().unwrap();
        let mut summary = ScalarSummary::create(dir.path());
        summary.add_scalars(&[("a".to_string(), 1.0), ("b".to_string(), 2.0)], 100);

        let event_files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains("tfevents"))
            .collect();
        assert_eq!(event_files.len(), 1);
        assert!(event_files[0].metadata().unwrap().len() > 0);
    }
}
