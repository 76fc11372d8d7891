//! CSV reporters (§6 persisted state, §13): streaming sinks that write one header row
//! (`t,<column names>`) followed by one data row per logical event, flushed every 50 rows and
//! closed at shutdown. Unlike the teacher's `DataFrame`-backed reports (built once, written once),
//! these append incrementally across the control loop, so they hold an open `csv::Writer` rather
//! than materialising a frame.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::IoError;

/// Rows are flushed to disk after this many writes, per §5 ("file writes are line-buffered and
/// flushed every 50 rows").
const FLUSH_INTERVAL: usize = 50;

/// A single streaming CSV sink. `csv::Writer` infers and writes the header row from the first
/// serialized struct's field names, matching the `t,<column names>` contract without a separate
/// schema type.
pub struct CsvReporter {
    path: PathBuf,
    writer: csv::Writer<File>,
    pending: usize,
}

impl CsvReporter {
    /// Opens `dir/name` for writing, creating `dir` if it doesn't exist yet.
    pub fn create(dir: impl AsRef<Path>, name: &str) -> Result<Self, IoError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|_| IoError::CreateDir(dir.display().to_string()))?;
        let path = dir.join(name);
        let writer = csv::Writer::from_path(&path)?;
        Ok(CsvReporter { path, writer, pending: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_row<R: Serialize>(&mut self, row: &R) -> Result<(), IoError> {
        self.writer.serialize(row)?;
        self.pending += 1;
        if self.pending >= FLUSH_INTERVAL {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        self.writer.flush()?;
        self.pending = 0;
        Ok(())
    }
}

/// Best-effort flush on drop, so a reporter dropped without an explicit shutdown call still gets
/// its trailing rows to disk; a failure here is logged rather than propagated (there is no caller
/// left to hand a `Result` to).
impl Drop for CsvReporter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(path = %self.path.display(), error = %e, "failed to flush reporter on drop");
        }
    }
}

/// One row of `world_metrics.csv` (§6): the world's per-region, per-spot actual-vs-utopia revisit
/// comparison at virtual time `t`.
#[derive(Debug, Clone, Serialize)]
pub struct WorldMetricsRow {
    pub t: f64,
    pub region: String,
    pub spot: String,
    pub actual_revisit: f64,
    pub utopia_revisit: f64,
}

/// World-truth-side reporter: one `world_metrics.csv` per run.
pub struct WorldMetricsReporter(CsvReporter);

impl WorldMetricsReporter {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self, IoError> {
        Ok(WorldMetricsReporter(CsvReporter::create(dir, "world_metrics.csv")?))
    }

    pub fn record(&mut self, row: WorldMetricsRow) -> Result<(), IoError> {
        self.0.write_row(&row)
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        self.0.flush()
    }
}

/// One row of an agent's `knowledgebase.csv` (§6): own/peer fact and undecided counts at `t`.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgebaseRow {
    pub t: f64,
    pub agent: String,
    pub own_facts: usize,
    pub own_undecided: usize,
    pub peer_facts: usize,
    pub peer_undecided: usize,
}

/// Per-agent reporter: one `<agent>_knowledgebase.csv` per run.
pub struct KnowledgebaseReporter(CsvReporter);

impl KnowledgebaseReporter {
    pub fn create(dir: impl AsRef<Path>, agent: &str) -> Result<Self, IoError> {
        Ok(KnowledgebaseReporter(CsvReporter::create(dir, &format!("{agent}_knowledgebase.csv"))?))
    }

    pub fn record(&mut self, row: KnowledgebaseRow) -> Result<(), IoError> {
        self.0.write_row(&row)
    }

    pub fn flush(&mut self) -> Result<(), IoError> {
        self.0.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn world_metrics_reporter_writes_header_and_rows() {
        let dir = tempdir().unwrap();
        let mut reporter = WorldMetricsReporter::create(dir.path()).unwrap();
        reporter
            .record(WorldMetricsRow {
                t: 0.0,
                region: "eq".to_string(),
                spot: "(0,0)".to_string(),
                actual_revisit: 10.0,
                utopia_revisit: 8.0,
            })
            .unwrap();
        reporter.flush().unwrap();

        let contents = std::fs::read_to_string(dir.path().join("world_metrics.csv")).unwrap();
        assert!(contents.starts_with("t,region,spot,actual_revisit,utopia_revisit"));
        assert!(contents.contains("eq"));
    }

    #[test]
    fn knowledgebase_reporter_flushes_past_interval() {
        let dir = tempdir().unwrap();
        let mut reporter = KnowledgebaseReporter::create(dir.path(), "sat-1").unwrap();
        for i in 0..60 {
            reporter
                .record(KnowledgebaseRow {
                    t: i as f64,
                    agent: "sat-1".to_string(),
                    own_facts: i,
                    own_undecided: 0,
                    peer_facts: 0,
                    peer_undecided: 0,
                })
                .unwrap();
        }
        let contents = std::fs::read_to_string(dir.path().join("sat-1_knowledgebase.csv")).unwrap();
        assert_eq!(contents.lines().count(), 61);
    }
}
