// ============================================================
// Layer 6 — Loss History Logger
// ============================================================
// Appends one row per epoch to <output_dir>/losses.csv:
//
//   epoch,loss,best_loss,improved
//   0,1.021344,1.021344,true
//   1,0.998210,0.998210,true
//   2,1.003002,0.998210,false
//
// The header is written only when the file is new, so
// resumed runs keep extending the same history.

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::PathBuf,
};
use serde::{Deserialize, Serialize};

const FILE_NAME: &str = "losses.csv";
const HEADER: &str = "epoch,loss,best_loss,improved";

/// One epoch of the loss history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EpochLoss {
    pub epoch:     usize,
    /// Mean triplet loss of the epoch, rounded to 6 decimals
    pub loss:      f64,
    pub best_loss: f64,
    /// A checkpoint was written for this epoch
    pub improved:  bool,
}

pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create '{}'", dir.display()))?;

        let csv_path = dir.join(FILE_NAME);
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)
                .with_context(|| format!("Cannot create '{}'", csv_path.display()))?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created loss history '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log(&self, m: &EpochLoss) -> Result<()> {
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.csv_path)
            .with_context(|| format!("Cannot open '{}'", self.csv_path.display()))?;

        writeln!(f, "{},{:.6},{:.6},{}", m.epoch, m.loss, m.best_loss, m.improved)?;
        Ok(())
    }

    pub fn csv_path(&self) -> &PathBuf {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_follow_header() {
        let dir = tempfile::tempdir().unwrap();
        let log = MetricsLogger::new(dir.path()).unwrap();
        log.log(&EpochLoss { epoch: 0, loss: 1.5, best_loss: 1.5, improved: true }).unwrap();
        log.log(&EpochLoss { epoch: 1, loss: 1.75, best_loss: 1.5, improved: false }).unwrap();

        let text = fs::read_to_string(log.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            HEADER,
            "0,1.500000,1.500000,true",
            "1,1.750000,1.500000,false",
        ]);
    }

    #[test]
    fn test_reopening_does_not_repeat_header() {
        let dir = tempfile::tempdir().unwrap();
        MetricsLogger::new(dir.path()).unwrap();
        let log = MetricsLogger::new(dir.path()).unwrap();
        let text = fs::read_to_string(log.csv_path()).unwrap();
        assert_eq!(text.matches(HEADER).count(), 1);
    }
}
