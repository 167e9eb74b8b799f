//! Run log: one JSON `UnitResult` per line, append-only.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::units::UnitResult;

pub struct RunLog {
    path: PathBuf,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, result: &UnitResult) -> io::Result<()> {
        let json = serde_json::to_string(result)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Every logged result, oldest first. Malformed lines are skipped.
    pub fn read_all(&self) -> io::Result<Vec<UnitResult>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut results = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<UnitResult>(&line) {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "skipping malformed run log line"),
            }
        }
        Ok(results)
    }

    /// The most recent `n` results, newest last.
    pub fn tail(&self, n: usize) -> io::Result<Vec<UnitResult>> {
        let mut all = self.read_all()?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
