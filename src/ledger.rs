// 📒 Processed-File Ledger - which input files are fully handled
//
// Newline-delimited canonical paths, append-only. A path is appended only after
// its write-back finished; anything else gets retried in full next run.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ProcessedFileLedger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl ProcessedFileLedger {
    /// Read the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read ledger: {}", path.display()))?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            HashSet::new()
        };

        Ok(ProcessedFileLedger {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.entries.contains(&canonical_key(file))
    }

    /// Record a file as processed and flush immediately.
    pub fn append(&mut self, file: &Path) -> Result<()> {
        let key = canonical_key(file);
        if self.entries.contains(&key) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger: {}", self.path.display()))?;
        writeln!(f, "{}", key)?;
        f.flush()?;

        self.entries.insert(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Fully-qualified path string; falls back to the given path if it can't be resolved.
fn canonical_key(file: &Path) -> String {
    file.canonicalize()
        .unwrap_or_else(|_| file.to_path_buf())
        .display()
        .to_string()
}
