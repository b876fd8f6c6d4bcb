// ⚙️ Settings - environment variables, overridable from the CLI

use crate::matcher::DEFAULT_FUZZ_THRESHOLD;
use crate::similarity::Score;
use crate::writer::DEFAULT_PROGRAM_CODE;
use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// INPUT_FOLDER
    pub input_dir: PathBuf,
    /// OUTPUT_FOLDER
    pub output_dir: PathBuf,
    /// DATABASE_PATH
    pub database_path: PathBuf,
    /// PROGRAM_CODE
    pub program_code: i64,
    /// FUZZ_THRESHOLD
    pub fuzz_threshold: Score,
    /// TEST_RUN; production (false) asks for confirmation unless automated
    pub test_run: bool,
    /// Record program enrollments for matched rows
    pub write_back: bool,
    /// LOG_FILE
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            input_dir: PathBuf::from("./in"),
            output_dir: PathBuf::from("./out"),
            database_path: PathBuf::from("./enrollment.db"),
            program_code: DEFAULT_PROGRAM_CODE,
            fuzz_threshold: DEFAULT_FUZZ_THRESHOLD,
            test_run: true,
            write_back: true,
            log_file: None,
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup (tests pass a map)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(v) = lookup("INPUT_FOLDER") {
            settings.input_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OUTPUT_FOLDER") {
            settings.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            settings.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PROGRAM_CODE") {
            settings.program_code = v
                .trim()
                .parse()
                .with_context(|| format!("PROGRAM_CODE is not an integer: {:?}", v))?;
        }
        if let Some(v) = lookup("FUZZ_THRESHOLD") {
            let threshold: Score = v
                .trim()
                .parse()
                .with_context(|| format!("FUZZ_THRESHOLD is not an integer: {:?}", v))?;
            if threshold > 100 {
                anyhow::bail!("FUZZ_THRESHOLD must be between 0 and 100, got {}", threshold);
            }
            settings.fuzz_threshold = threshold;
        }
        if let Some(v) = lookup("TEST_RUN") {
            settings.test_run = parse_bool(&v)
                .with_context(|| format!("TEST_RUN is not a boolean: {:?}", v))?;
        }
        if let Some(v) = lookup("LOG_FILE") {
            settings.log_file = Some(PathBuf::from(v));
        }

        Ok(settings)
    }

    /// `<output_dir>/processed_files.txt`
    pub fn ledger_path(&self) -> PathBuf {
        self.output_dir.join("processed_files.txt")
    }

    /// `<output_dir>/rejected_rows.csv`
    pub fn rejected_path(&self) -> PathBuf {
        self.output_dir.join("rejected_rows.csv")
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "y" | "t" => Ok(true),
        "0" | "false" | "no" | "off" | "n" | "f" | "" => Ok(false),
        other => anyhow::bail!("unrecognized boolean {:?}", other),
    }
}
