// 🔁 File Intake Loop - discover → ingest → match → export → write back → ledger
//
// A file enters the ledger only once its write-back finished cleanly. Any
// failure (ingest, export, database) leaves it out so the next run retries it
// in full; rows already written are skipped then by the existence check.

use crate::intake::load_enrollees;
use crate::ledger::ProcessedFileLedger;
use crate::matcher::MatchResolver;
use crate::output::{matched_output_path, write_matched_rows};
use crate::records::RegistryRecord;
use crate::writer::{EnrollmentStore, EnrollmentWriter};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, info_span, warn};

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Files fully handled (and recorded in the ledger when writing back)
    pub processed: Vec<PathBuf>,
    /// Files skipped because the ledger already has them
    pub already_processed: usize,
    /// Files that failed, with the error; retried next run
    pub failed: Vec<(PathBuf, String)>,
    pub rows_matched: usize,
    pub rows_total: usize,
    pub inserted: usize,
    pub rejected: usize,
}

impl RunSummary {
    fn absorb(&mut self, other: RunSummary) {
        self.processed.extend(other.processed);
        self.already_processed += other.already_processed;
        self.failed.extend(other.failed);
        self.rows_matched += other.rows_matched;
        self.rows_total += other.rows_total;
        self.inserted += other.inserted;
        self.rejected += other.rejected;
    }
}

struct FileOutcome {
    rows_total: usize,
    rows_matched: usize,
    inserted: usize,
    rejected: usize,
}

// ============================================================================
// DISCOVERY
// ============================================================================

/// Enrollment CSVs in `dir`, sorted by path.
///
/// Name must contain "enrollment" (any case); editor temp files ("~...") are ignored.
pub fn discover_enrollment_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input folder: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && is_enrollment_file(&path) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

fn is_enrollment_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    is_csv && !name.starts_with('~') && name.to_lowercase().contains("enrollment")
}

// ============================================================================
// INTAKE LOOP
// ============================================================================

pub struct IntakeLoop<'a, S: EnrollmentStore> {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub program_code: i64,
    registry: &'a [RegistryRecord],
    resolver: MatchResolver,
    /// None = match and export only; the ledger is then left untouched
    writer: Option<EnrollmentWriter<S>>,
    ledger: ProcessedFileLedger,
}

impl<'a, S: EnrollmentStore> IntakeLoop<'a, S> {
    pub fn new(
        input_dir: PathBuf,
        output_dir: PathBuf,
        program_code: i64,
        registry: &'a [RegistryRecord],
        resolver: MatchResolver,
        writer: Option<EnrollmentWriter<S>>,
        ledger: ProcessedFileLedger,
    ) -> Self {
        IntakeLoop {
            input_dir,
            output_dir,
            program_code,
            registry,
            resolver,
            writer,
            ledger,
        }
    }

    pub fn ledger(&self) -> &ProcessedFileLedger {
        &self.ledger
    }

    /// Process every enrollment file not yet in the ledger.
    pub fn process_folder(&mut self) -> Result<RunSummary> {
        if !self.input_dir.exists() {
            warn!(dir = %self.input_dir.display(), "input folder does not exist");
            return Ok(RunSummary::default());
        }

        let files = discover_enrollment_files(&self.input_dir)?;
        if files.is_empty() {
            info!(dir = %self.input_dir.display(), "no enrollment files found");
            return Ok(RunSummary::default());
        }

        let mut summary = RunSummary::default();
        let pending: Vec<PathBuf> = files
            .into_iter()
            .filter(|f| {
                let done = self.ledger.contains(f);
                if done {
                    summary.already_processed += 1;
                }
                !done
            })
            .collect();

        if pending.is_empty() {
            info!(dir = %self.input_dir.display(), "no new enrollment files to process");
            return Ok(summary);
        }

        summary.absorb(self.process_files(&pending));
        Ok(summary)
    }

    /// Process the given files in order; per-file failures are logged, not raised.
    pub fn process_files(&mut self, files: &[PathBuf]) -> RunSummary {
        let mut summary = RunSummary::default();

        for file in files {
            let _span = info_span!("file", name = %file.display()).entered();
            info!("processing file");

            match self.process_file(file) {
                Ok(outcome) => {
                    summary.processed.push(file.clone());
                    summary.rows_total += outcome.rows_total;
                    summary.rows_matched += outcome.rows_matched;
                    summary.inserted += outcome.inserted;
                    summary.rejected += outcome.rejected;
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "error processing file; will retry next run");
                    summary.failed.push((file.clone(), format!("{:#}", e)));
                }
            }
        }

        summary
    }

    fn process_file(&mut self, file: &Path) -> Result<FileOutcome> {
        let enrollees = load_enrollees(file)?;
        let rows = self.resolver.match_all(&enrollees, self.registry);
        let rows_matched = rows
            .iter()
            .filter(|r| r.result.match_type.is_match())
            .count();

        let out_path = matched_output_path(&self.output_dir, file);
        write_matched_rows(&out_path, &rows)?;

        let unique_ids: HashSet<i64> = rows.iter().filter_map(|r| r.student_id()).collect();
        info!(
            matched = rows_matched,
            total = rows.len(),
            unique_students = unique_ids.len(),
            output = %out_path.display(),
            "matched output written"
        );

        let mut outcome = FileOutcome {
            rows_total: rows.len(),
            rows_matched,
            inserted: 0,
            rejected: 0,
        };

        if let Some(writer) = self.writer.as_mut() {
            let report = writer
                .write_batch(&rows, self.program_code)
                .context("write-back failed")?;
            outcome.inserted = report.inserted.len();
            outcome.rejected = report.rejected.len();

            if !report.is_clean() {
                anyhow::bail!(
                    "write-back failed for {} row(s), first: line {}: {}",
                    report.failed.len(),
                    report.failed[0].0,
                    report.failed[0].1
                );
            }

            // Only a clean write-back marks the file done
            if let Err(e) = self.ledger.append(file) {
                error!(error = %format!("{:#}", e), "failed to record processed file");
            }
        }

        Ok(outcome)
    }

    /// Process existing files, then poll for new ones.
    ///
    /// New files get `settle` of blocking sleep before being opened so the
    /// sender can finish writing them. `max_polls` bounds the loop (None = forever).
    /// A failed folder listing is logged and retried on the next poll.
    pub fn watch(
        &mut self,
        poll_interval: Duration,
        settle: Duration,
        max_polls: Option<usize>,
    ) -> RunSummary {
        let mut summary = match self.process_folder() {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "initial folder pass failed; continuing to watch");
                RunSummary::default()
            }
        };
        let mut attempted: HashSet<PathBuf> = self.list_input().into_iter().collect();

        info!(dir = %self.input_dir.display(), "watching for new enrollment files");
        let mut polls = 0usize;

        loop {
            if let Some(max) = max_polls {
                if polls >= max {
                    break;
                }
            }
            polls += 1;
            std::thread::sleep(poll_interval);

            let new_files: Vec<PathBuf> = self
                .list_input()
                .into_iter()
                .filter(|f| !attempted.contains(f) && !self.ledger.contains(f))
                .collect();

            if new_files.is_empty() {
                continue;
            }

            info!(count = new_files.len(), "new enrollment file(s) detected");
            std::thread::sleep(settle);

            attempted.extend(new_files.iter().cloned());
            summary.absorb(self.process_files(&new_files));
        }

        summary
    }

    /// Current enrollment files; a missing or unreadable folder reads as empty.
    fn list_input(&self) -> Vec<PathBuf> {
        if !self.input_dir.exists() {
            return Vec::new();
        }
        match discover_enrollment_files(&self.input_dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    dir = %self.input_dir.display(),
                    error = %format!("{:#}", e),
                    "failed to list input folder; retrying next poll"
                );
                Vec::new()
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        count_program_enrollments, insert_registry_rows, load_registry, setup_database,
        RegistryCsvRow, SqliteEnrollmentStore,
    };
    use crate::records::ProgramEnrollmentEvent;
    use rusqlite::Connection;

    const ENROLLMENT_CSV: &str = "\
Contact: First Name,Contact: Last Name,Contact: Birthdate,School ID,Grade,Course Option Location,Enrollment Start Date
Jane,Doe,05/01/2012,,6,Lincoln,09/05/2025
Robert,Smith,,1002,7,,09/06/2025
Nobody,Here,,,,nan,
";

    fn setup_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        insert_registry_rows(
            &conn,
            &[
                RegistryCsvRow {
                    id: "1001".into(),
                    first_name: "Jane".into(),
                    last_name: "Doe".into(),
                    birthdate: "2012-05-01".into(),
                    grade: "6".into(),
                    site_name: "Lincoln".into(),
                },
                RegistryCsvRow {
                    id: "1002".into(),
                    first_name: "Robert".into(),
                    last_name: "Smith".into(),
                    birthdate: "2011-03-09".into(),
                    grade: "7".into(),
                    site_name: "Lincoln".into(),
                },
            ],
        )
        .unwrap();
        conn
    }

    struct FailingStore;

    impl EnrollmentStore for FailingStore {
        fn event_exists(&self, _: i64, _: i64) -> Result<bool> {
            anyhow::bail!("database unavailable")
        }
        fn last_sequence(&self, _: i64) -> Result<Option<i64>> {
            Ok(None)
        }
        fn insert_event(&mut self, _: &ProgramEnrollmentEvent) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "enrollment_2025-09-05.csv",
            "Enrollment_2025-09-01_2025-09-30.CSV",
            "attendance_2025-09-05.csv",
            "~enrollment_tmp.csv",
            "enrollment_notes.txt",
        ] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }

        let files = discover_enrollment_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(
            names,
            vec!["Enrollment_2025-09-01_2025-09-30.CSV", "enrollment_2025-09-05.csv"]
        );
    }

    #[test]
    fn test_process_folder_writes_back_and_records_ledger() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let file = input.path().join("enrollment_2025-09-05.csv");
        std::fs::write(&file, ENROLLMENT_CSV).unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();
        let ledger =
            ProcessedFileLedger::load(&output.path().join("processed_files.txt")).unwrap();
        let writer = EnrollmentWriter::new(SqliteEnrollmentStore::new(&conn))
            .with_rejected_path(output.path().join("rejected_rows.csv"));

        let mut intake = IntakeLoop::new(
            input.path().to_path_buf(),
            output.path().to_path_buf(),
            194,
            &registry,
            MatchResolver::new(),
            Some(writer),
            ledger,
        );

        let summary = intake.process_folder().unwrap();

        assert_eq!(summary.processed.len(), 1);
        assert!(summary.failed.is_empty());
        assert_eq!(summary.rows_total, 3);
        assert_eq!(summary.rows_matched, 2);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.rejected, 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 2);
        assert!(intake.ledger().contains(&file));
        assert!(output.path().join("matched_enrollment_2025-09-05.csv").exists());
        assert!(output.path().join("rejected_rows.csv").exists());

        // Second run: already in the ledger, nothing happens
        let again = intake.process_folder().unwrap();
        assert!(again.processed.is_empty());
        assert_eq!(again.already_processed, 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 2);
    }

    #[test]
    fn test_failed_write_back_not_recorded() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        let file = input.path().join("enrollment_a.csv");
        std::fs::write(&file, ENROLLMENT_CSV).unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();
        let ledger_path = output.path().join("processed_files.txt");

        let mut intake = IntakeLoop::new(
            input.path().to_path_buf(),
            output.path().to_path_buf(),
            194,
            &registry,
            MatchResolver::new(),
            Some(EnrollmentWriter::new(FailingStore)),
            ProcessedFileLedger::load(&ledger_path).unwrap(),
        );

        let summary = intake.process_folder().unwrap();

        assert!(summary.processed.is_empty());
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].1.contains("database unavailable"));
        assert!(!intake.ledger().contains(&file));
        assert!(!ProcessedFileLedger::load(&ledger_path).unwrap().contains(&file));
    }

    #[test]
    fn test_bad_file_skipped_others_continue() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("enrollment_a_bad.csv"), "Shirt Size\nM\n").unwrap();
        std::fs::write(input.path().join("enrollment_b_good.csv"), ENROLLMENT_CSV).unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();

        let mut intake = IntakeLoop::new(
            input.path().to_path_buf(),
            output.path().to_path_buf(),
            194,
            &registry,
            MatchResolver::new(),
            Some(EnrollmentWriter::new(SqliteEnrollmentStore::new(&conn))),
            ProcessedFileLedger::load(&output.path().join("ledger.txt")).unwrap(),
        );

        let summary = intake.process_folder().unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.processed.len(), 1);
        assert_eq!(intake.ledger().len(), 1);
    }

    #[test]
    fn test_match_only_leaves_ledger_untouched() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("enrollment_a.csv"), ENROLLMENT_CSV).unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();

        let mut intake: IntakeLoop<SqliteEnrollmentStore> = IntakeLoop::new(
            input.path().to_path_buf(),
            output.path().to_path_buf(),
            194,
            &registry,
            MatchResolver::new(),
            None,
            ProcessedFileLedger::load(&output.path().join("ledger.txt")).unwrap(),
        );

        let summary = intake.process_folder().unwrap();

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(summary.inserted, 0);
        assert!(intake.ledger().is_empty());
        assert_eq!(count_program_enrollments(&conn).unwrap(), 0);
    }

    #[test]
    fn test_missing_input_folder_is_not_an_error() {
        let output = tempfile::tempdir().unwrap();
        let registry: Vec<RegistryRecord> = Vec::new();

        let mut intake: IntakeLoop<FailingStore> = IntakeLoop::new(
            output.path().join("does-not-exist"),
            output.path().to_path_buf(),
            194,
            &registry,
            MatchResolver::new(),
            None,
            ProcessedFileLedger::load(&output.path().join("ledger.txt")).unwrap(),
        );

        let summary = intake.process_folder().unwrap();
        assert!(summary.processed.is_empty());
    }

    fn watch_loop<'a>(
        input: &Path,
        output: &Path,
        registry: &'a [RegistryRecord],
        conn: &'a Connection,
    ) -> IntakeLoop<'a, SqliteEnrollmentStore<'a>> {
        IntakeLoop::new(
            input.to_path_buf(),
            output.to_path_buf(),
            194,
            registry,
            MatchResolver::new(),
            Some(EnrollmentWriter::new(SqliteEnrollmentStore::new(conn))),
            ProcessedFileLedger::load(&output.join("ledger.txt")).unwrap(),
        )
    }

    #[test]
    fn test_watch_bounded_polls() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("enrollment_a.csv"), ENROLLMENT_CSV).unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();
        let mut intake = watch_loop(input.path(), output.path(), &registry, &conn);

        let summary = intake.watch(Duration::from_millis(1), Duration::from_millis(1), Some(2));

        assert_eq!(summary.processed.len(), 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 2);
    }

    #[test]
    fn test_watch_picks_up_file_dropped_while_polling() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();
        let mut intake = watch_loop(input.path(), output.path(), &registry, &conn);

        // Written under a name discovery ignores, then renamed in one step
        let staging = input.path().join("incoming.part");
        let target = input.path().join("enrollment_late.csv");
        let dropper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&staging, ENROLLMENT_CSV).unwrap();
            std::fs::rename(&staging, &target).unwrap();
        });

        let summary = intake.watch(Duration::from_millis(10), Duration::from_millis(5), Some(100));
        dropper.join().unwrap();

        let late = input.path().join("enrollment_late.csv");
        assert_eq!(summary.processed, vec![late.clone()]);
        assert!(intake.ledger().contains(&late));
        assert_eq!(count_program_enrollments(&conn).unwrap(), 2);
    }

    #[test]
    fn test_watch_survives_unreadable_input_folder() {
        let root = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        // A plain file where the folder should be: exists, but cannot be listed
        let input = root.path().join("inbox");
        std::fs::write(&input, "not a directory").unwrap();

        let conn = setup_conn();
        let registry = load_registry(&conn).unwrap();
        let mut intake = watch_loop(&input, output.path(), &registry, &conn);

        let summary = intake.watch(Duration::from_millis(1), Duration::from_millis(1), Some(3));
        assert!(summary.processed.is_empty());
        assert!(summary.failed.is_empty());

        // Folder comes back; the same loop carries on
        std::fs::remove_file(&input).unwrap();
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("enrollment_a.csv"), ENROLLMENT_CSV).unwrap();

        let summary = intake.watch(Duration::from_millis(1), Duration::from_millis(1), Some(1));
        assert_eq!(summary.processed.len(), 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 2);
    }
}
