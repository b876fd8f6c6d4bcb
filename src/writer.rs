// ✍️ Enrollment Writer - at-most-once program enrollment per student
//
// Per matched row: reject if no id → skip if (id, program) exists →
// next sequence = last + 1 (or 1) → single insert, committed immediately.
// A store failure on one row is logged and the batch moves on.

use crate::intake::parse_date;
use crate::output::write_rejected_rows;
use crate::records::{MatchedRow, ProgramEnrollmentEvent};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Program code written when none is configured
pub const DEFAULT_PROGRAM_CODE: i64 = 194;

// ============================================================================
// STORE TRAIT (injected data source)
// ============================================================================

/// The three round trips the writer needs from storage.
///
/// Each call is its own unit of work; nothing spans rows.
pub trait EnrollmentStore {
    /// Does an event exist for (student, program)?
    fn event_exists(&self, student_id: i64, program_code: i64) -> Result<bool>;

    /// Highest sequence number for the student, across every program code
    fn last_sequence(&self, student_id: i64) -> Result<Option<i64>>;

    /// Insert one event and commit. Returns false if storage refused it as a duplicate.
    fn insert_event(&mut self, event: &ProgramEnrollmentEvent) -> Result<bool>;
}

// ============================================================================
// WRITE REPORT
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteReport {
    pub inserted: Vec<ProgramEnrollmentEvent>,
    /// Rows skipped because the student already has this program
    pub duplicates: usize,
    /// Rows with a missing or non-numeric student id, verbatim
    pub rejected: Vec<MatchedRow>,
    /// Rows whose store calls failed: (source line, error)
    pub failed: Vec<(usize, String)>,
}

impl WriteReport {
    pub fn summary(&self) -> String {
        format!(
            "{} inserted, {} already enrolled, {} rejected, {} failed",
            self.inserted.len(),
            self.duplicates,
            self.rejected.len(),
            self.failed.len()
        )
    }

    /// Every row either landed, was already there, or was rejected
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum RowOutcome {
    Inserted(ProgramEnrollmentEvent),
    Duplicate,
}

// ============================================================================
// ENROLLMENT WRITER
// ============================================================================

pub struct EnrollmentWriter<S: EnrollmentStore> {
    pub store: S,

    /// Where rejected rows are persisted at the end of each batch
    pub rejected_path: Option<PathBuf>,
}

impl<S: EnrollmentStore> EnrollmentWriter<S> {
    pub fn new(store: S) -> Self {
        EnrollmentWriter {
            store,
            rejected_path: None,
        }
    }

    pub fn with_rejected_path(mut self, path: PathBuf) -> Self {
        self.rejected_path = Some(path);
        self
    }

    /// Write one program enrollment per matched student, in input order.
    ///
    /// A failing row is recorded in `failed` and never marked inserted;
    /// rows committed before it stay committed. Only persisting the rejected
    /// rows can fail the whole batch.
    pub fn write_batch(&mut self, rows: &[MatchedRow], program_code: i64) -> Result<WriteReport> {
        let mut report = WriteReport::default();

        for row in rows {
            let student_id = match row.student_id() {
                Some(id) => id,
                None => {
                    warn!(
                        line = row.enrollee.line_number,
                        name = %row.enrollee.full_name,
                        match_type = row.result.match_type.label(),
                        "student id missing or invalid, skipping insertion"
                    );
                    report.rejected.push(row.clone());
                    continue;
                }
            };

            match self.write_row(row, student_id, program_code) {
                Ok(RowOutcome::Inserted(event)) => report.inserted.push(event),
                Ok(RowOutcome::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    error!(
                        line = row.enrollee.line_number,
                        student_id,
                        program_code,
                        error = %format!("{:#}", e),
                        "failed to write program enrollment"
                    );
                    report.failed.push((row.enrollee.line_number, format!("{:#}", e)));
                }
            }
        }

        if let Some(path) = &self.rejected_path {
            write_rejected_rows(path, &report.rejected)?;
        }

        info!("write-back complete: {}", report.summary());
        Ok(report)
    }

    fn write_row(&mut self, row: &MatchedRow, student_id: i64, program_code: i64) -> Result<RowOutcome> {
        if self.store.event_exists(student_id, program_code)? {
            debug!(student_id, program_code, "already enrolled, skipping insertion");
            return Ok(RowOutcome::Duplicate);
        }

        let sequence = self.next_sequence(student_id)?;

        let event = ProgramEnrollmentEvent {
            student_id,
            sequence,
            program_code,
            start_date: row.enrollee.enrollment_start.as_deref().and_then(parse_date),
        };

        if self.store.insert_event(&event)? {
            info!(student_id, program_code, sequence, "inserted program enrollment");
            Ok(RowOutcome::Inserted(event))
        } else {
            debug!(student_id, program_code, "insert refused by storage as duplicate");
            Ok(RowOutcome::Duplicate)
        }
    }

    /// previous + 1, or 1 when the student has no events at all
    fn next_sequence(&self, student_id: i64) -> Result<i64> {
        Ok(match self.store.last_sequence(student_id)? {
            Some(previous) => previous + 1,
            None => {
                debug!(student_id, "no previous program data for student, starting at 1");
                1
            }
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
