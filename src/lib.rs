// Enrollment Linkage - Core Library
// Links program enrollee rosters to the student registry and records
// program enrollments exactly once per student.

pub mod grade;
pub mod similarity;
pub mod records;
pub mod candidates;
pub mod matcher;     // Match Resolver + Batch Matcher
pub mod writer;      // Enrollment Writer (at-most-once insert)
pub mod intake;      // CSV ingestion + header normalization
pub mod output;
pub mod ledger;
pub mod pipeline;    // File Intake Loop
pub mod db;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use records::{
    EnrolleeRecord, MatchResult, MatchType, MatchedRow, MatchedRowExport,
    ProgramEnrollmentEvent, RegistryRecord,
};
pub use matcher::{MatchResolver, DEFAULT_FUZZ_THRESHOLD};
pub use writer::{EnrollmentStore, EnrollmentWriter, WriteReport, DEFAULT_PROGRAM_CODE};
pub use intake::{load_enrollees, IngestError};
pub use ledger::ProcessedFileLedger;
pub use pipeline::{discover_enrollment_files, IntakeLoop, RunSummary};
pub use db::{
    setup_database, import_registry_csv, load_registry,
    SqliteEnrollmentStore, AuditEvent,
};
pub use config::Settings;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
