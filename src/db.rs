use crate::intake::{parse_date, parse_identifier, read_file_as_utf8};
use crate::records::{ProgramEnrollmentEvent, RegistryRecord};
use crate::writer::EnrollmentStore;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Registry export row (column names as the student information system emits them).
/// Everything is kept as text; coercion happens in [`load_registry`].
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct RegistryCsvRow {
    #[serde(rename = "ID", default)]
    pub id: String,

    #[serde(rename = "FN", default)]
    pub first_name: String,

    #[serde(rename = "LN", default)]
    pub last_name: String,

    #[serde(rename = "BD", default)]
    pub birthdate: String,

    #[serde(rename = "GR", default)]
    pub grade: String,

    #[serde(rename = "NM", default)]
    pub site_name: String,
}

/// Event for audit trail (every enrollment write is recorded)
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl AuditEvent {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Students (registry). Raw text columns: upstream ids/dates are not clean.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            birthdate TEXT,
            grade TEXT,
            site_name TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Program enrollments. (student_id, program_code) is deliberately not a
    // UNIQUE key; the conditional insert below guards it.
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS program_enrollments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            sequence INTEGER NOT NULL,
            program_code INTEGER NOT NULL,
            start_date TEXT,
            program_start_date TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON program_enrollments(student_id, program_code)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Replace the registry with the contents of a registry CSV export.
pub fn import_registry_csv(conn: &Connection, csv_path: &Path) -> Result<usize> {
    let content = read_file_as_utf8(csv_path)?;
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: RegistryCsvRow = result.context("Failed to deserialize registry row")?;
        rows.push(row);
    }

    insert_registry_rows(conn, &rows)
}

/// Replace the registry rows in one transaction.
pub fn insert_registry_rows(conn: &Connection, rows: &[RegistryCsvRow]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM students", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO students (student_id, first_name, last_name, birthdate, grade, site_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for row in rows {
            stmt.execute(params![
                row.id,
                row.first_name,
                row.last_name,
                row.birthdate,
                row.grade,
                row.site_name,
            ])?;
        }
    }

    tx.commit()?;
    info!(rows = rows.len(), "registry imported");
    Ok(rows.len())
}

/// Load the full registry in storage order.
///
/// Non-numeric ids and unparseable dates/grades load as None.
pub fn load_registry(conn: &Connection) -> Result<Vec<RegistryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, first_name, last_name, birthdate, grade, site_name
         FROM students
         ORDER BY row_id",
    )?;

    let records = stmt
        .query_map([], |row| {
            let id: Option<String> = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let birthdate: Option<String> = row.get(3)?;
            let grade: Option<String> = row.get(4)?;
            let site_name: String = row.get(5)?;

            Ok(RegistryRecord::new(
                id.as_deref().and_then(parse_identifier),
                &first_name,
                &last_name,
                birthdate.as_deref().and_then(parse_date),
                grade.and_then(|g| g.trim().parse::<i32>().ok()),
                &site_name,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    info!(records = records.len(), "loaded student registry");
    Ok(records)
}

// ============================================================================
// ENROLLMENT STORE
// ============================================================================

/// SQLite-backed [`EnrollmentStore`]; each insert is its own transaction.
pub struct SqliteEnrollmentStore<'a> {
    conn: &'a Connection,
    actor: String,
}

impl<'a> SqliteEnrollmentStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteEnrollmentStore {
            conn,
            actor: "enrollment_writer".to_string(),
        }
    }
}

impl EnrollmentStore for SqliteEnrollmentStore<'_> {
    fn event_exists(&self, student_id: i64, program_code: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM program_enrollments WHERE student_id = ?1 AND program_code = ?2 LIMIT 1",
                params![student_id, program_code],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn last_sequence(&self, student_id: i64) -> Result<Option<i64>> {
        let seq: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence) FROM program_enrollments WHERE student_id = ?1",
            params![student_id],
            |row| row.get(0),
        )?;
        Ok(seq)
    }

    /// Conditional insert: storage re-checks (student, program) in the same
    /// statement, so a racing writer cannot create a second row.
    fn insert_event(&mut self, event: &ProgramEnrollmentEvent) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let start = event.start_date.map(|d| d.to_string());

        let changed = tx
            .execute(
                "INSERT INTO program_enrollments
                    (student_id, sequence, program_code, start_date, program_start_date)
                 SELECT ?1, ?2, ?3, ?4, ?4
                 WHERE NOT EXISTS (
                    SELECT 1 FROM program_enrollments WHERE student_id = ?1 AND program_code = ?3
                 )",
                params![event.student_id, event.sequence, event.program_code, start],
            )
            .with_context(|| {
                format!(
                    "Failed to insert program {} for student {}",
                    event.program_code, event.student_id
                )
            })?;

        if changed == 1 {
            let audit = AuditEvent::new(
                "program_enrollment_added",
                "student",
                &event.student_id.to_string(),
                serde_json::json!({
                    "program_code": event.program_code,
                    "sequence": event.sequence,
                    "start_date": start,
                }),
                &self.actor,
            );
            insert_audit_event(&tx, &audit)?;
        }

        tx.commit()?;
        Ok(changed == 1)
    }
}

/// All enrollment events for a student, oldest sequence first
pub fn get_program_enrollments(
    conn: &Connection,
    student_id: i64,
) -> Result<Vec<ProgramEnrollmentEvent>> {
    let mut stmt = conn.prepare(
        "SELECT student_id, sequence, program_code, start_date
         FROM program_enrollments
         WHERE student_id = ?1
         ORDER BY sequence",
    )?;

    let events = stmt
        .query_map(params![student_id], |row| {
            let start: Option<String> = row.get(3)?;
            Ok(ProgramEnrollmentEvent {
                student_id: row.get(0)?,
                sequence: row.get(1)?,
                program_code: row.get(2)?,
                start_date: start.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn count_program_enrollments(conn: &Connection) -> Result<i64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM program_enrollments", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Insert event into audit trail
pub fn insert_audit_event(conn: &Connection, event: &AuditEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    debug!(event_type = %event.event_type, entity_id = %event.entity_id, "audit event recorded");
    Ok(())
}

/// Get events for a specific entity
pub fn get_events_for_entity(
    conn: &Connection,
    entity_type: &str,
    entity_id: &str,
) -> Result<Vec<AuditEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(AuditEvent {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchResolver;
    use crate::records::{EnrolleeRecord, MatchType};
    use crate::writer::EnrollmentWriter;

    fn registry_row(id: &str, first: &str, last: &str, bd: &str, gr: &str, site: &str) -> RegistryCsvRow {
        RegistryCsvRow {
            id: id.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            birthdate: bd.to_string(),
            grade: gr.to_string(),
            site_name: site.to_string(),
        }
    }

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_load_registry_coerces_dirty_values() {
        let conn = setup();
        insert_registry_rows(
            &conn,
            &[
                registry_row("1001", "Jane", "Doe", "2012-05-01", "6", " Lincoln "),
                registry_row("A12", "Bad", "Id", "not a date", "0K", "Lincoln"),
            ],
        )
        .unwrap();

        let registry = load_registry(&conn).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry[0].id, Some(1001));
        assert_eq!(registry[0].full_name, "Jane Doe");
        assert_eq!(registry[0].birthdate, NaiveDate::from_ymd_opt(2012, 5, 1));
        assert_eq!(registry[0].grade, Some(6));
        assert_eq!(registry[0].site_name, "Lincoln");
        assert_eq!(registry[1].id, None);
        assert_eq!(registry[1].birthdate, None);
        assert_eq!(registry[1].grade, None);
    }

    #[test]
    fn test_import_replaces_registry() {
        let conn = setup();
        insert_registry_rows(&conn, &[registry_row("1", "A", "B", "", "", "X")]).unwrap();
        insert_registry_rows(&conn, &[registry_row("2", "C", "D", "", "", "Y")]).unwrap();

        let registry = load_registry(&conn).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry[0].id, Some(2));
    }

    #[test]
    fn test_import_registry_csv_file() {
        let conn = setup();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("students.csv");
        std::fs::write(&path, "ID,FN,LN,BD,GR,NM\n1001,Jane,Doe,2012-05-01,6,Lincoln\n").unwrap();

        let count = import_registry_csv(&conn, &path).unwrap();

        assert_eq!(count, 1);
        assert_eq!(load_registry(&conn).unwrap()[0].id, Some(1001));
    }

    #[test]
    fn test_store_round_trips() {
        let conn = setup();
        let mut store = SqliteEnrollmentStore::new(&conn);

        assert!(!store.event_exists(1001, 194).unwrap());
        assert_eq!(store.last_sequence(1001).unwrap(), None);

        let event = ProgramEnrollmentEvent {
            student_id: 1001,
            sequence: 1,
            program_code: 194,
            start_date: NaiveDate::from_ymd_opt(2025, 9, 5),
        };
        assert!(store.insert_event(&event).unwrap());

        assert!(store.event_exists(1001, 194).unwrap());
        assert!(!store.event_exists(1001, 195).unwrap());
        assert_eq!(store.last_sequence(1001).unwrap(), Some(1));
        assert_eq!(get_program_enrollments(&conn, 1001).unwrap(), vec![event]);
    }

    #[test]
    fn test_conditional_insert_refuses_duplicate() {
        let conn = setup();
        let mut store = SqliteEnrollmentStore::new(&conn);
        let event = ProgramEnrollmentEvent {
            student_id: 7,
            sequence: 1,
            program_code: 194,
            start_date: None,
        };

        assert!(store.insert_event(&event).unwrap());
        let again = ProgramEnrollmentEvent { sequence: 2, ..event };
        assert!(!store.insert_event(&again).unwrap());

        assert_eq!(count_program_enrollments(&conn).unwrap(), 1);
        assert_eq!(get_events_for_entity(&conn, "student", "7").unwrap().len(), 1);
    }

    #[test]
    fn test_null_start_date_stored_as_null() {
        let conn = setup();
        let mut store = SqliteEnrollmentStore::new(&conn);
        store
            .insert_event(&ProgramEnrollmentEvent {
                student_id: 3,
                sequence: 1,
                program_code: 194,
                start_date: None,
            })
            .unwrap();

        let start: Option<String> = conn
            .query_row(
                "SELECT start_date FROM program_enrollments WHERE student_id = 3",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(start, None);
    }

    #[test]
    fn test_audit_event_log() {
        let conn = setup();

        let event = AuditEvent::new(
            "test_event",
            "student",
            "1001",
            serde_json::json!({"test": "data"}),
            "test_actor",
        );
        insert_audit_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "student", "1001").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "test_event");
        assert_eq!(events[0].actor, "test_actor");
    }

    #[test]
    fn test_end_to_end_match_then_write() {
        let conn = setup();
        insert_registry_rows(
            &conn,
            &[registry_row("1001", "Jane", "Doe", "2012-05-01", "6", "Lincoln")],
        )
        .unwrap();
        let registry = load_registry(&conn).unwrap();

        let enrollee = EnrolleeRecord::new("Jane", "Doe")
            .with_birthdate(NaiveDate::from_ymd_opt(2012, 5, 1).unwrap())
            .with_location("Lincoln");
        let rows = MatchResolver::new().match_all(&[enrollee], &registry);

        assert_eq!(rows[0].result.match_type, MatchType::FuzzyNameBirthdate);
        assert_eq!(rows[0].student_id(), Some(1001));

        let mut writer = EnrollmentWriter::new(SqliteEnrollmentStore::new(&conn));
        let report = writer.write_batch(&rows, 194).unwrap();

        assert_eq!(report.inserted.len(), 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 1);
        let stored = get_program_enrollments(&conn, 1001).unwrap();
        assert_eq!(stored[0].sequence, 1);
        assert_eq!(stored[0].program_code, 194);

        // Second pass over the same file is a no-op
        let report = writer.write_batch(&rows, 194).unwrap();
        assert!(report.inserted.is_empty());
        assert_eq!(report.duplicates, 1);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 1);
    }

    #[test]
    fn test_non_numeric_registry_id_goes_to_rejected() {
        let conn = setup();
        insert_registry_rows(&conn, &[registry_row("A12", "Jane", "Doe", "2012-05-01", "", "Lincoln")])
            .unwrap();
        let registry = load_registry(&conn).unwrap();

        let enrollee = EnrolleeRecord::new("Jane", "Doe")
            .with_birthdate(NaiveDate::from_ymd_opt(2012, 5, 1).unwrap());
        let rows = MatchResolver::new().match_all(&[enrollee], &registry);
        assert_eq!(rows[0].result.match_type, MatchType::FuzzyNameBirthdate);

        let mut writer = EnrollmentWriter::new(SqliteEnrollmentStore::new(&conn));
        let report = writer.write_batch(&rows, 194).unwrap();

        assert_eq!(report.rejected, rows);
        assert_eq!(count_program_enrollments(&conn).unwrap(), 0);
    }
}
