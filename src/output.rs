// 📤 Output - matched table + rejected rows as CSV

use crate::records::MatchedRow;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

/// Column order of [`crate::records::MatchedRowExport`], used when a table
/// has no rows (serde only emits headers alongside the first record).
pub const EXPORT_HEADERS: [&str; 18] = [
    "Contact: First Name",
    "Contact: Last Name",
    "Contact: Birthdate",
    "School ID",
    "Course Option Location",
    "Grade",
    "Enrollment Start Date",
    "csv_fullname",
    "csv_GR",
    "match_type",
    "notes",
    "ID",
    "FN",
    "LN",
    "db_fullname",
    "BD",
    "db_GR",
    "NM",
];

/// `<output_dir>/matched_<input stem>.csv`
pub fn matched_output_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("enrollment");
    output_dir.join(format!("matched_{}.csv", stem))
}

fn write_rows(path: &Path, rows: &[MatchedRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
        }
    }

    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;

    if rows.is_empty() {
        wtr.write_record(EXPORT_HEADERS)?;
    }
    for row in rows {
        wtr.serialize(row.to_export())
            .with_context(|| format!("Failed to write row to {}", path.display()))?;
    }
    wtr.flush()?;

    Ok(())
}

/// Write the full matched table.
pub fn write_matched_rows(path: &Path, rows: &[MatchedRow]) -> Result<()> {
    write_rows(path, rows)?;
    info!(path = %path.display(), rows = rows.len(), "wrote matched output");
    Ok(())
}

/// Write rejected rows verbatim for manual review (overwrites each batch).
pub fn write_rejected_rows(path: &Path, rows: &[MatchedRow]) -> Result<()> {
    write_rows(path, rows)?;
    info!(path = %path.display(), rows = rows.len(), "wrote rejected rows");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{EnrolleeRecord, MatchResult, MatchedRowExport};

    #[test]
    fn test_matched_output_path() {
        let path = matched_output_path(Path::new("/out"), Path::new("/in/enrollment_2025-09-05.csv"));
        assert_eq!(path, PathBuf::from("/out/matched_enrollment_2025-09-05.csv"));
    }

    #[test]
    fn test_empty_table_still_has_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rejected_rows.csv");

        write_rejected_rows(&path, &[]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.starts_with("Contact: First Name,"));
    }

    #[test]
    fn test_headers_match_serialized_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matched.csv");
        let row = MatchedRow {
            enrollee: EnrolleeRecord::new("Jane", "Doe"),
            result: MatchResult::no_match(),
        };

        write_matched_rows(&path, &[row]).unwrap();

        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(str::to_string).collect();
        assert_eq!(headers, EXPORT_HEADERS.to_vec());

        let parsed: Vec<MatchedRowExport> = rdr.deserialize().collect::<Result<_, _>>().unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].match_type, "No Match");
        assert_eq!(parsed[0].db_id, None);
    }

    #[test]
    fn test_creates_missing_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/matched.csv");

        write_matched_rows(&path, &[]).unwrap();
        assert!(path.exists());
    }
}
