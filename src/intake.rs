// 📥 Enrollment Intake - CSV → EnrolleeRecord
//
// Files come as a full snapshot plus later delta exports whose headers drift
// ("School ID" vs "Student ID", "Grade" vs "Grade fx", spacing/punctuation).
// Headers are mapped onto canonical columns; absent optional columns load as None.

use crate::grade;
use crate::records::EnrolleeRecord;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {path} at line {line}: {source}")]
    CsvParse {
        path: PathBuf,
        line: usize,
        #[source]
        source: csv::Error,
    },

    #[error("required column '{column}' not found in {path}")]
    MissingColumn { column: String, path: PathBuf },
}

// ============================================================================
// CANONICAL COLUMNS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    FirstName,
    LastName,
    Birthdate,
    SchoolId,
    Location,
    Grade,
    EnrollmentStart,
}

impl Column {
    /// Canonical header name
    pub fn header(&self) -> &'static str {
        match self {
            Column::FirstName => "Contact: First Name",
            Column::LastName => "Contact: Last Name",
            Column::Birthdate => "Contact: Birthdate",
            Column::SchoolId => "School ID",
            Column::Location => "Course Option Location",
            Column::Grade => "Grade",
            Column::EnrollmentStart => "Enrollment Start Date",
        }
    }
}

/// Map a raw header onto a canonical column.
///
/// Comparison ignores case, whitespace and punctuation, so
/// "Contact: First Name", "contact first name" and "CONTACT_FIRSTNAME" agree.
/// Name and birthdate columns need the "contact" prefix; exports also carry
/// parent/guardian columns ("Parent First Name") that must not map.
pub fn normalize_header(raw: &str) -> Option<Column> {
    let key: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect();

    if key.contains("contactfirstname") {
        return Some(Column::FirstName);
    }
    if key.contains("contactlastname") {
        return Some(Column::LastName);
    }
    if key.contains("contactbirthdate") {
        return Some(Column::Birthdate);
    }
    if key.contains("schoolid") || key.contains("studentid") {
        return Some(Column::SchoolId);
    }
    if key.contains("courseoptionlocation") {
        return Some(Column::Location);
    }
    if key.contains("enrollmentstartdate") {
        return Some(Column::EnrollmentStart);
    }
    if key == "grade" || key == "gradefx" {
        return Some(Column::Grade);
    }

    None
}

// ============================================================================
// FILE READING
// ============================================================================

/// Read a file as UTF-8, falling back to Windows-1252 (Excel exports).
pub fn read_file_as_utf8(path: &Path) -> Result<String, IngestError> {
    let bytes = std::fs::read(path).map_err(|source| IngestError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;

    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            debug!(path = %path.display(), "not valid UTF-8, decoding as Windows-1252");
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            decoded.into_owned()
        }
    };

    if content.starts_with('\u{feff}') {
        Ok(content['\u{feff}'.len_utf8()..].to_string())
    } else {
        Ok(content)
    }
}

/// Load every row of an enrollment file.
pub fn load_enrollees(path: &Path) -> Result<Vec<EnrolleeRecord>, IngestError> {
    let content = read_file_as_utf8(path)?;
    parse_enrollees(&content, path)
}

/// Parse enrollment CSV content; `path` is only used for error context.
pub fn parse_enrollees(content: &str, path: &Path) -> Result<Vec<EnrolleeRecord>, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|source| IngestError::CsvParse {
            path: path.to_path_buf(),
            line: 1,
            source,
        })?
        .clone();

    // First header wins if two map to the same column
    let mut columns: HashMap<Column, usize> = HashMap::new();
    for (idx, header) in headers.iter().enumerate() {
        if let Some(col) = normalize_header(header) {
            columns.entry(col).or_insert(idx);
        }
    }

    for required in [Column::FirstName, Column::LastName] {
        if !columns.contains_key(&required) {
            return Err(IngestError::MissingColumn {
                column: required.header().to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    if !columns.contains_key(&Column::SchoolId) {
        warn!(path = %path.display(), "no 'School ID' / 'Student ID' column; identifier matching will be skipped");
    }
    if !columns.contains_key(&Column::Grade) {
        warn!(path = %path.display(), "no 'Grade' column");
    }

    let mut enrollees = Vec::new();

    for (row_idx, result) in reader.records().enumerate() {
        let line_number = row_idx + 2; // 1-indexed + header row
        let record = result.map_err(|source| IngestError::CsvParse {
            path: path.to_path_buf(),
            line: line_number,
            source,
        })?;

        let field = |col: Column| {
            columns
                .get(&col)
                .and_then(|&idx| record.get(idx))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let first_name = field(Column::FirstName).unwrap_or("");
        let last_name = field(Column::LastName).unwrap_or("");
        let grade_token = field(Column::Grade).map(str::to_string);

        enrollees.push(EnrolleeRecord {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            full_name: title_case(&format!("{} {}", first_name, last_name)),
            birthdate: field(Column::Birthdate).and_then(parse_date),
            school_id: field(Column::SchoolId).and_then(parse_identifier),
            location: field(Column::Location).map(str::to_string),
            grade: grade::normalize_opt(grade_token.as_deref()),
            grade_token,
            enrollment_start: field(Column::EnrollmentStart).map(str::to_string),
            line_number,
        });
    }

    debug!(path = %path.display(), rows = enrollees.len(), "loaded enrollment rows");
    Ok(enrollees)
}

// ============================================================================
// VALUE PARSING
// ============================================================================

/// Parse a date, dropping any time component.
///
/// Supports YYYY-MM-DD, MM/DD/YYYY, M/D/YY and either form followed by a
/// time ("2025-09-05T00:00:00", "9/5/2025 8:00 AM"). Anything else → None.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }

    let date_part = s.split_whitespace().next().unwrap_or(s);

    if let Ok(d) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        return Some(d);
    }

    // A bare %Y would read "12" as year 0012
    let year_len = date_part.rsplit('/').next().map(str::len).unwrap_or(0);
    let fmt = if year_len == 2 { "%m/%d/%y" } else { "%m/%d/%Y" };
    NaiveDate::parse_from_str(date_part, fmt).ok()
}

/// Parse an external identifier; spreadsheet exports sometimes write "1234.0".
pub fn parse_identifier(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(id) = s.parse::<i64>() {
        return Some(id);
    }
    // `as` saturates, so out-of-range values would all collapse to i64::MAX
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Some(f as i64),
        _ => None,
    }
}

/// Uppercase the first letter of each word, lowercase the rest.
/// A "word" restarts after any non-letter, so "o'brien" → "O'Brien".
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;

    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }

    out
}
