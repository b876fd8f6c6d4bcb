// 🧾 Record Types - Registry, Enrollee, Match Result
// Two explicitly-typed sides plus one merged row; no dynamic column bags.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// REGISTRY RECORD (authoritative student source)
// ============================================================================

/// One row of the student registry.
///
/// `id` is the natural key but upstream data is dirty: a missing or
/// non-numeric identifier loads as `None`, and duplicates are possible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    /// first + " " + last, no casing transform
    pub full_name: String,
    pub birthdate: Option<NaiveDate>,
    pub grade: Option<i32>,
    /// Site / school name, whitespace-trimmed
    pub site_name: String,
}

impl RegistryRecord {
    pub fn new(
        id: Option<i64>,
        first_name: &str,
        last_name: &str,
        birthdate: Option<NaiveDate>,
        grade: Option<i32>,
        site_name: &str,
    ) -> Self {
        RegistryRecord {
            id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            full_name: format!("{} {}", first_name, last_name),
            birthdate,
            grade,
            site_name: site_name.trim().to_string(),
        }
    }
}

// ============================================================================
// ENROLLEE RECORD (incoming file row)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolleeRecord {
    pub first_name: String,
    pub last_name: String,
    /// Title-cased "first last"
    pub full_name: String,
    pub birthdate: Option<NaiveDate>,
    /// Normalized from "School ID" / "Student ID"
    pub school_id: Option<i64>,
    /// Course option location, trimmed
    pub location: Option<String>,
    /// Raw grade token as it appeared in the file
    pub grade_token: Option<String>,
    pub grade: Option<i32>,
    /// Raw enrollment start date; parsed at write time
    pub enrollment_start: Option<String>,
    /// Line in the source file (1-indexed, header = line 1)
    pub line_number: usize,
}

impl EnrolleeRecord {
    /// Build a record with just the name fields; the rest default to absent.
    pub fn new(first_name: &str, last_name: &str) -> Self {
        EnrolleeRecord {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            full_name: crate::intake::title_case(&format!("{} {}", first_name, last_name)),
            birthdate: None,
            school_id: None,
            location: None,
            grade_token: None,
            grade: None,
            enrollment_start: None,
            line_number: 0,
        }
    }

    /// Builder pattern: add birthdate
    pub fn with_birthdate(mut self, birthdate: NaiveDate) -> Self {
        self.birthdate = Some(birthdate);
        self
    }

    /// Builder pattern: add external identifier
    pub fn with_school_id(mut self, id: i64) -> Self {
        self.school_id = Some(id);
        self
    }

    /// Builder pattern: add course location
    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.trim().to_string());
        self
    }

    /// Builder pattern: add grade token (normalized on the way in)
    pub fn with_grade_token(mut self, token: &str) -> Self {
        self.grade = crate::grade::normalize(token);
        self.grade_token = Some(token.to_string());
        self
    }

    /// Builder pattern: add raw enrollment start date
    pub fn with_enrollment_start(mut self, start: &str) -> Self {
        self.enrollment_start = Some(start.to_string());
        self
    }
}

// ============================================================================
// MATCH RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    /// Strategy 1: fuzzy name among same-birthdate candidates
    FuzzyNameBirthdate,

    /// Strategy 2: external identifier equality
    IdentifierMatch,

    /// Strategy 3: fuzzy name among same-site candidates
    FuzzyNameLocation,

    NoMatch,
}

impl MatchType {
    /// Label written to the `match_type` output column
    pub fn label(&self) -> &'static str {
        match self {
            MatchType::FuzzyNameBirthdate => "Fuzzy Name + Birthdate",
            MatchType::IdentifierMatch => "School ID",
            MatchType::FuzzyNameLocation => "Fuzzy Name + Location",
            MatchType::NoMatch => "No Match",
        }
    }

    pub fn is_match(&self) -> bool {
        !matches!(self, MatchType::NoMatch)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub match_type: MatchType,
    /// Empty unless a caveat applies
    pub notes: String,
    /// `None` exactly when `match_type == NoMatch`
    pub registry: Option<RegistryRecord>,
}

impl MatchResult {
    pub fn matched(match_type: MatchType, notes: String, registry: RegistryRecord) -> Self {
        MatchResult {
            match_type,
            notes,
            registry: Some(registry),
        }
    }

    pub fn no_match() -> Self {
        MatchResult {
            match_type: MatchType::NoMatch,
            notes: String::new(),
            registry: None,
        }
    }

    /// Registry identifier of the matched student, if any
    pub fn student_id(&self) -> Option<i64> {
        self.registry.as_ref().and_then(|r| r.id)
    }
}

/// Enrollee row paired with its match decision (positional association).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRow {
    pub enrollee: EnrolleeRecord,
    pub result: MatchResult,
}

impl MatchedRow {
    pub fn student_id(&self) -> Option<i64> {
        self.result.student_id()
    }

    /// Flatten into the uniform output shape
    pub fn to_export(&self) -> MatchedRowExport {
        let e = &self.enrollee;
        let r = self.result.registry.as_ref();

        MatchedRowExport {
            first_name: e.first_name.clone(),
            last_name: e.last_name.clone(),
            birthdate: e.birthdate.map(|d| d.to_string()),
            school_id: e.school_id,
            location: e.location.clone(),
            grade_token: e.grade_token.clone(),
            enrollment_start: e.enrollment_start.clone(),
            csv_fullname: e.full_name.clone(),
            csv_grade: e.grade,
            match_type: self.result.match_type.label().to_string(),
            notes: self.result.notes.clone(),
            db_id: r.and_then(|r| r.id),
            db_first_name: r.map(|r| r.first_name.clone()),
            db_last_name: r.map(|r| r.last_name.clone()),
            db_fullname: r.map(|r| r.full_name.clone()),
            db_birthdate: r.and_then(|r| r.birthdate).map(|d| d.to_string()),
            db_grade: r.and_then(|r| r.grade),
            db_site: r.map(|r| r.site_name.clone()),
        }
    }
}

// ============================================================================
// EXPORT SHAPE
// ============================================================================

/// Flat row for CSV output. Enrollee and registry columns never collide:
/// registry-side columns carry the `db_` prefix, enrollee-side names carry `csv_`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRowExport {
    #[serde(rename = "Contact: First Name")]
    pub first_name: String,

    #[serde(rename = "Contact: Last Name")]
    pub last_name: String,

    #[serde(rename = "Contact: Birthdate")]
    pub birthdate: Option<String>,

    #[serde(rename = "School ID")]
    pub school_id: Option<i64>,

    #[serde(rename = "Course Option Location")]
    pub location: Option<String>,

    #[serde(rename = "Grade")]
    pub grade_token: Option<String>,

    #[serde(rename = "Enrollment Start Date")]
    pub enrollment_start: Option<String>,

    pub csv_fullname: String,

    #[serde(rename = "csv_GR")]
    pub csv_grade: Option<i32>,

    pub match_type: String,
    pub notes: String,

    #[serde(rename = "ID")]
    pub db_id: Option<i64>,

    #[serde(rename = "FN")]
    pub db_first_name: Option<String>,

    #[serde(rename = "LN")]
    pub db_last_name: Option<String>,

    pub db_fullname: Option<String>,

    #[serde(rename = "BD")]
    pub db_birthdate: Option<String>,

    #[serde(rename = "db_GR")]
    pub db_grade: Option<i32>,

    #[serde(rename = "NM")]
    pub db_site: Option<String>,
}

// ============================================================================
// PROGRAM ENROLLMENT EVENT (write target)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEnrollmentEvent {
    pub student_id: i64,
    /// Per-student sequence, monotonic across all program codes
    pub sequence: i64,
    pub program_code: i64,
    /// `None` when the source date was missing or unparseable
    pub start_date: Option<NaiveDate>,
}
