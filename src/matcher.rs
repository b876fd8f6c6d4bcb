// 🧩 Match Resolver - link an enrollee to at most one registry record
// Three strategies in strict priority: Name+Birthdate, Identifier, Name+Location

use crate::candidates;
use crate::records::{EnrolleeRecord, MatchResult, MatchType, MatchedRow, RegistryRecord};
use crate::similarity::{self, Score};
use tracing::{debug, info};

/// Default fuzzy-name threshold; a match needs a score strictly above it
pub const DEFAULT_FUZZ_THRESHOLD: Score = 85;

// ============================================================================
// MATCH RESOLVER
// ============================================================================

pub struct MatchResolver {
    /// Fuzzy strategies qualify at `score > fuzz_threshold`;
    /// the identifier strategy flags a name mismatch at `score <= fuzz_threshold`
    pub fuzz_threshold: Score,
}

impl MatchResolver {
    /// Create resolver with the default threshold (85)
    pub fn new() -> Self {
        MatchResolver {
            fuzz_threshold: DEFAULT_FUZZ_THRESHOLD,
        }
    }

    pub fn with_threshold(fuzz_threshold: Score) -> Self {
        MatchResolver { fuzz_threshold }
    }

    /// Resolve one enrollee against the full registry.
    ///
    /// Total: always returns exactly one result. A later strategy only runs
    /// when every earlier one produced no qualifying match.
    pub fn resolve(&self, enrollee: &EnrolleeRecord, registry: &[RegistryRecord]) -> MatchResult {
        if let Some(m) = self.check_birthdate_match(enrollee, registry) {
            return m;
        }

        if let Some(m) = self.check_identifier_match(enrollee, registry) {
            return m;
        }

        if let Some(m) = self.check_location_match(enrollee, registry) {
            return m;
        }

        MatchResult::no_match()
    }

    /// Apply [`resolve`](Self::resolve) to every row, preserving order.
    ///
    /// Output is positionally aligned with `enrollees`.
    pub fn match_all(
        &self,
        enrollees: &[EnrolleeRecord],
        registry: &[RegistryRecord],
    ) -> Vec<MatchedRow> {
        info!(rows = enrollees.len(), "matching enrollment rows");

        let rows: Vec<MatchedRow> = enrollees
            .iter()
            .map(|e| MatchedRow {
                enrollee: e.clone(),
                result: self.resolve(e, registry),
            })
            .collect();

        let matched = rows.iter().filter(|r| r.result.match_type.is_match()).count();
        info!(matched, total = rows.len(), "matching complete");

        rows
    }

    /// Strategy 1: Fuzzy Name + Birthdate
    fn check_birthdate_match(
        &self,
        enrollee: &EnrolleeRecord,
        registry: &[RegistryRecord],
    ) -> Option<MatchResult> {
        let birthdate = enrollee.birthdate?;
        let candidates = candidates::by_birthdate(registry, birthdate);

        self.best_fuzzy_candidate(enrollee, candidates)
            .map(|(record, score)| {
                MatchResult::matched(
                    MatchType::FuzzyNameBirthdate,
                    format!("Name match score: {}.", score),
                    record.clone(),
                )
            })
    }

    /// Strategy 2: Identifier
    /// First registry row with the id wins, even if the names disagree.
    fn check_identifier_match(
        &self,
        enrollee: &EnrolleeRecord,
        registry: &[RegistryRecord],
    ) -> Option<MatchResult> {
        let id = enrollee.school_id?;
        let candidates = candidates::by_identifier(registry, id);
        let record = candidates.first()?;

        if candidates.len() > 1 {
            debug!(id, count = candidates.len(), "registry identifier not unique; using first");
        }

        let name_score = similarity::pairwise(&enrollee.full_name, &record.full_name);
        let notes = if name_score <= self.fuzz_threshold {
            format!(
                "Name mismatch (score: {}). CSV: '{}', DB: '{}'.",
                name_score, enrollee.full_name, record.full_name
            )
        } else {
            String::new()
        };

        Some(MatchResult::matched(
            MatchType::IdentifierMatch,
            notes,
            (*record).clone(),
        ))
    }

    /// Strategy 3: Fuzzy Name + Location
    fn check_location_match(
        &self,
        enrollee: &EnrolleeRecord,
        registry: &[RegistryRecord],
    ) -> Option<MatchResult> {
        let location = enrollee.location.as_deref()?;
        if location == "nan" {
            return None;
        }
        let candidates = candidates::by_site(registry, location);

        self.best_fuzzy_candidate(enrollee, candidates)
            .map(|(record, score)| {
                MatchResult::matched(
                    MatchType::FuzzyNameLocation,
                    format!("Name match score: {}.", score),
                    record.clone(),
                )
            })
    }

    /// Best-scoring candidate, if it clears the threshold.
    ///
    /// Ties go to the lowest registry identifier (missing ids last), then
    /// to registry order.
    fn best_fuzzy_candidate<'a>(
        &self,
        enrollee: &EnrolleeRecord,
        mut candidates: Vec<&'a RegistryRecord>,
    ) -> Option<(&'a RegistryRecord, Score)> {
        if candidates.is_empty() {
            return None;
        }

        // Stable sort: equal keys keep registry order
        candidates.sort_by_key(|r| (r.id.is_none(), r.id));

        let (idx, score) = similarity::best_match(
            &enrollee.full_name,
            candidates.iter().map(|r| r.full_name.as_str()),
        )?;

        if score > self.fuzz_threshold {
            Some((candidates[idx], score))
        } else {
            None
        }
    }
}

impl Default for MatchResolver {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
