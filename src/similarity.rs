// 🔤 Name Similarity Scorer - token-set ratio in [0, 100]
//
// Names are tokenized on whitespace after light cleanup; duplicate tokens and
// token order are ignored. The Indel ratio itself comes from rapidfuzz.

use rapidfuzz::distance::indel;
use std::collections::BTreeSet;

/// Score type: integer percentage, 0..=100
pub type Score = u8;

/// Lowercase, turn anything that is not a letter/digit into a space, trim.
///
/// Non-ASCII letters are kept, so "José Pérez" and "Jose Perez" are
/// different tokens and score below 100. Pipelines that strip non-ASCII
/// before scoring will rank accented names differently.
pub fn preprocess(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    indel::normalized_similarity(a.chars(), b.chars()) * 100.0
}

fn join_sorted(tokens: &BTreeSet<&str>) -> String {
    tokens.iter().copied().collect::<Vec<_>>().join(" ")
}

/// Token-set ratio between two names.
///
/// Compares the shared tokens against each side's shared+remaining tokens
/// and takes the best of the three pairings. Either side empty → 0.
pub fn pairwise(name_a: &str, name_b: &str) -> Score {
    let a = preprocess(name_a);
    let b = preprocess(name_b);

    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0;
    }

    let intersection: BTreeSet<&str> = tokens_a.intersection(&tokens_b).copied().collect();
    let diff_ab: BTreeSet<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let diff_ba: BTreeSet<&str> = tokens_b.difference(&tokens_a).copied().collect();

    // One name's tokens are a subset of the other's
    if !intersection.is_empty() && (diff_ab.is_empty() || diff_ba.is_empty()) {
        return 100;
    }

    let sorted_sect = join_sorted(&intersection);
    let combined_ab = format!("{} {}", sorted_sect, join_sorted(&diff_ab))
        .trim()
        .to_string();
    let combined_ba = format!("{} {}", sorted_sect, join_sorted(&diff_ba))
        .trim()
        .to_string();

    let mut best = ratio(&combined_ab, &combined_ba);
    if !sorted_sect.is_empty() {
        best = best
            .max(ratio(&sorted_sect, &combined_ab))
            .max(ratio(&sorted_sect, &combined_ba));
    }

    best.round().clamp(0.0, 100.0) as Score
}

/// Highest-scoring candidate for `query`.
///
/// Returns the candidate's index and score. On equal scores the candidate
/// listed first wins, so callers control tie-breaking through ordering.
/// An empty candidate list returns `None`.
pub fn best_match<'a, I>(query: &str, candidates: I) -> Option<(usize, Score)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(usize, Score)> = None;

    for (idx, candidate) in candidates.into_iter().enumerate() {
        let score = pairwise(query, candidate);
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((idx, score)),
        }
    }

    best
}
