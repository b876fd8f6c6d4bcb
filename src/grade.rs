// 🎓 Grade Normalizer - free-text grade label → signed integer
// Pre-kindergarten is -1, kindergarten is 0. Annotation only; never used to match.

/// Map a grade label to the integer scale.
///
/// Unknown labels return `None` rather than failing.
pub fn normalize(token: &str) -> Option<i32> {
    match token.trim() {
        "0" | "0K" => Some(0),
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        "4" => Some(4),
        "5" => Some(5),
        "6" => Some(6),
        "7" => Some(7),
        "8" => Some(8),
        "9" => Some(9),
        "10" => Some(10),
        "00JK" | "-1JK" | "-1" => Some(-1),
        _ => None,
    }
}

/// Same as [`normalize`] but for an optional (possibly absent) column value.
pub fn normalize_opt(token: Option<&str>) -> Option<i32> {
    token.and_then(normalize)
}
