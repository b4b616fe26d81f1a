//! University information lookup.

/// Answer when nothing in the table matches
pub const NOT_FOUND: &str = "Specific data not found in university database.";

/// Fixed facts, in match priority order
pub const INFO_TABLE: [(&str, &str); 3] = [
    ("exam_dates", "Finals are Dec 15th to Dec 20th."),
    ("library_hours", "Open 8 AM to 10 PM daily."),
    ("registrar_email", "registrar@university.edu"),
];

/// Whether `query` (already lowercased) refers to `key`.
///
/// Accepts the key itself, the key with spaces for underscores, or its first word.
fn key_matches(key: &str, query: &str) -> bool {
    let first_word = key.split('_').next().unwrap_or(key);
    query.contains(key) || query.contains(&key.replace('_', " ")) || query.contains(first_word)
}

/// Look up a fact by free-text query
pub fn lookup_info(query: &str) -> &'static str {
    let query = query.to_lowercase();
    INFO_TABLE
        .iter()
        .find(|(key, _)| key_matches(key, &query))
        .map(|(_, answer)| *answer)
        .unwrap_or(NOT_FOUND)
}
