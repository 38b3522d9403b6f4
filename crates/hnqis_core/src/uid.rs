use std::sync::OnceLock;

use regex::Regex;

/// Check if a string matches the DHIS2 UID pattern: 11 characters, a leading
/// letter followed by letters or digits.
pub fn is_valid_uid(value: &str) -> bool {
    static UID_PATTERN: OnceLock<Regex> = OnceLock::new();
    UID_PATTERN
        .get_or_init(|| Regex::new("^[A-Za-z][A-Za-z0-9]{10}$").expect("static UID pattern"))
        .is_match(value)
}
