use regex::Regex;

use crate::models::TransactionRecord;

/// Derive a category code from a raw source field.
///
/// With a pattern, the first capture group of the first match is the code;
/// a miss (or a group that did not participate) falls back to the trimmed
/// source. Never fails.
pub fn extract(source: &str, pattern: Option<&Regex>) -> String {
    let trimmed = source.trim();
    pattern
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn extract_codes(records: &[TransactionRecord], pattern: Option<&Regex>) -> Vec<String> {
    records
        .iter()
        .map(|r| extract(&r.category_source, pattern))
        .collect()
}
