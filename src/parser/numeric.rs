//! Decimal-comma tolerant number handling

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a price/stake/line written with either `,` or `.` as decimal separator.
///
/// Returns `None` for anything that is not a plain decimal number.
pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let normalized: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(&normalized).ok()
}

/// Canonical text form of a goal/handicap line ("2,5" -> "2.5")
pub fn normalize_line(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect()
}

/// Split a comma separated list without breaking decimal commas like `9,50`
pub fn split_list(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b != b',' {
            continue;
        }
        let digit_before = i > 0 && bytes[i - 1].is_ascii_digit();
        let digit_after = i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit();
        if digit_before && digit_after {
            continue;
        }
        parts.push(&text[start..i]);
        start = i + 1;
    }
    parts.push(&text[start..]);
    parts
}
