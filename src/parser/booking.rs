//! Booking requests: "<event> book <selection> @ <target price>"

use super::numeric::parse_decimal;
use super::rules::{MatchContext, BOOKING_DETECTORS};
use crate::types::{BetSide, BookingSignal};
use regex::Regex;
use std::sync::LazyLock;

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:book|booking|prenota|prenotazione|reserve|riserva)\b").expect("booking keyword")
});

static REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(.+?)\s+(?:booking|book|prenotazione|prenota|reserve|riserva)\s+([^@]*)@\s*(\S+)",
    )
    .expect("booking request")
});

static LAY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\blay\b").expect("lay token"));

/// `None` when the keyword, event prefix or target price is missing, or no
/// selection sub-rule matches; the text then falls through to the generic
/// market parser.
pub fn parse_booking(text: &str) -> Option<BookingSignal> {
    if !KEYWORD.is_match(text) {
        return None;
    }
    let caps = REQUEST.captures(text)?;
    let event = caps.get(1)?.as_str().trim().to_string();
    let segment = caps.get(2)?.as_str();
    let target_odds = parse_decimal(caps.get(3)?.as_str())?;

    let ctx = MatchContext::default();
    let found = BOOKING_DETECTORS
        .iter()
        .filter_map(|detector| detector.find(segment, &ctx))
        .find(|found| found.selection.is_some())?;

    let side = if LAY.is_match(text) { BetSide::Lay } else { BetSide::Back };

    Some(BookingSignal {
        event,
        market_type: found.market_type,
        selection: found.selection?,
        side,
        target_odds,
        over_line: found.over_line,
    })
}
