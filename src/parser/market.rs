//! Free-text market signals from tipster chats

use super::numeric::parse_decimal;
use super::rules::{Detector, MatchContext, SideEffect, MARKET_DETECTORS};
use crate::types::{BetSide, EventFilter, MarketSignal, MarketType, Score};
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::LazyLock;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("market field pattern")
}

static EVENT: LazyLock<Regex> = LazyLock::new(|| pattern(r"🆚\s*([^\n]+)"));
static LEAGUE: LazyLock<Regex> = LazyLock::new(|| pattern(r"🏆\s*([^\n]+)"));
static SCORE: LazyLock<Regex> = LazyLock::new(|| pattern(r"\b(\d{1,2})\s*[-–]\s*(\d{1,2})\b"));
static MINUTE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(\d{1,3})\s?(?:min|m)\b|\b(\d{1,3})'"));
static BACK: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\b(?:back|punta)\b|P\.Exc\."));
static LAY: LazyLock<Regex> = LazyLock::new(|| pattern(r"(?i)\b(?:lay|banca)\b|B\.Exc\."));
static PRE_MATCH: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?i)\b(?:pre[\s-]?match|ante[\s-]?match|pre[\s-]?partita|non\s+live|not\s+live)\b")
});
static LIVE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:live|in[\s-]?play|in\s+corso|diretta)\b"));
static PRICE_AT: LazyLock<Regex> = LazyLock::new(|| pattern(r"@\s*(\d+(?:[.,]\d+)?)"));
static PRICE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)\b(?:quota|odds)\s*:?\s*(\d+(?:[.,]\d+)?)"));
static STAKE: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?i)(?:\bstake|\bpuntata|€)\s*:?\s*(\d+(?:[.,]\d+)?)"));

fn first_group<'t>(regex: &Regex, text: &'t str) -> Option<&'t str> {
    let caps = regex.captures(text)?;
    caps.iter().skip(1).flatten().next().map(|m| m.as_str().trim())
}

fn parse_score(text: &str) -> Option<Score> {
    let caps = SCORE.captures(text)?;
    Some(Score {
        home: caps.get(1)?.as_str().parse().ok()?,
        away: caps.get(2)?.as_str().parse().ok()?,
    })
}

/// Parse a generic market signal. `custom` detectors are tried before the
/// built-in ones; the first detector that matches decides the market.
pub fn parse_market(text: &str, custom: &[Detector]) -> Option<MarketSignal> {
    let event = first_group(&EVENT, text).map(str::to_string).filter(|e| !e.is_empty());
    let league = first_group(&LEAGUE, text).map(str::to_string);
    let score = parse_score(text);
    let implied_line = score.map(|s| Decimal::from(s.total()) + dec!(0.5));
    let minute = first_group(&MINUTE, text).and_then(|m| m.parse().ok());

    let mut side = if BACK.is_match(text) {
        Some(BetSide::Back)
    } else if LAY.is_match(text) {
        Some(BetSide::Lay)
    } else {
        None
    };

    let event_filter = if PRE_MATCH.is_match(text) {
        Some(EventFilter::PreMatch)
    } else if LIVE.is_match(text) {
        Some(EventFilter::Live)
    } else {
        None
    };
    let mut live_only = event_filter == Some(EventFilter::Live);

    let ctx = MatchContext { over_line: implied_line };
    let mut market_type = None;
    let mut selection = None;
    let mut over_line = implied_line;
    let mut handicap_line = None;
    let mut dutching_selections = None;

    let found = custom
        .iter()
        .chain(MARKET_DETECTORS.iter())
        .find_map(|detector| detector.find(text, &ctx));
    if let Some(found) = found {
        market_type = Some(found.market_type);
        if found.selection.is_some() {
            match found.side {
                SideEffect::Keep => {}
                SideEffect::DefaultBack => {
                    side.get_or_insert(BetSide::Back);
                }
                SideEffect::Force(forced) => side = Some(forced),
            }
            if let Some(rule_live_only) = found.live_only {
                live_only = rule_live_only;
            }
        }
        selection = found.selection;
        over_line = found.over_line.or(over_line);
        handicap_line = found.handicap_line;
        dutching_selections = found.dutching;
    }

    let odds = first_group(&PRICE_AT, text)
        .or_else(|| first_group(&PRICE_LABEL, text))
        .and_then(parse_decimal);
    let stake = first_group(&STAKE, text).and_then(parse_decimal);

    let has_market = market_type.is_some() && selection.is_some() && event.is_some();
    if !has_market {
        if let (Some(line), Some(_)) = (implied_line, &event) {
            market_type.get_or_insert(MarketType::OverUnder);
            selection.get_or_insert_with(|| format!("Over {line}"));
        } else if !(side.is_some() && selection.is_some()) {
            return None;
        }
    }

    Some(MarketSignal {
        event,
        league,
        side: side.unwrap_or(BetSide::Back),
        selection: selection?,
        market_type: market_type?,
        odds,
        stake,
        score,
        minute,
        live_only,
        event_filter,
        over_line,
        handicap_line,
        dutching_selections,
    })
}
