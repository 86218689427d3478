//! Copy-trading wire messages and acknowledgements

use super::numeric::{parse_decimal, split_list};
use crate::types::{
    AckSignal, BetSide, CopyBetSignal, CopyCashoutSignal, CopyDutchingSignal, DutchingSelection,
};
use regex::Regex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const COPY_BET_MARKER: &str = "COPY BET";
pub const COPY_CASHOUT_MARKER: &str = "COPY CASHOUT";
pub const COPY_DUTCHING_MARKER: &str = "COPY DUTCHING";

static ACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^ACK\s+(\d+)\s*$").expect("ack pattern"));

static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(Evento|Mercato|Selezione|Selezioni|Tipo|Quota|Stake|StakeEUR|ProfitTargetEUR|StakeTotaleEUR):[ \t]*([^\n]*)",
    )
    .expect("label pattern")
});

static PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.+?)\s*@\s*(\S+)\s*$").expect("pair pattern"));

/// Labelled fields, first occurrence wins, blank values dropped
fn labels(text: &str) -> HashMap<&str, &str> {
    let mut fields = HashMap::new();
    for caps in LABEL.captures_iter(text) {
        let (Some(label), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = value.as_str().trim();
        if !value.is_empty() {
            fields.entry(label.as_str()).or_insert(value);
        }
    }
    fields
}

fn has_marker(text: &str, marker: &str) -> bool {
    text.to_uppercase().contains(marker)
}

fn amount(value: Option<&&str>) -> Option<Decimal> {
    let cleaned: String = value?
        .chars()
        .filter(|c| !matches!(c, '%' | '€'))
        .collect();
    parse_decimal(&cleaned)
}

fn side(value: Option<&&str>, allow_mixed: bool) -> BetSide {
    match value.and_then(|v| v.parse::<BetSide>().ok()) {
        Some(BetSide::Mixed) if !allow_mixed => BetSide::Back,
        Some(side) => side,
        None => BetSide::Back,
    }
}

/// `ACK <id>`, ignoring case and surrounding whitespace
pub fn parse_ack(text: &str) -> Option<AckSignal> {
    let caps = ACK.captures(text.trim())?;
    let telegram_msg_id = caps.get(1)?.as_str().parse().ok()?;
    Some(AckSignal { telegram_msg_id })
}

pub fn parse_copy_bet(text: &str) -> Option<CopyBetSignal> {
    if !has_marker(text, COPY_BET_MARKER) {
        return None;
    }
    let fields = labels(text);
    Some(CopyBetSignal {
        event: fields.get("Evento")?.to_string(),
        market_type: fields.get("Mercato")?.to_string(),
        selection: fields.get("Selezione")?.to_string(),
        side: side(fields.get("Tipo"), false),
        odds: amount(fields.get("Quota")),
        stake_percent: amount(fields.get("Stake")),
        stake_amount: amount(fields.get("StakeEUR")),
    })
}

pub fn parse_copy_cashout(text: &str) -> Option<CopyCashoutSignal> {
    if !has_marker(text, COPY_CASHOUT_MARKER) {
        return None;
    }
    let fields = labels(text);
    Some(CopyCashoutSignal {
        event: fields.get("Evento")?.to_string(),
    })
}

/// Emitted whenever the three required labels exist, even if no
/// `label @ price` pair in `Selezioni` is well formed.
pub fn parse_copy_dutching(text: &str) -> Option<CopyDutchingSignal> {
    if !has_marker(text, COPY_DUTCHING_MARKER) {
        return None;
    }
    let fields = labels(text);
    let event = fields.get("Evento")?.to_string();
    let market_type = fields.get("Mercato")?.to_string();
    let selections = split_list(fields.get("Selezioni")?)
        .into_iter()
        .filter_map(parse_pair)
        .collect();

    Some(CopyDutchingSignal {
        event,
        market_type,
        selections,
        side: side(fields.get("Tipo"), true),
        profit_target: amount(fields.get("ProfitTargetEUR")),
        total_stake: amount(fields.get("StakeTotaleEUR")),
    })
}

fn parse_pair(pair: &str) -> Option<DutchingSelection> {
    let caps = PAIR.captures(pair)?;
    Some(DutchingSelection {
        selection: caps.get(1)?.as_str().to_string(),
        odds: parse_decimal(caps.get(2)?.as_str())?,
    })
}
