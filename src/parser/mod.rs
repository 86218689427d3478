//! Signal parser
//!
//! Turns raw chat text into a typed [`Signal`]. Branches are tried in a fixed
//! order and the first one that applies wins: acknowledgements, the three
//! copy-trading messages, booking requests, then generic market signals.
//! Parsing never fails loudly; text that fits no branch yields `None`.

mod booking;
mod copy;
mod market;
pub mod numeric;
pub mod rules;

#[cfg(test)]
mod tests;

pub use booking::parse_booking;
pub use copy::{
    parse_ack, parse_copy_bet, parse_copy_cashout, parse_copy_dutching, COPY_BET_MARKER,
    COPY_CASHOUT_MARKER, COPY_DUTCHING_MARKER,
};
pub use market::parse_market;
pub use numeric::parse_decimal;
pub use rules::{Detector, PatternRule, RuleStore};

use crate::error::Result;
use crate::types::{Signal, SignalKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Parse with the built-in vocabulary only
pub fn parse_signal(text: &str) -> Option<Signal> {
    classify(text, &[]).map(|kind| Signal::new(kind, text))
}

fn classify(text: &str, custom: &[Detector]) -> Option<SignalKind> {
    if let Some(ack) = parse_ack(text) {
        return Some(SignalKind::Ack(ack));
    }
    if let Some(bet) = parse_copy_bet(text) {
        return Some(SignalKind::CopyBet(bet));
    }
    if let Some(cashout) = parse_copy_cashout(text) {
        return Some(SignalKind::CopyCashout(cashout));
    }
    if let Some(dutching) = parse_copy_dutching(text) {
        return Some(SignalKind::CopyDutching(dutching));
    }
    if let Some(booking) = parse_booking(text) {
        return Some(SignalKind::Booking(booking));
    }
    parse_market(text, custom).map(SignalKind::Market)
}

/// Parser holding the hot-reloadable custom rules.
///
/// Reloads swap the whole rule list, so a parse in flight keeps using the
/// snapshot it started with.
#[derive(Debug, Default)]
pub struct SignalParser {
    custom: RwLock<Arc<Vec<Detector>>>,
}

impl SignalParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: &[PatternRule]) -> Self {
        let parser = Self::new();
        parser.reload(rules);
        parser
    }

    /// Replace the custom rules. Disabled rules and rules whose pattern does
    /// not compile are skipped. Returns the number of active rules.
    pub fn reload(&self, rules: &[PatternRule]) -> usize {
        let detectors: Vec<Detector> = rules
            .iter()
            .filter(|rule| rule.enabled)
            .filter_map(|rule| match Detector::from_rule(rule) {
                Ok(detector) => Some(detector),
                Err(e) => {
                    warn!("Skipping pattern rule '{}': {}", rule.name, e);
                    None
                }
            })
            .collect();
        let count = detectors.len();
        *self.custom.write() = Arc::new(detectors);
        debug!("Loaded {} custom pattern rules", count);
        count
    }

    pub async fn reload_from(&self, store: &dyn RuleStore) -> Result<usize> {
        let rules = store.enabled_rules().await?;
        let count = self.reload(&rules);
        info!("Custom pattern rules reloaded: {}", count);
        Ok(count)
    }

    pub fn rule_count(&self) -> usize {
        self.custom.read().len()
    }

    pub fn parse(&self, text: &str) -> Option<Signal> {
        let custom = Arc::clone(&self.custom.read());
        classify(text, &custom).map(|kind| Signal::new(kind, text))
    }
}
