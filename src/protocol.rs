//! Plain-text wire format for copy-trading broadcasts
//!
//! Line oriented, Italian labels. Numbers are written with a dot; the parser
//! accepts either separator.

use crate::parser::{COPY_BET_MARKER, COPY_CASHOUT_MARKER, COPY_DUTCHING_MARKER};
use crate::types::{CopyBetSignal, CopyCashoutSignal, CopyDutchingSignal};
use std::fmt::Write;

/// Render a copy-trading instruction as a broadcast message
pub trait ToWire {
    fn to_wire(&self) -> String;
}

impl ToWire for CopyBetSignal {
    fn to_wire(&self) -> String {
        let mut out = format!(
            "{COPY_BET_MARKER}\nEvento: {}\nMercato: {}\nSelezione: {}\nTipo: {}",
            self.event, self.market_type, self.selection, self.side
        );
        if let Some(odds) = self.odds {
            let _ = write!(out, "\nQuota: {odds}");
        }
        if let Some(percent) = self.stake_percent {
            let _ = write!(out, "\nStake: {percent}%");
        }
        if let Some(amount) = self.stake_amount {
            let _ = write!(out, "\nStakeEUR: {amount}");
        }
        out
    }
}

impl ToWire for CopyCashoutSignal {
    fn to_wire(&self) -> String {
        format!("{COPY_CASHOUT_MARKER}\nEvento: {}", self.event)
    }
}

impl ToWire for CopyDutchingSignal {
    fn to_wire(&self) -> String {
        let selections = self
            .selections
            .iter()
            .map(|s| format!("{} @ {}", s.selection, s.odds))
            .collect::<Vec<_>>()
            .join(", ");
        let mut out = format!(
            "{COPY_DUTCHING_MARKER}\nEvento: {}\nMercato: {}\nSelezioni: {}\nTipo: {}",
            self.event, self.market_type, selections, self.side
        );
        if let Some(target) = self.profit_target {
            let _ = write!(out, "\nProfitTargetEUR: {target}");
        }
        if let Some(total) = self.total_stake {
            let _ = write!(out, "\nStakeTotaleEUR: {total}");
        }
        out
    }
}

/// Acknowledgement of a received broadcast, by transport message id
pub fn ack_message(telegram_msg_id: i64) -> String {
    format!("ACK {telegram_msg_id}")
}
