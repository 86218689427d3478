//! Core signal types shared by the parser, the listener and the host

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Back or lay side of an exchange bet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BetSide {
    Back,
    Lay,
    /// Dutching books that mix back and lay legs
    Mixed,
}

impl BetSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetSide::Back => "BACK",
            BetSide::Lay => "LAY",
            BetSide::Mixed => "MIXED",
        }
    }
}

impl fmt::Display for BetSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BetSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BACK" => Ok(BetSide::Back),
            "LAY" => Ok(BetSide::Lay),
            "MIXED" => Ok(BetSide::Mixed),
            _ => Err(()),
        }
    }
}

/// Exchange market type.
///
/// Built-in detectors produce the named variants; custom rules may name any
/// market, which ends up in `Other` verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarketType {
    MatchOdds,
    OverUnder,
    OverUnderFirstHalf,
    FirstHalfGoals,
    BothTeamsToScore,
    DoubleChance,
    DrawNoBet,
    AsianHandicap,
    HalfTimeFullTime,
    HalfTime,
    HalfTimeScore,
    CorrectScore,
    NextGoal,
    Other(String),
}

impl MarketType {
    pub fn as_str(&self) -> &str {
        match self {
            MarketType::MatchOdds => "MATCH_ODDS",
            MarketType::OverUnder => "OVER_UNDER",
            MarketType::OverUnderFirstHalf => "OVER_UNDER_FH",
            MarketType::FirstHalfGoals => "FIRST_HALF_GOALS",
            MarketType::BothTeamsToScore => "BOTH_TEAMS_TO_SCORE",
            MarketType::DoubleChance => "DOUBLE_CHANCE",
            MarketType::DrawNoBet => "DRAW_NO_BET",
            MarketType::AsianHandicap => "ASIAN_HANDICAP",
            MarketType::HalfTimeFullTime => "HALF_TIME_FULL_TIME",
            MarketType::HalfTime => "HALF_TIME",
            MarketType::HalfTimeScore => "HALF_TIME_SCORE",
            MarketType::CorrectScore => "CORRECT_SCORE",
            MarketType::NextGoal => "NEXT_GOAL",
            MarketType::Other(name) => name,
        }
    }

    /// Parse a market code, falling back to `Other` for unknown names
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_uppercase().as_str() {
            "MATCH_ODDS" => MarketType::MatchOdds,
            "OVER_UNDER" => MarketType::OverUnder,
            "OVER_UNDER_FH" => MarketType::OverUnderFirstHalf,
            "FIRST_HALF_GOALS" => MarketType::FirstHalfGoals,
            "BOTH_TEAMS_TO_SCORE" => MarketType::BothTeamsToScore,
            "DOUBLE_CHANCE" => MarketType::DoubleChance,
            "DRAW_NO_BET" => MarketType::DrawNoBet,
            "ASIAN_HANDICAP" => MarketType::AsianHandicap,
            "HALF_TIME_FULL_TIME" => MarketType::HalfTimeFullTime,
            "HALF_TIME" => MarketType::HalfTime,
            "HALF_TIME_SCORE" => MarketType::HalfTimeScore,
            "CORRECT_SCORE" => MarketType::CorrectScore,
            "NEXT_GOAL" => MarketType::NextGoal,
            _ => MarketType::Other(code.trim().to_string()),
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MarketType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MarketType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(MarketType::from_code(&code))
    }
}

/// Whether a signal targets in-play or pre-match events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventFilter {
    Live,
    PreMatch,
}

/// Current score quoted in a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

impl Score {
    pub fn total(&self) -> u32 {
        self.home + self.away
    }
}

/// Free-text market signal from a tipster chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub event: Option<String>,
    pub league: Option<String>,
    pub side: BetSide,
    pub selection: String,
    pub market_type: MarketType,
    pub odds: Option<Decimal>,
    pub stake: Option<Decimal>,
    pub score: Option<Score>,
    pub minute: Option<u32>,
    pub live_only: bool,
    pub event_filter: Option<EventFilter>,
    /// Goal line implied by the score or named by a goals market
    pub over_line: Option<Decimal>,
    pub handicap_line: Option<Decimal>,
    /// Correct-score lines for a dutching book, e.g. `["2 - 1", "3 - 1"]`
    pub dutching_selections: Option<Vec<String>>,
}

/// Request to place a bet once the price reaches `target_odds`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSignal {
    pub event: String,
    pub market_type: MarketType,
    pub selection: String,
    pub side: BetSide,
    pub target_odds: Decimal,
    pub over_line: Option<Decimal>,
}

/// Bet mirrored from a master instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyBetSignal {
    pub event: String,
    /// Exchange market name as written by the master, e.g. "Match Odds"
    pub market_type: String,
    pub selection: String,
    pub side: BetSide,
    pub odds: Option<Decimal>,
    pub stake_percent: Option<Decimal>,
    pub stake_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyCashoutSignal {
    pub event: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutchingSelection {
    pub selection: String,
    pub odds: Decimal,
}

/// Multi-selection dutching book mirrored from a master instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyDutchingSignal {
    pub event: String,
    pub market_type: String,
    pub selections: Vec<DutchingSelection>,
    pub side: BetSide,
    pub profit_target: Option<Decimal>,
    pub total_stake: Option<Decimal>,
}

/// Follower acknowledgement of a broadcast message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckSignal {
    pub telegram_msg_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalKind {
    Market(MarketSignal),
    Booking(BookingSignal),
    CopyBet(CopyBetSignal),
    CopyCashout(CopyCashoutSignal),
    CopyDutching(CopyDutchingSignal),
    Ack(AckSignal),
}

impl SignalKind {
    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::Market(_) => "MARKET",
            SignalKind::Booking(_) => "BOOKING",
            SignalKind::CopyBet(_) => "COPY_BET",
            SignalKind::CopyCashout(_) => "COPY_CASHOUT",
            SignalKind::CopyDutching(_) => "COPY_DUTCHING",
            SignalKind::Ack(_) => "ACK",
        }
    }

    /// Copy-trading instructions that a follower acknowledges
    pub fn is_copy_instruction(&self) -> bool {
        matches!(
            self,
            SignalKind::CopyBet(_) | SignalKind::CopyCashout(_) | SignalKind::CopyDutching(_)
        )
    }
}

/// A parsed signal together with where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Originating chat, unset for text parsed outside a listener
    pub chat_id: Option<i64>,
    pub sender_id: Option<i64>,
    pub raw_text: String,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

impl Signal {
    pub fn new(kind: SignalKind, raw_text: &str) -> Self {
        Self {
            chat_id: None,
            sender_id: None,
            raw_text: raw_text.to_string(),
            received_at: Utc::now(),
            kind,
        }
    }

    pub fn with_origin(mut self, chat_id: i64, sender_id: Option<i64>) -> Self {
        self.chat_id = Some(chat_id);
        self.sender_id = sender_id;
        self
    }
}
