//! Declarative market detectors
//!
//! Built-in detectors and user-defined pattern rules share one representation:
//! a regex, optional guards standing in for look-around, and a selection
//! template. `Detector::find` is the only matcher.

use super::numeric::{normalize_line, parse_decimal};
use crate::error::Result;
use crate::types::{BetSide, MarketType};
use async_trait::async_trait;
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// User-defined pattern rule, persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    /// Regex, matched case-insensitively
    pub pattern: String,
    pub market_type: String,
    pub bet_side: BetSide,
    pub live_only: bool,
    pub enabled: bool,
}

impl PatternRule {
    pub fn new(name: &str, pattern: &str, market_type: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            description: None,
            pattern: pattern.to_string(),
            market_type: market_type.to_string(),
            bet_side: BetSide::Back,
            live_only: false,
            enabled: true,
        }
    }
}

/// Source of enabled custom rules, in evaluation order
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn enabled_rules(&self) -> Result<Vec<PatternRule>>;
}

/// How a matched detector builds its selection from the captures
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Template {
    Fixed(&'static str),
    /// `"<prefix> <line>"`, also sets the over line
    Line(&'static str),
    Upper,
    ScorePair(&'static str),
    /// Team token + handicap line, e.g. `Home -0.5`
    TeamLine,
    Team,
    /// 1/X/2 to Home/Draw/Away
    Outcome,
    HtFt,
    /// `Over <score total + 0.5>`, only when a score is known
    ImpliedOverLine,
    ScoreList,
    /// Booking handicap, side read from the segment
    SignedHandicap,
    /// Selection rules for user-defined patterns
    Custom,
}

/// Side a detector assigns when it produces a selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SideEffect {
    Keep,
    DefaultBack,
    Force(BetSide),
}

#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub over_line: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorMatch {
    pub market_type: MarketType,
    pub selection: Option<String>,
    pub over_line: Option<Decimal>,
    pub handicap_line: Option<Decimal>,
    pub dutching: Option<Vec<String>>,
    pub side: SideEffect,
    pub live_only: Option<bool>,
}

pub struct Detector {
    pub name: String,
    pub market_type: MarketType,
    pub template: Template,
    pub side: SideEffect,
    pub live_only: Option<bool>,
    regex: Regex,
    not_preceded_by: Option<Regex>,
    not_followed_by: Option<Regex>,
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector")
            .field("name", &self.name)
            .field("market_type", &self.market_type)
            .field("pattern", &self.regex.as_str())
            .finish()
    }
}

/// Reject a bare digit that is really part of a price, score or minute
const NUMBER_NOT_FOLLOWED: &str = r"^(?:[.,]\d|\s*[-–:/'])";
const NUMBER_NOT_PRECEDED: &str = r"(?i)(?:\d[.,]|[-–:/]\s*|@\s*|(?:stake|puntata|€)\s*)$";
const FIRST_HALF: &str = r"(?:\b1t|\bprimo\s*tempo|\b1h|\bfirst\s*half)";

impl Detector {
    fn builtin(name: &str, pattern: &str, market_type: MarketType, template: Template) -> Self {
        Self {
            name: name.to_string(),
            market_type,
            template,
            side: SideEffect::DefaultBack,
            live_only: None,
            regex: Regex::new(&format!("(?im){pattern}")).expect("built-in detector pattern"),
            not_preceded_by: None,
            not_followed_by: None,
        }
    }

    fn keep_side(mut self) -> Self {
        self.side = SideEffect::Keep;
        self
    }

    fn guarded(mut self) -> Self {
        self.not_preceded_by = Some(Regex::new(NUMBER_NOT_PRECEDED).expect("guard pattern"));
        self.not_followed_by = Some(Regex::new(NUMBER_NOT_FOLLOWED).expect("guard pattern"));
        self
    }

    fn not_preceded_by(mut self, pattern: &str) -> Self {
        self.not_preceded_by = Some(Regex::new(pattern).expect("guard pattern"));
        self
    }

    fn not_followed_by(mut self, pattern: &str) -> Self {
        self.not_followed_by = Some(Regex::new(pattern).expect("guard pattern"));
        self
    }

    /// Compile a user rule. Fails on an invalid regex.
    pub fn from_rule(rule: &PatternRule) -> Result<Self> {
        Ok(Self {
            name: rule.name.clone(),
            market_type: MarketType::from_code(&rule.market_type),
            template: Template::Custom,
            side: SideEffect::Force(rule.bet_side),
            live_only: Some(rule.live_only),
            regex: Regex::new(&format!("(?i){}", rule.pattern))?,
            not_preceded_by: None,
            not_followed_by: None,
        })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// First guarded match that renders
    pub fn find(&self, text: &str, ctx: &MatchContext) -> Option<DetectorMatch> {
        for caps in self.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if let Some(guard) = &self.not_preceded_by {
                if guard.is_match(&text[..whole.start()]) {
                    continue;
                }
            }
            if let Some(guard) = &self.not_followed_by {
                if guard.is_match(&text[whole.end()..]) {
                    continue;
                }
            }
            if let Some(found) = self.render(&caps, text, ctx) {
                return Some(found);
            }
        }
        None
    }

    fn render(&self, caps: &Captures<'_>, text: &str, ctx: &MatchContext) -> Option<DetectorMatch> {
        let groups: Vec<&str> = caps
            .iter()
            .skip(1)
            .flatten()
            .map(|m| m.as_str())
            .filter(|s| !s.trim().is_empty())
            .collect();

        let mut found = DetectorMatch {
            market_type: self.market_type.clone(),
            selection: None,
            over_line: None,
            handicap_line: None,
            dutching: None,
            side: self.side,
            live_only: self.live_only,
        };

        match self.template {
            Template::Fixed(value) => found.selection = Some(value.to_string()),
            Template::Line(prefix) => {
                let line = normalize_line(groups.first()?);
                found.over_line = parse_decimal(&line);
                found.selection = Some(format!("{prefix} {line}"));
            }
            Template::Upper => found.selection = Some(groups.first()?.to_uppercase()),
            Template::ScorePair(separator) => {
                let (home, away) = (groups.first()?, groups.get(1)?);
                found.selection = Some(format!("{home}{separator}{away}"));
            }
            Template::TeamLine => {
                let (team, line) = (groups.first()?, groups.get(1)?);
                let line = normalize_line(line);
                found.handicap_line = parse_decimal(&line);
                found.selection = Some(format!("{} {}", team_side(team), line));
            }
            Template::Team => found.selection = Some(team_side(groups.first()?).to_string()),
            Template::Outcome => found.selection = Some(outcome(groups.first()?)?.to_string()),
            Template::HtFt => {
                let (ht, ft) = (groups.first()?, groups.get(1)?);
                found.selection = Some(format!("{}/{}", ht.to_uppercase(), ft.to_uppercase()));
            }
            Template::ImpliedOverLine => {
                found.selection = ctx.over_line.map(|line| format!("Over {line}"));
                found.over_line = ctx.over_line;
            }
            Template::ScoreList => {
                let scores: Vec<String> = groups
                    .first()?
                    .split(',')
                    .filter_map(|score| {
                        let (home, away) = score.split_once('-')?;
                        Some(format!("{} - {}", home.trim(), away.trim()))
                    })
                    .collect();
                if scores.is_empty() {
                    return None;
                }
                found.dutching = Some(scores);
                found.selection = Some("Dutching".to_string());
            }
            Template::SignedHandicap => {
                let line = parse_decimal(groups.first()?)?;
                found.handicap_line = Some(line);
                found.selection = Some(if mentions_home(text) {
                    format!("Home {}", signed(line))
                } else {
                    format!("Away {}", signed(-line))
                });
            }
            Template::Custom => {
                found.selection = Some(self.custom_selection(caps));
            }
        }

        Some(found)
    }

    fn custom_selection(&self, caps: &Captures<'_>) -> String {
        let market = self.market_type.as_str().to_uppercase();
        let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        let first = caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty());
        let btts = market == MarketType::BothTeamsToScore.as_str();

        if self.regex.captures_len() > 1 {
            if market.contains("OVER") {
                first.map_or_else(|| "Yes".to_string(), |g| format!("Over {}", normalize_line(g)))
            } else if market.contains("UNDER") {
                first.map_or_else(|| "Yes".to_string(), |g| format!("Under {}", normalize_line(g)))
            } else if btts {
                let upper = whole.to_uppercase();
                let answer = if upper.contains("NG") || upper.contains("NO") { "No" } else { "Yes" };
                answer.to_string()
            } else {
                first.unwrap_or(whole).trim().to_string()
            }
        } else if btts {
            "Yes".to_string()
        } else {
            whole.trim().to_string()
        }
    }
}

fn team_side(token: &str) -> &'static str {
    match token.trim().to_lowercase().as_str() {
        "1" | "home" | "casa" => "Home",
        _ => "Away",
    }
}

fn outcome(token: &str) -> Option<&'static str> {
    match token.trim().to_uppercase().as_str() {
        "1" => Some("Home"),
        "X" => Some("Draw"),
        "2" => Some("Away"),
        _ => None,
    }
}

fn mentions_home(segment: &str) -> bool {
    segment.split_whitespace().any(|token| {
        let token = token.to_lowercase();
        token == "1" || token == "home" || token == "casa"
    })
}

fn signed(line: Decimal) -> String {
    let line = line.round_dp(1);
    if line.is_sign_negative() && !line.is_zero() {
        format!("{:.1}", line)
    } else {
        format!("+{:.1}", line.abs())
    }
}

/// Market-type detectors for free-text signals, in precedence order
pub static MARKET_DETECTORS: LazyLock<Vec<Detector>> = LazyLock::new(|| {
    vec![
        Detector::builtin(
            "next_goal",
            r"\bnext\s*goa?l\b|\bprossimo\s*goa?l\b",
            MarketType::NextGoal,
            Template::ImpliedOverLine,
        ),
        Detector::builtin(
            "btts_no",
            r"\b(?:ng|no\s*goal|no\s*gol|nogol)\b|\bnessuna\b.*\bsegn\w*",
            MarketType::BothTeamsToScore,
            Template::Fixed("No"),
        ),
        Detector::builtin(
            "btts_yes",
            r"\b(?:gg|btts|goal\s*goal|gol\s*gol)\b|\bentrambe\b.*\bsegn\w*|\bboth\b.*\bscore\b",
            MarketType::BothTeamsToScore,
            Template::Fixed("Yes"),
        ),
        Detector::builtin(
            "first_half_over",
            r"(?:\b1\s*[°º]?\s*(?:tempo|half|t)\b|\bprimo\s*tempo|\bfirst\s*half)\s*(?:over|sopra)\s*(\d+(?:[.,]\d+)?)",
            MarketType::FirstHalfGoals,
            Template::Line("Over"),
        ),
        Detector::builtin(
            "first_half_under",
            r"(?:\b1\s*[°º]?\s*(?:tempo|half|t)\b|\bprimo\s*tempo|\bfirst\s*half)\s*(?:under|sotto)\s*(\d+(?:[.,]\d+)?)",
            MarketType::FirstHalfGoals,
            Template::Line("Under"),
        ),
        Detector::builtin(
            "double_chance",
            r"\b(1X|X2|12)\b",
            MarketType::DoubleChance,
            Template::Upper,
        )
        .guarded(),
        Detector::builtin(
            "match_odds",
            r"\b(?:FT\s*)?([1X2])\b|(?:esito\s*finale|vincente)\s*([1X2])\b",
            MarketType::MatchOdds,
            Template::Upper,
        )
        .guarded(),
        Detector::builtin(
            "correct_score",
            r"(?:\bCS|\bRIS\.?|\brisultato\s*esatto)\s*(\d+)\s*[-–]\s*(\d+)|\b(\d+)\s*[-–]\s*(\d+)\s*(?:finale|FT|CS)\b",
            MarketType::CorrectScore,
            Template::ScorePair("-"),
        ),
        Detector::builtin(
            "asian_handicap",
            r"\b(?:AH|handicap\s*asiatico|asian\s*handicap)\s*(home|away|casa|ospiti|1|2)\s*([+-]?\d+(?:[.,]\d+)?)",
            MarketType::AsianHandicap,
            Template::TeamLine,
        ),
        Detector::builtin(
            "draw_no_bet",
            r"\b(?:DNB|draw\s*no\s*bet|pareggio\s*no\s*scommessa)\s*(1|2|home|away|casa|ospiti)\b",
            MarketType::DrawNoBet,
            Template::Team,
        ),
        Detector::builtin(
            "half_time_full_time",
            r"\b(?:HT/FT|parziale[/\\]finale)\s*([1X2])[/\\]([1X2])\b|([1X2])/([1X2])",
            MarketType::HalfTimeFullTime,
            Template::HtFt,
        )
        .not_preceded_by(r"\d$")
        .not_followed_by(r"^\d"),
        Detector::builtin(
            "dutching",
            r"\bdut(?:h)?ching\s+(\d+\s*-\s*\d+(?:\s*,\s*\d+\s*-\s*\d+)*)",
            MarketType::CorrectScore,
            Template::ScoreList,
        ),
        Detector::builtin(
            "over",
            r"\b(?:over|sopra)\s*(\d+(?:[.,]\d+)?)",
            MarketType::OverUnder,
            Template::Line("Over"),
        )
        .keep_side(),
        Detector::builtin(
            "under",
            r"\b(?:under|sotto)\s*(\d+(?:[.,]\d+)?)",
            MarketType::OverUnder,
            Template::Line("Under"),
        )
        .keep_side(),
    ]
});

/// Selection sub-rules for booking requests, applied to the text between the
/// booking keyword and `@`
pub static BOOKING_DETECTORS: LazyLock<Vec<Detector>> = LazyLock::new(|| {
    vec![
        Detector::builtin(
            "correct_score",
            r"\b(\d+)\s*[-:]\s*(\d+)\b",
            MarketType::CorrectScore,
            Template::ScorePair(" - "),
        )
        .not_preceded_by(&format!(r"(?i){FIRST_HALF}\s*$")),
        Detector::builtin(
            "first_half_over",
            &format!(r"{FIRST_HALF}\s*over\s*(\d+(?:[.,]\d+)?)"),
            MarketType::OverUnderFirstHalf,
            Template::Line("Over"),
        ),
        Detector::builtin(
            "first_half_under",
            &format!(r"{FIRST_HALF}\s*under\s*(\d+(?:[.,]\d+)?)"),
            MarketType::OverUnderFirstHalf,
            Template::Line("Under"),
        ),
        Detector::builtin(
            "over",
            r"\bover\s*(\d+(?:[.,]\d+)?)",
            MarketType::OverUnder,
            Template::Line("Over"),
        ),
        Detector::builtin(
            "under",
            r"\bunder\s*(\d+(?:[.,]\d+)?)",
            MarketType::OverUnder,
            Template::Line("Under"),
        ),
        Detector::builtin(
            "btts_yes",
            r"\b(?:gg|btts)\b|\bgol\s*gol\b",
            MarketType::BothTeamsToScore,
            Template::Fixed("Yes"),
        ),
        Detector::builtin(
            "btts_no",
            r"\b(?:ng|nogol)\b|\bno\s*gol\b",
            MarketType::BothTeamsToScore,
            Template::Fixed("No"),
        ),
        Detector::builtin(
            "double_chance_1x",
            r"\b(?:1X|X1)\b",
            MarketType::DoubleChance,
            Template::Fixed("1X"),
        ),
        Detector::builtin(
            "double_chance_x2",
            r"\b(?:X2|2X)\b",
            MarketType::DoubleChance,
            Template::Fixed("X2"),
        ),
        Detector::builtin("double_chance_12", r"\b12\b", MarketType::DoubleChance, Template::Fixed("12"))
            .guarded(),
        Detector::builtin(
            "draw_no_bet",
            r"\bdnb\s*(1|2|home|away|casa|trasferta|ospiti)\b|\b(1|2|home|away|casa|trasferta|ospiti)\s*dnb\b",
            MarketType::DrawNoBet,
            Template::Team,
        ),
        Detector::builtin(
            "asian_handicap",
            r"\b(?:ah|asian|handicap)\s*([+-]?\s*\d+(?:[.,]\d+)?)",
            MarketType::AsianHandicap,
            Template::SignedHandicap,
        ),
        Detector::builtin(
            "half_time_full_time",
            r"\b([1X2])\s*/\s*([1X2])\b",
            MarketType::HalfTimeFullTime,
            Template::HtFt,
        ),
        Detector::builtin(
            "half_time_score",
            &format!(r"{FIRST_HALF}\s*(\d+)\s*[-:]\s*(\d+)"),
            MarketType::HalfTimeScore,
            Template::ScorePair(" - "),
        ),
        Detector::builtin(
            "half_time_result",
            &format!(r"{FIRST_HALF}\s+([1X2])\b"),
            MarketType::HalfTime,
            Template::Outcome,
        ),
        Detector::builtin("match_odds", r"\b([1X2])\b", MarketType::MatchOdds, Template::Outcome).guarded(),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market_detector(name: &str) -> &'static Detector {
        MARKET_DETECTORS.iter().find(|d| d.name == name).unwrap()
    }

    #[test]
    fn test_builtin_patterns_compile() {
        assert_eq!(MARKET_DETECTORS.len(), 14);
        assert_eq!(BOOKING_DETECTORS.len(), 16);
    }

    #[test]
    fn test_match_odds_guard_skips_prices() {
        let detector = market_detector("match_odds");
        let ctx = MatchContext::default();
        assert!(detector.find("over 2.5 @ 1.90", &ctx).is_none());
        assert!(detector.find("score 2 - 1", &ctx).is_none());
        assert!(detector.find("stake 2", &ctx).is_none());

        let found = detector.find("vincente 2 @ 2.10", &ctx).unwrap();
        assert_eq!(found.selection.as_deref(), Some("2"));
        assert_eq!(found.market_type, MarketType::MatchOdds);
    }

    #[test]
    fn test_asian_handicap_line() {
        let found = market_detector("asian_handicap")
            .find("AH casa -0,5", &MatchContext::default())
            .unwrap();
        assert_eq!(found.selection.as_deref(), Some("Home -0.5"));
        assert_eq!(found.handicap_line, Some(dec!(-0.5)));
    }

    #[test]
    fn test_next_goal_needs_score_for_selection() {
        let detector = market_detector("next_goal");
        let without = detector.find("NEXT GOL", &MatchContext::default()).unwrap();
        assert_eq!(without.market_type, MarketType::NextGoal);
        assert!(without.selection.is_none());

        let ctx = MatchContext { over_line: Some(dec!(1.5)) };
        let with = detector.find("prossimo gol", &ctx).unwrap();
        assert_eq!(with.selection.as_deref(), Some("Over 1.5"));
    }

    #[test]
    fn test_custom_rule_selection() {
        let mut rule = PatternRule::new("corner", r"corner\s*over\s*(\d+[.,]?\d*)", "CORNER_OVER");
        rule.bet_side = BetSide::Lay;
        let detector = Detector::from_rule(&rule).unwrap();

        let found = detector.find("CORNER over 9,5", &MatchContext::default()).unwrap();
        assert_eq!(found.selection.as_deref(), Some("Over 9.5"));
        assert_eq!(found.market_type, MarketType::Other("CORNER_OVER".to_string()));
        assert_eq!(found.side, SideEffect::Force(BetSide::Lay));
        assert_eq!(found.live_only, Some(false));
    }

    #[test]
    fn test_custom_btts_rule_reads_no() {
        let rule = PatternRule::new("ng", r"(no\s*goal)", "BOTH_TEAMS_TO_SCORE");
        let detector = Detector::from_rule(&rule).unwrap();
        let found = detector.find("secondo tempo NO GOAL", &MatchContext::default()).unwrap();
        assert_eq!(found.selection.as_deref(), Some("No"));
    }

    #[test]
    fn test_invalid_custom_rule_is_rejected() {
        let rule = PatternRule::new("broken", r"over (\d+", "OVER_UNDER");
        assert!(Detector::from_rule(&rule).is_err());
    }
}
