//! Unit tests for the signal parser

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::types::{BetSide, EventFilter, MarketType, SignalKind};
    use rust_decimal_macros::dec;

    fn market(text: &str) -> crate::types::MarketSignal {
        match parse_signal(text).map(|s| s.kind) {
            Some(SignalKind::Market(m)) => m,
            other => panic!("expected market signal for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_has_highest_precedence() {
        let signal = parse_signal("  ack 42  ").unwrap();
        assert_eq!(signal.kind, SignalKind::Ack(crate::types::AckSignal { telegram_msg_id: 42 }));
        assert!(parse_signal("ACK forty-two").is_none());
    }

    #[test]
    fn test_copy_bet_defaults_to_back() {
        let text = "COPY BET\nEvento: Roma v Lazio\nMercato: Match Odds\nSelezione: Home\nQuota: 2,10";
        match parse_signal(text).unwrap().kind {
            SignalKind::CopyBet(bet) => {
                assert_eq!(bet.event, "Roma v Lazio");
                assert_eq!(bet.market_type, "Match Odds");
                assert_eq!(bet.selection, "Home");
                assert_eq!(bet.odds, Some(dec!(2.10)));
                assert_eq!(bet.side, BetSide::Back);
                assert_eq!(bet.stake_percent, None);
            }
            other => panic!("expected copy bet, got {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_copy_bet_falls_through() {
        // Missing Selezione: not a copy bet, and nothing else matches either
        let text = "COPY BET\nEvento: Roma v Lazio\nMercato: Match Odds";
        assert!(parse_signal(text).is_none());
    }

    #[test]
    fn test_copy_cashout_and_dutching() {
        let cashout = parse_signal("copy cashout\nEvento: Inter v Milan").unwrap();
        assert_eq!(cashout.kind.name(), "COPY_CASHOUT");

        let text = "COPY DUTCHING\nEvento: Inter v Milan\nMercato: Correct Score\nSelezioni: 1-0 @ 7.5, 2-1 @ 9";
        match parse_signal(text).unwrap().kind {
            SignalKind::CopyDutching(d) => assert_eq!(d.selections.len(), 2),
            other => panic!("expected dutching, got {other:?}"),
        }
    }

    #[test]
    fn test_over_with_price() {
        let m = market("🆚 Roma v Lazio\nover 2.5 @ 1.90");
        assert_eq!(m.event.as_deref(), Some("Roma v Lazio"));
        assert_eq!(m.market_type, MarketType::OverUnder);
        assert_eq!(m.selection, "Over 2.5");
        assert_eq!(m.odds, Some(dec!(1.90)));
        assert_eq!(m.side, BetSide::Back);
        assert_eq!(m.over_line, Some(dec!(2.5)));
    }

    #[test]
    fn test_score_implies_over_line() {
        let m = market("🆚 Napoli v Bari\n🏆 Serie A\n1-0 62'");
        assert_eq!(m.market_type, MarketType::OverUnder);
        assert_eq!(m.selection, "Over 1.5");
        assert_eq!(m.score.map(|s| s.total()), Some(1));
        assert_eq!(m.minute, Some(62));
        assert_eq!(m.league.as_deref(), Some("Serie A"));
    }

    #[test]
    fn test_next_goal_uses_score() {
        let m = market("🆚 Napoli v Bari\n2-1 75m LIVE\nNEXT GOL @ 1,80");
        assert_eq!(m.market_type, MarketType::NextGoal);
        assert_eq!(m.selection, "Over 3.5");
        assert_eq!(m.odds, Some(dec!(1.80)));
        assert!(m.live_only);
        assert_eq!(m.event_filter, Some(EventFilter::Live));
    }

    #[test]
    fn test_pre_match_is_not_live() {
        let m = market("🆚 Juve v Torino\nNON LIVE\nGG @ 1.70");
        assert_eq!(m.event_filter, Some(EventFilter::PreMatch));
        assert!(!m.live_only);
        assert_eq!(m.market_type, MarketType::BothTeamsToScore);
        assert_eq!(m.selection, "Yes");
    }

    #[test]
    fn test_lay_match_odds() {
        let m = market("🆚 Juve v Torino\nBANCA 1 @ 1,55 stake 20");
        assert_eq!(m.market_type, MarketType::MatchOdds);
        assert_eq!(m.selection, "1");
        assert_eq!(m.side, BetSide::Lay);
        assert_eq!(m.odds, Some(dec!(1.55)));
        assert_eq!(m.stake, Some(dec!(20)));
    }

    #[test]
    fn test_double_chance_and_first_half_goals() {
        assert_eq!(market("🆚 A v B\nX2 @ 1.3").selection, "X2");

        let fh = market("🆚 A v B\n1T over 0,5 @ 1.4");
        assert_eq!(fh.market_type, MarketType::FirstHalfGoals);
        assert_eq!(fh.selection, "Over 0.5");
    }

    #[test]
    fn test_dutching_scores() {
        let m = market("🆚 A v B\ndutching 1-0, 2-0,2-1");
        assert_eq!(m.market_type, MarketType::CorrectScore);
        assert_eq!(m.selection, "Dutching");
        assert_eq!(
            m.dutching_selections,
            Some(vec!["1 - 0".to_string(), "2 - 0".to_string(), "2 - 1".to_string()])
        );
    }

    #[test]
    fn test_booking_before_market() {
        let signal = parse_signal("Roma Lazio book over 2.5 @ 2.2").unwrap();
        assert_eq!(signal.kind.name(), "BOOKING");
    }

    #[test]
    fn test_unstructured_text_is_ignored() {
        assert!(parse_signal("buongiorno a tutti").is_none());
        assert!(parse_signal("").is_none());
        // Market without an event and no side
        assert!(parse_signal("over 2.5").is_none());
    }

    #[test]
    fn test_side_and_selection_without_event() {
        let m = market("back over 1.5");
        assert_eq!(m.side, BetSide::Back);
        assert_eq!(m.selection, "Over 1.5");
        assert!(m.event.is_none());
    }

    #[test]
    fn test_custom_rules_take_precedence() {
        let mut rule = PatternRule::new("corners", r"corner\s*over\s*(\d+(?:[.,]\d+)?)", "CORNERS_OVER");
        rule.live_only = true;
        let parser = SignalParser::with_rules(&[rule]);
        assert_eq!(parser.rule_count(), 1);

        let signal = parser.parse("🆚 A v B\ncorner over 9,5 @ 1.8").unwrap();
        match signal.kind {
            SignalKind::Market(m) => {
                assert_eq!(m.market_type, MarketType::Other("CORNERS_OVER".to_string()));
                assert_eq!(m.selection, "Over 9.5");
                assert!(m.live_only);
            }
            other => panic!("expected market signal, got {other:?}"),
        }

        // The free function ignores custom rules and sees a plain over
        let plain = market("🆚 A v B\ncorner over 9,5 @ 1.8");
        assert_eq!(plain.market_type, MarketType::OverUnder);
    }

    #[test]
    fn test_custom_rule_sets_live_only() {
        let rule = PatternRule::new("corners", r"corner\s*over\s*(\d+)", "CORNERS_OVER");
        let parser = SignalParser::with_rules(&[rule]);

        let signal = parser.parse("🆚 A v B\nLIVE corner over 9 @ 1.8").unwrap();
        match signal.kind {
            SignalKind::Market(m) => {
                assert_eq!(m.event_filter, Some(EventFilter::Live));
                assert!(!m.live_only);
            }
            other => panic!("expected market signal, got {other:?}"),
        }

        // Built-in markets keep the LIVE marker
        assert!(market("🆚 A v B\nLIVE over 2.5 @ 1.8").live_only);
    }

    #[test]
    fn test_reload_skips_invalid_and_disabled_rules() {
        let mut disabled = PatternRule::new("off", r"foo", "MATCH_ODDS");
        disabled.enabled = false;
        let rules = vec![
            PatternRule::new("broken", r"(unclosed", "MATCH_ODDS"),
            disabled,
            PatternRule::new("ok", r"bar", "MATCH_ODDS"),
        ];
        let parser = SignalParser::new();
        assert_eq!(parser.reload(&rules), 1);
        assert_eq!(parser.reload(&[]), 0);
    }

    #[tokio::test]
    async fn test_reload_from_store() {
        let mut store = rules::MockRuleStore::new();
        store
            .expect_enabled_rules()
            .times(1)
            .returning(|| Ok(vec![PatternRule::new("ht", r"\bprimo\s+tempo\s+x\b", "HALF_TIME")]));

        let parser = SignalParser::new();
        let count = parser.reload_from(&store).await.unwrap();
        assert_eq!(count, 1);

        let signal = parser.parse("🆚 A v B\nprimo tempo X @ 2.1").unwrap();
        assert!(matches!(
            signal.kind,
            SignalKind::Market(ref m) if m.market_type == MarketType::HalfTime && m.selection == "primo tempo X"
        ));
    }

    #[tokio::test]
    async fn test_reload_from_failing_store_keeps_rules() {
        let mut store = rules::MockRuleStore::new();
        store
            .expect_enabled_rules()
            .returning(|| Err(crate::error::BotError::Runtime("db closed".into())));

        let parser = SignalParser::with_rules(&[PatternRule::new("x", "x", "MATCH_ODDS")]);
        assert!(parser.reload_from(&store).await.is_err());
        assert_eq!(parser.rule_count(), 1);
    }
}
