//! Property tests for scanner and lifecycle invariants.
//!
//! Uses proptest to verify:
//! 1. Pivot alternation - detected pivots never repeat a kind
//! 2. Fibonacci geometry - stop, entry and targets are ordered for the direction
//! 3. Scoring - adding a feature or a confluent candidate never lowers the
//!    probability, and ranking respects the cap
//! 4. Staging exclusivity - a symbol is never pending and open at once
//! 5. Governor - once paused, nothing but reset clears the pause

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use fibscan::config::{ScoringConfig, StagingConfig};
use fibscan::risk::DrawdownGovernor;
use fibscan::staging::{ClosureKind, StagedSignalStateMachine};
use fibscan::strategy::fibonacci;
use fibscan::strategy::{
    detect_pivots, ElliottContext, FibLevel, FibonacciCandidate, Pivot, PivotKind, ScoreFeatures,
    ScoredCandidate, ScoringEngine,
};
use fibscan::types::{Candle, Direction, Side, Timeframe};

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_candles() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((1.0..1000.0_f64, 0.0..50.0_f64), 5..120).prop_map(|bars| {
        bars.into_iter()
            .enumerate()
            .map(|(i, (low, span))| Candle {
                open_time: i as i64 * 60_000,
                open: low,
                high: low + span,
                low,
                close: low + span / 2.0,
                volume: 1.0 + i as f64,
            })
            .collect()
    })
}

fn arb_features() -> impl Strategy<Value = ScoreFeatures> {
    (
        prop_oneof![Just(FibLevel::R382), Just(FibLevel::R500), Just(FibLevel::R618)],
        1.0..1000.0_f64,
        prop::option::of(1.0..1000.0_f64),
        prop_oneof![Just(Timeframe::Min15), Just(Timeframe::Hour1), Just(Timeframe::Hour4)],
        any::<bool>(),
    )
        .prop_map(
            |(level, pivot_volume, average_volume, timeframe, elliott_confirmed)| ScoreFeatures {
                level,
                pivot_volume,
                average_volume,
                timeframe,
                elliott_confirmed,
            },
        )
}

/// Each way of switching on one more qualifying feature
fn with_one_more_feature(base: &ScoreFeatures, spike_multiplier: f64) -> Vec<ScoreFeatures> {
    let mut out = Vec::new();
    let deeper = match base.level {
        FibLevel::R382 => Some(FibLevel::R500),
        FibLevel::R500 => Some(FibLevel::R618),
        FibLevel::R618 => None,
    };
    if let Some(level) = deeper {
        out.push(ScoreFeatures { level, ..*base });
    }
    let average = base.average_volume.unwrap_or(base.pivot_volume);
    out.push(ScoreFeatures {
        pivot_volume: average * spike_multiplier * 2.0,
        average_volume: Some(average),
        ..*base
    });
    out.push(ScoreFeatures {
        timeframe: Timeframe::Hour4,
        ..*base
    });
    out.push(ScoreFeatures {
        elliott_confirmed: true,
        ..*base
    });
    out
}

fn scored(template: &FibonacciCandidate, symbol: &str, score: u8, seq: usize) -> ScoredCandidate {
    ScoredCandidate {
        symbol: symbol.to_string(),
        timeframe: Timeframe::Hour1,
        candidate: template.clone(),
        score,
        probability: ScoringEngine::probability(score),
        sequence: seq,
    }
}

#[derive(Debug, Clone)]
enum Op {
    Track(usize),
    Fill(usize),
    Close(usize, bool),
    Discard(usize),
    Advance(i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize).prop_map(Op::Track),
        (0..3usize).prop_map(Op::Fill),
        (0..3usize, any::<bool>()).prop_map(|(i, tp)| Op::Close(i, tp)),
        (0..3usize).prop_map(Op::Discard),
        (1..180i64).prop_map(Op::Advance),
    ]
}

fn pivot(kind: PivotKind, price: f64, index: usize) -> Pivot {
    Pivot {
        kind,
        price,
        volume: 1.0,
        index,
    }
}

fn last_close(price: f64) -> Vec<Candle> {
    vec![Candle {
        open_time: 0,
        open: price,
        high: price,
        low: price,
        close: price,
        volume: 1.0,
    }]
}

// ── 1. Pivot alternation ─────────────────────────────────────────────

proptest! {
    #[test]
    fn pivots_alternate_and_advance(candles in arb_candles(), radius in 1..6usize) {
        let pivots = detect_pivots(&candles, radius);
        for pair in pivots.windows(2) {
            prop_assert_ne!(pair[0].kind, pair[1].kind);
            prop_assert!(pair[0].index < pair[1].index);
        }
        for p in &pivots {
            prop_assert!(p.index >= radius && p.index + radius < candles.len());
        }
    }
}

// ── 2. Fibonacci geometry ────────────────────────────────────────────

proptest! {
    #[test]
    fn long_geometry_is_ordered(
        low in 1.0..1000.0_f64,
        range in 1.0..500.0_f64,
        frac in 0.0..1.0_f64,
    ) {
        let high = low + range;
        let price = high - range * frac;
        let pivots = vec![pivot(PivotKind::Low, low, 0), pivot(PivotKind::High, high, 10)];

        if let Some(c) = fibonacci::analyze(&last_close(price), &pivots, 0.01, 0.015, &ElliottContext::none()) {
            prop_assert_eq!(c.direction, Direction::Long);
            prop_assert!(c.stop_loss < low);
            prop_assert!(low < c.target_price && c.target_price < high);
            prop_assert_eq!(c.take_profit_1, high);
            prop_assert!(c.take_profit_2 > c.take_profit_1);
            prop_assert!(c.distance_pct <= 0.015);
        }
    }

    #[test]
    fn short_geometry_is_ordered(
        low in 1.0..1000.0_f64,
        range in 1.0..500.0_f64,
        frac in 0.0..1.0_f64,
    ) {
        let high = low + range;
        let price = low + range * frac;
        let pivots = vec![pivot(PivotKind::High, high, 0), pivot(PivotKind::Low, low, 10)];

        if let Some(c) = fibonacci::analyze(&last_close(price), &pivots, 0.01, 0.015, &ElliottContext::none()) {
            prop_assert_eq!(c.direction, Direction::Short);
            prop_assert!(c.stop_loss > high);
            prop_assert!(low < c.target_price && c.target_price < high);
            prop_assert_eq!(c.take_profit_1, low);
            prop_assert!(c.take_profit_2 > 0.0 && c.take_profit_2 < c.take_profit_1);
        }
    }
}

// ── 3. Scoring ───────────────────────────────────────────────────────

proptest! {
    #[test]
    fn probability_is_monotone(a in 0u8..20, b in 0u8..20) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(ScoringEngine::probability(lo) <= ScoringEngine::probability(hi));
    }

    #[test]
    fn added_feature_never_lowers_score(base in arb_features()) {
        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(config.clone());
        let score = engine.score(&base);

        for upgraded in with_one_more_feature(&base, config.volume_spike_multiplier) {
            let upgraded_score = engine.score(&upgraded);
            prop_assert!(upgraded_score >= score, "{:?} -> {:?}", base, upgraded);
            prop_assert!(
                ScoringEngine::probability(upgraded_score) >= ScoringEngine::probability(score)
            );
        }
    }

    #[test]
    fn confluent_candidate_never_lowers_probability(
        scores in prop::collection::vec(0u8..8, 1..6),
        extra in 0u8..8,
    ) {
        let pivots = vec![pivot(PivotKind::Low, 100.0, 0), pivot(PivotKind::High, 150.0, 10)];
        let template = fibonacci::analyze(&last_close(119.0), &pivots, 0.01, 0.015, &ElliottContext::none()).unwrap();
        let engine = ScoringEngine::new(ScoringConfig {
            min_probability: 0,
            ..ScoringConfig::default()
        });

        let mut candidates: Vec<ScoredCandidate> = scores
            .iter()
            .enumerate()
            .map(|(seq, &score)| scored(&template, "AUSDT", score, seq))
            .collect();
        let before = engine.rank(candidates.clone());
        candidates.push(scored(&template, "AUSDT", extra, scores.len()));
        let after = engine.rank(candidates);

        for b in &before {
            let a = after.iter().find(|a| a.sequence == b.sequence).unwrap();
            prop_assert!(a.probability >= b.probability);
            prop_assert!(a.probability <= 99);
        }
    }

    #[test]
    fn ranking_respects_floor_cap_and_order(
        entries in prop::collection::vec((0..4usize, 0u8..8), 1..12),
    ) {
        let pivots = vec![pivot(PivotKind::Low, 100.0, 0), pivot(PivotKind::High, 150.0, 10)];
        let template = fibonacci::analyze(&last_close(119.0), &pivots, 0.01, 0.015, &ElliottContext::none()).unwrap();

        let config = ScoringConfig::default();
        let engine = ScoringEngine::new(config.clone());
        let candidates: Vec<ScoredCandidate> = entries
            .iter()
            .enumerate()
            .map(|(seq, &(sym, score))| scored(&template, &format!("S{}USDT", sym), score, seq))
            .collect();

        let ranked = engine.rank(candidates);
        for c in &ranked {
            prop_assert!(c.probability >= config.min_probability);
            prop_assert!(c.probability <= config.probability_cap);
        }
        for pair in ranked.windows(2) {
            prop_assert!(pair[0].probability >= pair[1].probability);
        }
    }
}

// ── 4. Staging exclusivity and promotion ─────────────────────────────

proptest! {
    #[test]
    fn pending_and_open_are_exclusive(ops in prop::collection::vec(arb_op(), 1..60)) {
        let symbols = ["AUSDT", "BUSDT", "CUSDT"];
        let mut sm = StagedSignalStateMachine::new(StagingConfig::default());
        let mut now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        for op in ops {
            match op {
                Op::Track(i) => {
                    sm.track_candidate(symbols[i], &[], now);
                }
                Op::Fill(i) => {
                    let _ = sm.record_fill(symbols[i], Side::Buy, 10.0, 100.0, now);
                }
                Op::Close(i, take_profit) => {
                    let kind = if take_profit { ClosureKind::TakeProfit } else { ClosureKind::StopLoss };
                    let origin = sm.position(symbols[i]).map(|p| p.tier_of_origin);
                    let closure = sm.record_closure(symbols[i], kind, now);
                    prop_assert_eq!(closure.is_some(), origin.is_some());
                    if let Some(origin) = origin {
                        let expected = if take_profit { origin.next() } else { None };
                        prop_assert_eq!(sm.pending(symbols[i]).map(|p| p.tier), expected);
                    }
                }
                Op::Discard(i) => {
                    sm.discard_pending(symbols[i]);
                }
                Op::Advance(minutes) => {
                    now += Duration::minutes(minutes);
                    for expired in sm.expire(now) {
                        prop_assert!(sm.pending(&expired.signal.symbol).is_none());
                    }
                }
            }

            for s in symbols {
                prop_assert!(!(sm.pending(s).is_some() && sm.position(s).is_some()));
            }
        }
    }
}

// ── 5. Governor pause monotonicity ───────────────────────────────────

proptest! {
    #[test]
    fn pause_never_clears_without_reset(
        balances in prop::collection::vec(1.0..2000.0_f64, 1..40),
        pnls in prop::collection::vec(-50.0..50.0_f64, 0..40),
    ) {
        let mut gov = DrawdownGovernor::new(0.15, 5);
        let mut was_paused = false;
        let mut peak = 0.0_f64;

        for (i, balance) in balances.iter().enumerate() {
            gov.observe_balance(*balance);
            if let Some(pnl) = pnls.get(i) {
                gov.record_trade(*pnl);
            }

            prop_assert!(gov.state().peak_equity >= peak);
            peak = gov.state().peak_equity;

            if was_paused {
                prop_assert!(gov.is_paused());
            }
            was_paused = gov.is_paused();
        }
    }
}
