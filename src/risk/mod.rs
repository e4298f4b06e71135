//! Risk Sizer - Position sizing and order bounds
//!
//! Implements:
//! - Fixed-fraction risk capital with leverage
//! - Quantity floored to the instrument step
//! - Stop/target rounded to the instrument tick and checked against entry
//! - Governance gate (drawdown / consecutive losses)

pub mod drawdown;

pub use drawdown::{DrawdownGovernor, DrawdownState};

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::RiskConfig;
use crate::error::SizingError;
use crate::types::{InstrumentRules, OrderRequest, Side, SizingMetadata};

/// Floor `value` to a multiple of `step`
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step.is_zero() || step.is_sign_negative() {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Round `value` to the nearest multiple of `tick`
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick.is_zero() || tick.is_sign_negative() {
        return value;
    }
    let ticks = (value / tick).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    (ticks * tick).normalize()
}

/// Everything the sizer needs for one order
#[derive(Debug, Clone)]
pub struct SizingInput<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub strategy_label: &'a str,
    pub balance: Option<f64>,
    pub rules: Option<InstrumentRules>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
}

/// Risk sizer
#[derive(Debug, Clone)]
pub struct RiskSizer {
    /// Fraction of balance committed as margin (e.g., 0.05 = 5%)
    risk_fraction: f64,
    leverage: u32,
    /// Balance at or below this counts as unavailable
    min_balance: f64,
}

impl Default for RiskSizer {
    fn default() -> Self {
        Self::from_config(&RiskConfig::default())
    }
}

impl RiskSizer {
    pub fn new(risk_fraction: f64, leverage: u32, min_balance: f64) -> Self {
        Self {
            risk_fraction,
            leverage,
            min_balance,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(config.risk_per_trade, config.leverage, config.min_balance)
    }

    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    /// Convert a confirmed signal into a bounded order request
    pub fn size(
        &self,
        input: &SizingInput<'_>,
        governor: &DrawdownGovernor,
    ) -> Result<OrderRequest, SizingError> {
        if let Some(reason) = governor.pause_reason() {
            return Err(SizingError::GovernanceBlocked(reason));
        }

        let balance = match input.balance {
            Some(b) if b.is_finite() && b > 0.0 && b > self.min_balance => b,
            other => return Err(SizingError::BalanceUnavailable(other)),
        };
        let rules = input
            .rules
            .ok_or_else(|| SizingError::RulesUnavailable(input.symbol.to_string()))?;

        let entry = match Decimal::from_f64(input.entry_price) {
            Some(e) if input.entry_price.is_finite() && e > Decimal::ZERO => e,
            _ => return Err(SizingError::InvalidEntry(input.entry_price)),
        };

        let balance_d =
            Decimal::from_f64(balance).ok_or(SizingError::BalanceUnavailable(Some(balance)))?;
        let risk_fraction = Decimal::from_f64(self.risk_fraction).unwrap_or(Decimal::ZERO);
        let leverage = Decimal::from(self.leverage);

        let risk_capital = balance_d * risk_fraction;
        let notional = risk_capital * leverage;
        let quantity = floor_to_step(notional / entry, rules.qty_step);

        if quantity <= Decimal::ZERO {
            return Err(SizingError::NonPositiveQuantity {
                step: rules.qty_step,
            });
        }
        if quantity < rules.min_qty {
            return Err(SizingError::BelowMinimum {
                quantity,
                min_qty: rules.min_qty,
            });
        }

        let stop_loss = Decimal::from_f64(input.stop_loss)
            .map(|sl| round_to_tick(sl, rules.tick_size))
            .unwrap_or(Decimal::ZERO);
        let stop_on_loss_side = match input.side {
            Side::Buy => stop_loss < entry,
            Side::Sell => stop_loss > entry,
        };
        if stop_loss <= Decimal::ZERO || !stop_on_loss_side {
            return Err(SizingError::InvalidStop {
                stop_loss,
                entry,
                side: input.side,
            });
        }

        let take_profit = match input.take_profit {
            None => None,
            Some(tp) => {
                let rounded = Decimal::from_f64(tp)
                    .map(|v| round_to_tick(v, rules.tick_size))
                    .unwrap_or(Decimal::ZERO);
                let on_profit_side = match input.side {
                    Side::Buy => rounded > entry,
                    Side::Sell => rounded < entry && rounded > Decimal::ZERO,
                };
                if !on_profit_side {
                    return Err(SizingError::InvalidTakeProfit {
                        take_profit: rounded,
                        entry,
                        side: input.side,
                    });
                }
                Some(rounded)
            }
        };

        tracing::debug!(
            symbol = %input.symbol,
            quantity = %quantity,
            notional = %notional,
            stop_loss = %stop_loss,
            take_profit = ?take_profit,
            "Sizer: order bounded"
        );

        Ok(OrderRequest {
            symbol: input.symbol.to_string(),
            side: input.side,
            quantity,
            stop_loss,
            take_profit,
            strategy_label: input.strategy_label.to_string(),
            sizing: SizingMetadata {
                balance: balance_d,
                risk_fraction,
                risk_capital,
                leverage,
                notional,
                entry_price: entry,
            },
        })
    }
}

impl SizingMetadata {
    /// Notional as f64 for journaling
    pub fn notional_f64(&self) -> f64 {
        self.notional.to_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PauseReason;
    use rust_decimal_macros::dec;

    fn rules(step: Decimal, min: Decimal, tick: Decimal) -> InstrumentRules {
        InstrumentRules {
            qty_step: step,
            min_qty: min,
            tick_size: tick,
        }
    }

    fn make_input<'a>(entry: f64, stop: f64, tp: Option<f64>, rules: InstrumentRules) -> SizingInput<'a> {
        SizingInput {
            symbol: "BTCUSDT",
            side: Side::Buy,
            strategy_label: "momentum_pullback_5m",
            balance: Some(1000.0),
            rules: Some(rules),
            entry_price: entry,
            stop_loss: stop,
            take_profit: tp,
        }
    }

    #[test]
    fn test_position_sizing() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        let input = make_input(50_000.0, 49_000.0, Some(52_500.0), rules(dec!(0.001), dec!(0.001), dec!(0.1)));

        let order = sizer.size(&input, &gov).unwrap();
        assert_eq!(order.quantity, dec!(0.01));
        assert_eq!(order.sizing.risk_capital, dec!(50));
        assert_eq!(order.sizing.notional, dec!(500));
        assert_eq!(order.stop_loss, dec!(49000));
        assert_eq!(order.take_profit, Some(dec!(52500)));
    }

    #[test]
    fn test_quantity_floors_to_step() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        // 500 / 3 = 166.66.. -> floor to step 0.5
        let order = sizer
            .size(&make_input(3.0, 2.9, None, rules(dec!(0.5), dec!(1), dec!(0.01))), &gov)
            .unwrap();
        assert_eq!(order.quantity, dec!(166.5));
    }

    #[test]
    fn test_stop_rounded_to_tick_then_checked() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        // 0.9996 rounds to 1.000 on a 0.01 tick: no longer below entry
        let err = sizer
            .size(&make_input(1.0, 0.9996, None, rules(dec!(1), dec!(1), dec!(0.01))), &gov)
            .unwrap_err();
        assert!(matches!(err, SizingError::InvalidStop { .. }), "got {:?}", err);

        let err = sizer
            .size(&make_input(1.0, 0.0, None, rules(dec!(1), dec!(1), dec!(0.01))), &gov)
            .unwrap_err();
        assert!(matches!(err, SizingError::InvalidStop { .. }));
    }

    #[test]
    fn test_take_profit_must_be_above_entry_for_longs() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        let err = sizer
            .size(&make_input(100.0, 95.0, Some(99.0), rules(dec!(0.01), dec!(0.01), dec!(0.01))), &gov)
            .unwrap_err();
        assert!(matches!(err, SizingError::InvalidTakeProfit { .. }));
    }

    #[test]
    fn test_balance_and_rules_required() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        let r = rules(dec!(0.001), dec!(0.001), dec!(0.1));

        let mut input = make_input(100.0, 95.0, None, r);
        input.balance = None;
        assert_eq!(sizer.size(&input, &gov), Err(SizingError::BalanceUnavailable(None)));

        input.balance = Some(0.5);
        assert_eq!(sizer.size(&input, &gov), Err(SizingError::BalanceUnavailable(Some(0.5))));

        let mut input = make_input(100.0, 95.0, None, r);
        input.rules = None;
        assert_eq!(
            sizer.size(&input, &gov),
            Err(SizingError::RulesUnavailable("BTCUSDT".to_string()))
        );

        let input = make_input(0.0, 95.0, None, r);
        assert_eq!(sizer.size(&input, &gov), Err(SizingError::InvalidEntry(0.0)));
    }

    #[test]
    fn test_paused_governor_blocks_everything() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let mut gov = DrawdownGovernor::new(0.15, 1);
        gov.record_trade(-5.0);

        let input = make_input(50_000.0, 49_000.0, None, rules(dec!(0.001), dec!(0.001), dec!(0.1)));
        assert_eq!(
            sizer.size(&input, &gov),
            Err(SizingError::GovernanceBlocked(PauseReason::ConsecutiveLosses {
                losses: 1,
                limit: 1
            }))
        );
    }

    #[test]
    fn test_short_side_bounds() {
        let sizer = RiskSizer::new(0.05, 10, 1.0);
        let gov = DrawdownGovernor::new(0.15, 5);
        let mut input = make_input(100.0, 105.0, Some(90.0), rules(dec!(0.01), dec!(0.01), dec!(0.01)));
        input.side = Side::Sell;
        let order = sizer.size(&input, &gov).unwrap();
        assert_eq!(order.stop_loss, dec!(105));
        assert_eq!(order.take_profit, Some(dec!(90)));

        input.stop_loss = 95.0;
        assert!(matches!(sizer.size(&input, &gov), Err(SizingError::InvalidStop { .. })));
    }
}
