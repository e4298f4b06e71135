//! Elliott wave-3 confluence
//!
//! Looks at the last three pivots for an impulse wave 1 followed by a wave 2
//! retracement of 50%..78.6%, which marks a potential wave-3 start.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::pivots::{Pivot, PivotKind};
use crate::types::Direction;

const MIN_RETRACEMENT: f64 = 0.5;
const MAX_RETRACEMENT: f64 = 0.786;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElliottLabel {
    Wave3Start,
    NoPattern,
    Insufficient,
}

impl fmt::Display for ElliottLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElliottLabel::Wave3Start => write!(f, "WAVE_3_START"),
            ElliottLabel::NoPattern => write!(f, "NO_PATTERN"),
            ElliottLabel::Insufficient => write!(f, "INSUFFICIENT"),
        }
    }
}

/// Result of the wave check; `direction` is set only for `Wave3Start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElliottContext {
    pub direction: Option<Direction>,
    pub label: ElliottLabel,
}

impl ElliottContext {
    pub fn none() -> Self {
        Self {
            direction: None,
            label: ElliottLabel::NoPattern,
        }
    }

    /// Wave-3 start agreeing with the given trade direction
    pub fn confirms(&self, direction: Direction) -> bool {
        self.label == ElliottLabel::Wave3Start && self.direction == Some(direction)
    }
}

pub fn check_confluence(pivots: &[Pivot]) -> ElliottContext {
    let [p1, p2, p3] = match pivots {
        [.., a, b, c] => [a, b, c],
        _ => {
            return ElliottContext {
                direction: None,
                label: ElliottLabel::Insufficient,
            }
        }
    };

    let (start, end, retrace) = (p1.price, p2.price, p3.price);
    let matched = match (p1.kind, p2.kind, p3.kind) {
        (PivotKind::Low, PivotKind::High, PivotKind::Low) if end > start && retrace > start => {
            let ratio = (end - retrace) / (end - start);
            in_band(ratio).then_some(Direction::Long)
        }
        (PivotKind::High, PivotKind::Low, PivotKind::High) if end < start && retrace < start => {
            let ratio = (retrace - end) / (start - end);
            in_band(ratio).then_some(Direction::Short)
        }
        _ => None,
    };

    match matched {
        Some(direction) => ElliottContext {
            direction: Some(direction),
            label: ElliottLabel::Wave3Start,
        },
        None => ElliottContext::none(),
    }
}

fn in_band(ratio: f64) -> bool {
    (MIN_RETRACEMENT..=MAX_RETRACEMENT).contains(&ratio)
}
