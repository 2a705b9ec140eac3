//! Device association codes: one code per (phase, power-flow direction).

use crate::appliance::ApplianceTag;
use crate::phase::Phase;

/// Power (W) inside `[-DEADBAND_W, DEADBAND_W]` keeps the previous direction.
pub const DEADBAND_W: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationCodes {
    pub forward: u16,
    pub reversed: u16,
}

/// Indexed by [`Phase::index`].
pub const ASSOCIATION_TABLE: [AssociationCodes; 6] = [
    AssociationCodes { forward: 1, reversed: 16 },
    AssociationCodes { forward: 2, reversed: 32 },
    AssociationCodes { forward: 4, reversed: 64 },
    AssociationCodes { forward: 33, reversed: 18 },
    AssociationCodes { forward: 66, reversed: 36 },
    AssociationCodes { forward: 65, reversed: 20 },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reversed,
}

pub fn is_reversed(code: u16) -> bool {
    ASSOCIATION_TABLE.iter().any(|c| c.reversed == code)
}

pub fn code_for(phase: Phase, direction: Direction) -> u16 {
    let codes = ASSOCIATION_TABLE[phase.index()];
    match direction {
        Direction::Forward => codes.forward,
        Direction::Reversed => codes.reversed,
    }
}

/// Direction for the next code, with hysteresis around zero power.
///
/// Power is measured through the currently applied code, so a reversed
/// channel reports negated power.
pub fn target_direction(current_code: u16, tag: ApplianceTag, active_power: f64) -> Direction {
    let currently_reversed = is_reversed(current_code);
    let true_power = if currently_reversed {
        -active_power
    } else {
        active_power
    };

    let reversed = if tag == ApplianceTag::SolarExporting {
        false
    } else if true_power < -DEADBAND_W {
        true
    } else if true_power > DEADBAND_W {
        false
    } else {
        currently_reversed
    };

    if reversed {
        Direction::Reversed
    } else {
        Direction::Forward
    }
}

/// Next code for a channel. Without a resolved phase the previous code is
/// kept.
pub fn next_association(
    current_code: u16,
    phase: Option<Phase>,
    tag: ApplianceTag,
    active_power: f64,
) -> u16 {
    match phase {
        Some(p) => code_for(p, target_direction(current_code, tag, active_power)),
        None => current_code,
    }
}
