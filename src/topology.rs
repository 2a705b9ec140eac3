//! Wiring topology classification from a window's mean voltages.

use crate::accumulator::VoltageVector;
use crate::phase::Phase;
use std::fmt;

/// Two line-to-neutral voltages within this many volts are the same conductor.
const SAME_CONDUCTOR_V: f64 = 1.0;
/// Line-to-neutral voltage below which a conductor is considered dead.
const DEAD_CONDUCTOR_V: f64 = 10.0;
/// Any line-to-line voltage above this means a 400V star network.
const STAR_LINE_TO_LINE_V: f64 = 330.0;
/// Line-to-line voltage below this is a collapsed delta leg.
const COLLAPSED_LEG_V: f64 = 150.0;
/// A leg below this fraction of the other two legs' mean is collapsed.
const COLLAPSED_LEG_RATIO: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemTopology {
    SinglePhaseL1,
    SinglePhaseL2,
    SinglePhaseL3,
    ThreePhaseStar400,
    DeltaL1L2,
    DeltaL2L3,
    DeltaL3L1,
    #[default]
    Unknown,
}

impl SystemTopology {
    /// Classify mean voltages. Rules are evaluated in order, first match wins.
    pub fn resolve(v: &VoltageVector) -> Self {
        let same = |a: f64, b: f64| (a - b).abs() <= SAME_CONDUCTOR_V;
        let collapsed = |leg: f64, x: f64, y: f64| {
            leg < COLLAPSED_LEG_V || leg < COLLAPSED_LEG_RATIO * ((x + y) / 2.0)
        };

        if same(v.l1n(), v.l2n()) && v.l3n() < DEAD_CONDUCTOR_V {
            Self::SinglePhaseL1
        } else if same(v.l2n(), v.l3n()) && v.l1n() < DEAD_CONDUCTOR_V {
            Self::SinglePhaseL2
        } else if same(v.l1n(), v.l3n()) && v.l2n() < DEAD_CONDUCTOR_V {
            Self::SinglePhaseL3
        } else if [v.l1l2(), v.l2l3(), v.l3l1()]
            .iter()
            .any(|&ll| ll > STAR_LINE_TO_LINE_V)
        {
            Self::ThreePhaseStar400
        } else if collapsed(v.l3l1(), v.l1l2(), v.l2l3()) {
            Self::DeltaL1L2
        } else if collapsed(v.l1l2(), v.l2l3(), v.l3l1()) {
            Self::DeltaL2L3
        } else if collapsed(v.l2l3(), v.l1l2(), v.l3l1()) {
            Self::DeltaL3L1
        } else {
            Self::Unknown
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SinglePhaseL1 => "Single Phase (L1)",
            Self::SinglePhaseL2 => "Single Phase (L2)",
            Self::SinglePhaseL3 => "Single Phase (L3)",
            Self::ThreePhaseStar400 => "3x400V (3P+N)",
            Self::DeltaL1L2 => "3x230V Delta (L1-L2)",
            Self::DeltaL2L3 => "3x230V Delta (L2-L3)",
            Self::DeltaL3L1 => "3x230V Delta (L3-L1)",
            Self::Unknown => "Unknown / Fluctuating",
        }
    }

    /// Phase every channel is pinned to on a single-phase installation.
    pub fn forced_phase(&self) -> Option<Phase> {
        match self {
            Self::SinglePhaseL1 => Some(Phase::L1N),
            Self::SinglePhaseL2 => Some(Phase::L2N),
            Self::SinglePhaseL3 => Some(Phase::L3N),
            _ => None,
        }
    }
}

impl fmt::Display for SystemTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
