//! Per-channel phase assignment and confidence-based locking.

use crate::topology::SystemTopology;
use std::fmt;

/// Power factor a channel must exceed before its phase is frozen.
pub const LOCK_POWER_FACTOR: f64 = 0.95;
/// Mean current (A) above which an unlocked channel goes back to analyzing.
pub const ACTIVE_CURRENT_A: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    L1N,
    L2N,
    L3N,
    L1L2,
    L2L3,
    L3L1,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::L1N,
        Phase::L2N,
        Phase::L3N,
        Phase::L1L2,
        Phase::L2L3,
        Phase::L3L1,
    ];

    /// Position in a voltage vector and in the association table.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            Phase::L1N => "L1N",
            Phase::L2N => "L2N",
            Phase::L3N => "L3N",
            Phase::L1L2 => "L1L2",
            Phase::L2L3 => "L2L3",
            Phase::L3L1 => "L3L1",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Current candidate phase of a channel. `phase == None` means unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseMatch {
    pub phase: Option<Phase>,
    /// Set when the phase was imposed by a single-phase topology.
    pub forced: bool,
}

impl PhaseMatch {
    pub const UNRESOLVED: PhaseMatch = PhaseMatch {
        phase: None,
        forced: false,
    };

    pub fn matched(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            forced: false,
        }
    }

    pub fn forced(phase: Phase) -> Self {
        Self {
            phase: Some(phase),
            forced: true,
        }
    }
}

impl fmt::Display for PhaseMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, self.forced) {
            (None, _) => f.write_str("Analyzing"),
            (Some(p), true) => write!(f, "{p} (Forced)"),
            (Some(p), false) => write!(f, "{p}"),
        }
    }
}

/// Analyzing/Locked state machine for one channel.
///
/// Once locked the matcher never reassigns the phase again for the life of
/// the process. A single-phase topology still pins every channel to its
/// forced phase, locked or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PhaseTracker {
    current: PhaseMatch,
    locked: bool,
}

impl PhaseTracker {
    pub fn new(current: PhaseMatch) -> Self {
        Self {
            current,
            locked: false,
        }
    }

    pub fn current(&self) -> PhaseMatch {
        self.current
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Phase usable for the association code this window.
    pub fn resolved(&self) -> Option<Phase> {
        self.current.phase
    }

    /// Start of a window: an unlocked channel carrying current is analyzed
    /// afresh.
    pub fn begin_window(&mut self, mean_current: f64) {
        if !self.locked && mean_current > ACTIVE_CURRENT_A {
            self.current = PhaseMatch::UNRESOLVED;
        }
    }

    pub fn apply_topology(&mut self, topology: SystemTopology) {
        if let Some(phase) = topology.forced_phase() {
            self.current = PhaseMatch::forced(phase);
        }
    }

    /// Lock when the power factor is convincing and a concrete phase is
    /// held. Returns true on the transition.
    pub fn try_lock(&mut self, power_factor: f64) -> bool {
        if power_factor > LOCK_POWER_FACTOR && !self.locked && self.current.phase.is_some() {
            self.locked = true;
            return true;
        }
        false
    }
}
