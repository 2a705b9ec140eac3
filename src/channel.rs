use crate::appliance::{power_factor, smooth_power, ApplianceTag, RunningMean};
use crate::association::next_association;
use crate::phase::{PhaseMatch, PhaseTracker};
use crate::telemetry::ChannelSample;
use crate::topology::SystemTopology;
use tracing::info;

/// Number of CT inputs on the metering device.
pub const CHANNEL_COUNT: usize = 28;

/// Everything remembered about one CT channel for the life of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    pub id: usize,
    pub mean_current: f64,
    pub active_power: f64,
    pub apparent_power: f64,
    pub max_active_power: f64,
    pub power_factor: f64,
    pub max_power_factor: f64,
    pub avg_power_factor: RunningMean,
    pub long_term_avg_power: f64,
    pub phase: PhaseTracker,
    pub appliance_tag: ApplianceTag,
    /// Last association code written for this channel.
    pub association: u16,
}

impl ChannelState {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            mean_current: 0.0,
            active_power: 0.0,
            apparent_power: 0.0,
            max_active_power: 0.0,
            power_factor: 0.0,
            max_power_factor: 0.0,
            avg_power_factor: RunningMean::default(),
            long_term_avg_power: 0.0,
            phase: PhaseTracker::default(),
            appliance_tag: ApplianceTag::Idle,
            association: 0,
        }
    }

    /// Overwrite the instantaneous power readings.
    pub fn record_sample(&mut self, sample: &ChannelSample) {
        self.active_power = sample.active_power;
        self.apparent_power = sample.apparent_power;
    }

    pub fn phase_match(&self) -> PhaseMatch {
        self.phase.current()
    }

    pub fn is_locked(&self) -> bool {
        self.phase.is_locked()
    }

    /// Run the per-window pipeline (phase matching, tagging, association)
    /// and return the association code to write back.
    pub fn close_window(&mut self, mean_current: f64, topology: SystemTopology) -> u16 {
        self.mean_current = mean_current;
        self.phase.begin_window(mean_current);
        self.phase.apply_topology(topology);

        let p = self.active_power;
        if p.abs() > self.max_active_power {
            self.max_active_power = p.abs();
        }

        match power_factor(p, self.apparent_power) {
            Some(pf) => {
                self.power_factor = pf;
                if pf > self.max_power_factor {
                    self.max_power_factor = pf;
                }
                if self.phase.try_lock(pf) {
                    let pf_text = format!("{pf:.2}");
                    info!(
                        channel = self.id,
                        phase = %self.phase.current(),
                        pf = %pf_text,
                        "locked channel phase"
                    );
                }
                self.avg_power_factor.push(pf);
            }
            None => self.power_factor = 0.0,
        }

        self.long_term_avg_power = smooth_power(self.long_term_avg_power, p);
        self.appliance_tag = ApplianceTag::classify(self.long_term_avg_power);

        self.association = next_association(
            self.association,
            self.phase.resolved(),
            self.appliance_tag,
            p,
        );
        self.association
    }
}
