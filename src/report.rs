//! Payloads produced at the end of every window.

use crate::accumulator::VoltageVector;
use crate::channel::{ChannelState, CHANNEL_COUNT};
use crate::topology::SystemTopology;
use serde::{Deserialize, Serialize};

/// CT configuration written back to the metering device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Reserved for CT type selection; always zero.
    pub ct_types: Vec<u16>,
    pub ct_phases: Vec<u16>,
}

impl DeviceConfig {
    pub fn new(ct_phases: [u16; CHANNEL_COUNT]) -> Self {
        Self {
            ct_types: vec![0; CHANNEL_COUNT],
            ct_phases: ct_phases.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoltageReadings {
    #[serde(rename = "L1N")]
    pub l1n: f64,
    #[serde(rename = "L2N")]
    pub l2n: f64,
    #[serde(rename = "L3N")]
    pub l3n: f64,
    #[serde(rename = "L1L2")]
    pub l1l2: f64,
    #[serde(rename = "L2L3")]
    pub l2l3: f64,
    #[serde(rename = "L3L1")]
    pub l3l1: f64,
}

impl From<&VoltageVector> for VoltageReadings {
    fn from(v: &VoltageVector) -> Self {
        Self {
            l1n: v.l1n(),
            l2n: v.l2n(),
            l3n: v.l3n(),
            l1l2: v.l1l2(),
            l2l3: v.l2l3(),
            l3l1: v.l3l1(),
        }
    }
}

/// One row of the UI channel table. Numbers are pre-formatted strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CtSnapshot {
    pub id: usize,
    pub tag: String,
    pub phase: String,
    pub locked: bool,
    pub current: String,
    #[serde(rename = "activeP")]
    pub active_p: String,
    #[serde(rename = "apparentP")]
    pub apparent_p: String,
    pub pf: String,
    #[serde(rename = "avgPf")]
    pub avg_pf: String,
    pub assoc: u16,
}

/// Shown instead of an average power factor that is not a number.
pub const NOT_AVAILABLE: &str = "N/A";

impl From<&ChannelState> for CtSnapshot {
    fn from(c: &ChannelState) -> Self {
        let avg = c.avg_power_factor.mean;
        Self {
            id: c.id,
            tag: c.appliance_tag.label().to_string(),
            phase: c.phase_match().to_string(),
            locked: c.is_locked(),
            current: format!("{:.2}", c.mean_current),
            active_p: format!("{:.1}", c.active_power),
            apparent_p: format!("{:.1}", c.apparent_power),
            pf: format!("{:.2}", c.power_factor),
            avg_pf: if avg.is_nan() {
                NOT_AVAILABLE.to_string()
            } else {
                format!("{avg:.2}")
            },
            assoc: c.association,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiSnapshot {
    pub topology: String,
    pub voltages: VoltageReadings,
    pub frequency: f64,
    pub cts: Vec<CtSnapshot>,
}

impl UiSnapshot {
    pub fn build(
        topology: SystemTopology,
        mean_voltages: &VoltageVector,
        frequency: f64,
        channels: &[ChannelState],
    ) -> Self {
        Self {
            topology: topology.label().to_string(),
            voltages: mean_voltages.into(),
            frequency,
            cts: channels.iter().map(CtSnapshot::from).collect(),
        }
    }
}
