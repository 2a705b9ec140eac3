//! Power factor estimation and long-term power smoothing used to tag what a
//! channel is connected to.

use std::fmt;

/// Apparent power (VA) below which the power factor is not estimated.
pub const MIN_APPARENT_POWER_VA: f64 = 10.0;
/// Smoothing factor of the long-term average power.
pub const EMA_ALPHA: f64 = 0.1;
/// Long-term power magnitude (W) separating idle from importing/exporting.
pub const TAG_THRESHOLD_W: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplianceTag {
    SolarExporting,
    LoadImporting,
    #[default]
    Idle,
}

impl ApplianceTag {
    pub fn classify(long_term_avg_power: f64) -> Self {
        if long_term_avg_power < -TAG_THRESHOLD_W {
            Self::SolarExporting
        } else if long_term_avg_power > TAG_THRESHOLD_W {
            Self::LoadImporting
        } else {
            Self::Idle
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SolarExporting => "Solar/Exporting",
            Self::LoadImporting => "Load/Importing",
            Self::Idle => "Idle",
        }
    }
}

impl fmt::Display for ApplianceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `|P| / S` clamped to `[0, 1]`, or `None` when the reading is too small
/// or not numeric.
pub fn power_factor(active_power: f64, apparent_power: f64) -> Option<f64> {
    if active_power.is_nan() || apparent_power.is_nan() || apparent_power <= MIN_APPARENT_POWER_VA
    {
        return None;
    }
    Some((active_power.abs() / apparent_power).clamp(0.0, 1.0))
}

/// Incremental mean over all estimated power factors since start.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningMean {
    pub mean: f64,
    pub count: u64,
}

impl RunningMean {
    pub fn push(&mut self, value: f64) {
        if self.count == 0 || self.mean.is_nan() {
            self.mean = value;
            self.count = 1;
        } else {
            self.mean = (self.mean * self.count as f64 + value) / (self.count + 1) as f64;
            self.count += 1;
        }
    }
}

/// Exponential moving average of active power. A zero average is treated
/// as "never set" and takes the sample as-is.
pub fn smooth_power(previous: f64, active_power: f64) -> f64 {
    if previous == 0.0 {
        active_power
    } else {
        previous * (1.0 - EMA_ALPHA) + active_power * EMA_ALPHA
    }
}
