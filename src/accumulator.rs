use crate::channel::CHANNEL_COUNT;
use crate::telemetry::TelemetryFrame;
use chrono::{DateTime, Utc};

/// Six voltages ordered `[L1N, L2N, L3N, L1L2, L2L3, L3L1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VoltageVector(pub [f64; 6]);

impl VoltageVector {
    pub fn l1n(&self) -> f64 {
        self.0[0]
    }
    pub fn l2n(&self) -> f64 {
        self.0[1]
    }
    pub fn l3n(&self) -> f64 {
        self.0[2]
    }
    pub fn l1l2(&self) -> f64 {
        self.0[3]
    }
    pub fn l2l3(&self) -> f64 {
        self.0[4]
    }
    pub fn l3l1(&self) -> f64 {
        self.0[5]
    }

    fn add(&mut self, other: &VoltageVector) {
        for (acc, v) in self.0.iter_mut().zip(other.0.iter()) {
            *acc += v;
        }
    }
}

/// Sums of voltages and per-channel currents since the window opened.
#[derive(Debug, Clone)]
pub struct AggregationWindow {
    voltage_acc: VoltageVector,
    current_acc: [f64; CHANNEL_COUNT],
    sample_count: u64,
    window_start: DateTime<Utc>,
}

impl AggregationWindow {
    pub fn new(window_start: DateTime<Utc>) -> Self {
        Self {
            voltage_acc: VoltageVector::default(),
            current_acc: [0.0; CHANNEL_COUNT],
            sample_count: 0,
            window_start,
        }
    }

    /// Add one validated frame to the running sums.
    pub fn add(&mut self, frame: &TelemetryFrame) {
        self.voltage_acc.add(&frame.voltages);
        for (index, acc) in self.current_acc.iter_mut().enumerate() {
            if let Some(sample) = frame.channel(index + 1) {
                *acc += sample.current;
            }
        }
        self.sample_count += 1;
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn voltage_sum(&self) -> &VoltageVector {
        &self.voltage_acc
    }

    pub fn current_sum(&self, index: usize) -> f64 {
        self.current_acc[index]
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.window_start
    }

    /// Mean voltages over the window, clearing the voltage sums.
    /// `None` (and nothing cleared) when no sample was added.
    pub fn take_mean_voltages(&mut self) -> Option<VoltageVector> {
        if self.sample_count == 0 {
            return None;
        }
        let n = self.sample_count as f64;
        let mut mean = self.voltage_acc;
        for v in mean.0.iter_mut() {
            *v /= n;
        }
        self.voltage_acc = VoltageVector::default();
        Some(mean)
    }

    /// Mean current of a 0-based channel index, clearing that channel's sum.
    pub fn take_mean_current(&mut self, index: usize) -> f64 {
        let sum = std::mem::take(&mut self.current_acc[index]);
        if self.sample_count == 0 {
            return 0.0;
        }
        sum / self.sample_count as f64
    }

    /// Start an empty window at `now`.
    pub fn restart(&mut self, now: DateTime<Utc>) {
        self.voltage_acc = VoltageVector::default();
        self.current_acc = [0.0; CHANNEL_COUNT];
        self.sample_count = 0;
        self.window_start = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ChannelSample;
    use pretty_assertions::assert_eq;

    fn frame(v: [f64; 6], currents: &[(usize, f64)]) -> TelemetryFrame {
        TelemetryFrame {
            voltages: VoltageVector(v),
            channels: currents
                .iter()
                .map(|&(id, current)| ChannelSample {
                    id,
                    current,
                    ..Default::default()
                })
                .collect(),
            frequency: None,
        }
    }

    #[test]
    fn test_mean_voltages_and_reset() {
        let mut w = AggregationWindow::new(Utc::now());
        w.add(&frame([230.0, 231.0, 229.0, 400.0, 401.0, 399.0], &[]));
        w.add(&frame([232.0, 233.0, 231.0, 402.0, 403.0, 401.0], &[]));
        w.add(&frame([228.0, 229.0, 227.0, 398.0, 399.0, 397.0], &[]));

        assert_eq!(w.sample_count(), 3);
        let mean = w.take_mean_voltages().unwrap();
        assert_eq!(mean.0, [230.0, 231.0, 229.0, 400.0, 401.0, 399.0]);
        assert_eq!(w.voltage_sum().0, [0.0; 6]);
    }

    #[test]
    fn test_empty_window_has_no_mean() {
        let mut w = AggregationWindow::new(Utc::now());
        assert!(w.take_mean_voltages().is_none());
        assert_eq!(w.take_mean_current(0), 0.0);
    }

    #[test]
    fn test_mean_current_only_counts_present_channels() {
        let mut w = AggregationWindow::new(Utc::now());
        w.add(&frame([0.0; 6], &[(1, 2.0), (28, 1.0)]));
        w.add(&frame([0.0; 6], &[(1, 4.0)]));

        assert_eq!(w.current_sum(0), 6.0);
        assert_eq!(w.take_mean_current(0), 3.0);
        assert_eq!(w.take_mean_current(27), 0.5);
        assert_eq!(w.current_sum(0), 0.0);
        assert_eq!(w.take_mean_current(5), 0.0);
    }

    #[test]
    fn test_restart_clears_everything() {
        let start = Utc::now();
        let mut w = AggregationWindow::new(start);
        w.add(&frame([1.0; 6], &[(3, 1.0)]));

        let later = start + chrono::Duration::seconds(20);
        assert_eq!(w.elapsed(later), chrono::Duration::seconds(20));
        w.restart(later);
        assert_eq!(w.sample_count(), 0);
        assert_eq!(w.window_start(), later);
        assert_eq!(w.current_sum(2), 0.0);
        assert_eq!(w.voltage_sum().0, [0.0; 6]);
    }
}
