//! Aggregation state and the arrival-triggered window driver.
//!
//! The engine owns the accumulator and the channel table. Every accepted
//! frame is added to the window, then the elapsed time since the window
//! opened is checked; once it reaches the configured interval the window is
//! closed synchronously before the call returns. No samples means no window
//! ever closes.

use crate::accumulator::{AggregationWindow, VoltageVector};
use crate::channel::{ChannelState, CHANNEL_COUNT};
use crate::report::{DeviceConfig, UiSnapshot};
use crate::telemetry::{self, TelemetryFrame};
use crate::topology::SystemTopology;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::info;

/// Output of one window close, handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub mean_voltages: VoltageVector,
    pub device_config: DeviceConfig,
    pub snapshot: UiSnapshot,
}

#[derive(Debug, Clone)]
pub struct Engine {
    interval: chrono::Duration,
    window: AggregationWindow,
    channels: Vec<ChannelState>,
    topology: SystemTopology,
    frequency: f64,
}

impl Engine {
    pub fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            interval: to_chrono(interval),
            window: AggregationWindow::new(now),
            channels: (1..=CHANNEL_COUNT).map(ChannelState::new).collect(),
            topology: SystemTopology::default(),
            frequency: 0.0,
        }
    }

    /// Takes effect on the next elapsed-time check.
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = to_chrono(interval);
    }

    pub fn interval(&self) -> Duration {
        self.interval.to_std().unwrap_or_default()
    }

    pub fn topology(&self) -> SystemTopology {
        self.topology
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn window(&self) -> &AggregationWindow {
        &self.window
    }

    pub fn channels(&self) -> &[ChannelState] {
        &self.channels
    }

    /// Channel by 1-based id.
    pub fn channel(&self, id: usize) -> Option<&ChannelState> {
        id.checked_sub(1).and_then(|i| self.channels.get(i))
    }

    pub fn channel_mut(&mut self, id: usize) -> Option<&mut ChannelState> {
        id.checked_sub(1).and_then(move |i| self.channels.get_mut(i))
    }

    /// Decode and ingest a raw payload. Malformed payloads are dropped.
    pub fn ingest_payload(&mut self, payload: &[u8], now: DateTime<Utc>) -> Option<WindowReport> {
        let frame = telemetry::decode(payload)?;
        self.ingest(&frame, now)
    }

    /// Ingest one frame; returns a report when this frame closed the window.
    pub fn ingest(&mut self, frame: &TelemetryFrame, now: DateTime<Utc>) -> Option<WindowReport> {
        self.frequency = frame.frequency.unwrap_or(0.0);
        self.window.add(frame);
        for channel in self.channels.iter_mut() {
            if let Some(sample) = frame.channel(channel.id) {
                channel.record_sample(sample);
            }
        }

        if self.window.elapsed(now) < self.interval {
            return None;
        }
        let report = self.close_window();
        self.window.restart(now);
        report
    }

    /// Close the current window. A window without samples is a no-op.
    pub fn close_window(&mut self) -> Option<WindowReport> {
        let mean_voltages = self.window.take_mean_voltages()?;

        self.topology = SystemTopology::resolve(&mean_voltages);
        info!(topology = %self.topology, samples = self.window.sample_count(), "detected topology");

        let mut ct_phases = [0u16; CHANNEL_COUNT];
        for (index, channel) in self.channels.iter_mut().enumerate() {
            let mean_current = self.window.take_mean_current(index);
            ct_phases[index] = channel.close_window(mean_current, self.topology);
        }
        self.window.restart(self.window.window_start());

        Some(WindowReport {
            mean_voltages,
            device_config: DeviceConfig::new(ct_phases),
            snapshot: UiSnapshot::build(
                self.topology,
                &mean_voltages,
                self.frequency,
                &self.channels,
            ),
        })
    }
}

fn to_chrono(interval: Duration) -> chrono::Duration {
    chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::ChannelSample;
    use pretty_assertions::assert_eq;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn frame(v: [f64; 6], channels: Vec<ChannelSample>) -> TelemetryFrame {
        TelemetryFrame {
            voltages: VoltageVector(v),
            channels,
            frequency: Some(50.0),
        }
    }

    #[test]
    fn test_window_closes_on_first_sample_past_interval() {
        let mut e = Engine::new(Duration::from_secs(15), t(0));
        let f = frame([230.0, 230.0, 0.0, 0.0, 0.0, 0.0], vec![]);

        assert!(e.ingest(&f, t(5)).is_none());
        assert!(e.ingest(&f, t(14)).is_none());
        let report = e.ingest(&f, t(15)).expect("window should close");

        assert_eq!(report.mean_voltages.0, [230.0, 230.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(e.topology(), SystemTopology::SinglePhaseL1);
        assert_eq!(e.window().sample_count(), 0);
        assert_eq!(e.window().window_start(), t(15));
        assert_eq!(e.window().voltage_sum().0, [0.0; 6]);
    }

    #[test]
    fn test_bursty_arrival_stretches_window() {
        let mut e = Engine::new(Duration::from_secs(15), t(0));
        let f = frame([0.0; 6], vec![]);
        assert!(e.ingest(&f, t(1)).is_none());
        // Next sample arrives much later; it closes the window containing both.
        let report = e.ingest(&f, t(40)).unwrap();
        assert_eq!(report.snapshot.cts.len(), CHANNEL_COUNT);
        assert_eq!(e.window().window_start(), t(40));
    }

    #[test]
    fn test_close_empty_window_is_noop() {
        let mut e = Engine::new(Duration::from_secs(15), t(0));
        assert!(e.close_window().is_none());
        assert_eq!(e.topology(), SystemTopology::Unknown);
    }

    #[test]
    fn test_absent_channels_keep_instantaneous_power() {
        let mut e = Engine::new(Duration::from_secs(60), t(0));
        let with = frame(
            [0.0; 6],
            vec![ChannelSample {
                id: 5,
                current: 1.0,
                active_power: 300.0,
                apparent_power: 320.0,
            }],
        );
        e.ingest(&with, t(1));
        e.ingest(&frame([0.0; 6], vec![]), t(2));

        let ch = e.channel(5).unwrap();
        assert_eq!(ch.active_power, 300.0);
        assert_eq!(ch.apparent_power, 320.0);
        assert_eq!(e.window().current_sum(4), 1.0);
    }

    #[test]
    fn test_malformed_payload_leaves_state_untouched() {
        let mut e = Engine::new(Duration::from_secs(0), t(0));
        assert!(e.ingest_payload(br#"{"channels": []}"#, t(100)).is_none());
        assert_eq!(e.window().sample_count(), 0);
        assert_eq!(e.window().window_start(), t(0));
    }

    #[test]
    fn test_interval_change_applies_to_next_sample() {
        let mut e = Engine::new(Duration::from_secs(15), t(0));
        let f = frame([0.0; 6], vec![]);
        assert!(e.ingest(&f, t(5)).is_none());
        e.set_interval(Duration::from_secs(5));
        assert_eq!(e.interval(), Duration::from_secs(5));
        assert!(e.ingest(&f, t(6)).is_some());
    }

    #[test]
    fn test_channel_lookup_is_one_based() {
        let e = Engine::new(Duration::from_secs(15), t(0));
        assert!(e.channel(0).is_none());
        assert_eq!(e.channel(1).unwrap().id, 1);
        assert_eq!(e.channel(28).unwrap().id, 28);
        assert!(e.channel(29).is_none());
    }
}
