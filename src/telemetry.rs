//! Decoding and shape validation of the metering device's telemetry frames.
//!
//! A frame is accepted only when it carries both a `voltages` array and a
//! `channels` array. Anything else is dropped without touching aggregation
//! state. Individual numeric fields are read leniently: missing, null,
//! non-numeric or zero values all count as `0.0`.

use crate::accumulator::VoltageVector;
use crate::channel::CHANNEL_COUNT;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelSample {
    /// 1-based CT channel id.
    pub id: usize,
    pub current: f64,
    pub active_power: f64,
    pub apparent_power: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TelemetryFrame {
    pub voltages: VoltageVector,
    pub channels: Vec<ChannelSample>,
    pub frequency: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    voltages: Option<Vec<Value>>,
    channels: Option<Vec<Value>>,
    #[serde(default)]
    frequency: Option<Value>,
}

impl TelemetryFrame {
    /// Sample for a 1-based channel id. The first entry wins when a frame
    /// repeats an id.
    pub fn channel(&self, id: usize) -> Option<&ChannelSample> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// Decode a raw MQTT payload. Returns `None` for anything that is not a
/// well-shaped telemetry record.
pub fn decode(payload: &[u8]) -> Option<TelemetryFrame> {
    let raw: RawFrame = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "dropping undecodable telemetry frame");
            return None;
        }
    };
    let (Some(voltages), Some(channels)) = (raw.voltages, raw.channels) else {
        debug!("dropping telemetry frame without voltages/channels");
        return None;
    };

    let mut vv = VoltageVector::default();
    for (slot, v) in vv.0.iter_mut().zip(voltages.iter()) {
        *slot = number(v);
    }

    let channels = channels.iter().filter_map(channel_sample).collect();

    Some(TelemetryFrame {
        voltages: vv,
        channels,
        frequency: raw.frequency.as_ref().and_then(Value::as_f64),
    })
}

fn channel_sample(v: &Value) -> Option<ChannelSample> {
    let obj = v.as_object()?;
    let id = obj.get("id").and_then(channel_id)?;
    if !(1..=CHANNEL_COUNT).contains(&id) {
        return None;
    }
    let field = |name: &str| obj.get(name).map(number).unwrap_or(0.0);
    Some(ChannelSample {
        id,
        current: field("current"),
        active_power: field("active_power"),
        apparent_power: field("apparent_power"),
    })
}

/// Integral JSON numbers, including floats such as `3.0`.
fn channel_id(v: &Value) -> Option<usize> {
    if let Some(id) = v.as_u64() {
        return usize::try_from(id).ok();
    }
    let x = v.as_f64()?;
    (x.fract() == 0.0 && (0.0..=u32::MAX as f64).contains(&x)).then_some(x as usize)
}

/// Falsy values (missing, null, 0, -0, NaN, non-numbers) collapse to `0.0`.
fn number(v: &Value) -> f64 {
    match v.as_f64() {
        Some(x) if x != 0.0 && !x.is_nan() => x,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_decode_full_frame() {
        let payload = json!({
            "voltages": [230.1, 229.8, 231.0, 398.0, 399.5, 400.2],
            "channels": [
                {"id": 1, "current": 2.5, "active_power": 550.0, "apparent_power": 575.0},
                {"id": 7, "current": 0.3, "active_power": -60.0, "apparent_power": 70.0}
            ],
            "frequency": 50.02
        });
        let frame = decode(payload.to_string().as_bytes()).unwrap();

        assert_eq!(
            frame.voltages.0,
            [230.1, 229.8, 231.0, 398.0, 399.5, 400.2]
        );
        assert_eq!(frame.channels.len(), 2);
        assert_eq!(frame.channel(7).unwrap().active_power, -60.0);
        assert_eq!(frame.frequency, Some(50.02));
    }

    #[test]
    fn test_decode_rejects_missing_arrays() {
        assert!(decode(br#"{"voltages": [1,2,3,4,5,6]}"#).is_none());
        assert!(decode(br#"{"channels": []}"#).is_none());
        assert!(decode(br#"{"voltages": 230, "channels": []}"#).is_none());
        assert!(decode(b"not json").is_none());
        assert!(decode(b"[1,2,3]").is_none());
    }

    #[test]
    fn test_decode_missing_entries_are_zero() {
        let payload = json!({
            "voltages": [230.0, null, "x"],
            "channels": [
                {"id": 3},
                {"id": 29, "current": 1.0},
                {"id": "4", "current": 1.0},
                "garbage"
            ]
        });
        let frame = decode(payload.to_string().as_bytes()).unwrap();

        assert_eq!(frame.voltages.0, [230.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(
            frame.channels,
            vec![ChannelSample {
                id: 3,
                ..Default::default()
            }]
        );
        assert_eq!(frame.frequency, None);
    }

    #[test]
    fn test_duplicate_channel_id_first_wins() {
        let payload = json!({
            "voltages": [],
            "channels": [
                {"id": 2, "current": 1.0},
                {"id": 2, "current": 9.0}
            ]
        });
        let frame = decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(frame.channel(2).unwrap().current, 1.0);
    }

    #[test]
    fn test_integral_float_channel_id() {
        let payload = json!({
            "voltages": [230.0],
            "channels": [
                {"id": 3.0, "current": 2.0},
                {"id": 4.5, "current": 1.0},
                {"id": 28.0, "current": 0.5},
                {"id": 29.0, "current": 0.5}
            ]
        });
        let frame = decode(payload.to_string().as_bytes()).unwrap();
        let ids: Vec<usize> = frame.channels.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 28]);
        assert_eq!(frame.channel(3).unwrap().current, 2.0);
    }
}
