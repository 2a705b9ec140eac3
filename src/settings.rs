//! Live settings pushed by the host UI on top of the file configuration.

use crate::config::{Config, MqttConfig, TlsConfig};
use crate::error::{AppError, Result};
use serde_json::Value;
use std::time::Duration;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(crate::config::DEFAULT_INTERVAL_SECS);

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub target_device_id: String,
    pub interval: Duration,
    /// `mqtt://host:port` or `mqtts://host:port`; empty disables the remote broker.
    pub remote_broker_url: String,
    pub remote_broker_username: String,
    pub remote_broker_password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SettingsChange {
    pub target_changed: bool,
    pub interval_changed: bool,
    pub remote_changed: bool,
}

impl RuntimeSettings {
    pub fn from_config(cfg: &Config) -> Self {
        let remote = cfg.remote.as_ref();
        Self {
            target_device_id: cfg.resolver.target_device_id.clone(),
            interval: cfg.resolver.interval(),
            remote_broker_url: remote.map(broker_url).unwrap_or_default(),
            remote_broker_username: remote
                .and_then(|r| r.username.clone())
                .unwrap_or_default(),
            remote_broker_password: remote
                .and_then(|r| r.password.clone())
                .unwrap_or_default(),
        }
    }

    /// Target id, unless it is blank.
    pub fn target(&self) -> Option<&str> {
        if self.target_device_id.trim().is_empty() {
            None
        } else {
            Some(&self.target_device_id)
        }
    }

    /// Topic the target device publishes telemetry on.
    pub fn data_topic(&self) -> Option<String> {
        self.target().map(crate::mqtt::data_topic)
    }

    pub fn config_topic(&self) -> Option<String> {
        self.target().map(crate::mqtt::config_in_topic)
    }

    pub fn is_target_data_topic(&self, topic: &str) -> bool {
        self.data_topic().is_some_and(|t| t == topic)
    }

    /// Merge a JSON settings update published on `config/{app}/set`.
    ///
    /// Each known key is read on its own; unknown keys and values of the
    /// wrong type are skipped. Only a payload that is not a JSON object fails.
    pub fn apply_update(&mut self, payload: &[u8]) -> Result<SettingsChange> {
        let value: Value = serde_json::from_slice(payload)?;
        let Some(update) = value.as_object() else {
            return Err(AppError::Config(
                "settings update must be a JSON object".into(),
            ));
        };
        let mut change = SettingsChange::default();

        if let Some(target) = update.get("target_device_id").and_then(Value::as_str) {
            change.target_changed = target != self.target_device_id;
            self.target_device_id = target.to_string();
        }
        if let Some(raw) = update.get("calculation_interval") {
            let interval = interval_from_value(raw);
            change.interval_changed = interval != self.interval;
            self.interval = interval;
        }

        for (key, field) in [
            ("remote_broker_url", &mut self.remote_broker_url),
            ("remote_broker_username", &mut self.remote_broker_username),
            ("remote_broker_password", &mut self.remote_broker_password),
        ] {
            if let Some(v) = update.get(key).and_then(Value::as_str) {
                let v = if key == "remote_broker_url" { v.trim() } else { v };
                if v != field.as_str() {
                    change.remote_changed = true;
                    *field = v.to_string();
                }
            }
        }
        Ok(change)
    }

    /// Broker settings for the remote link, `None` when no URL is set.
    ///
    /// Keep-alive and session flags come from `base`; so does its TLS setup
    /// when the URL still points at the same host.
    pub fn remote_config(&self, base: Option<&MqttConfig>) -> Result<Option<MqttConfig>> {
        if self.remote_broker_url.is_empty() {
            return Ok(None);
        }
        let (host, port, secure) = parse_broker_url(&self.remote_broker_url)?;
        let same_host = base.is_some_and(|b| b.host == host && b.port == port);
        let tls = match base.filter(|_| same_host).and_then(|b| b.tls.clone()) {
            Some(tls) => Some(tls),
            None if secure => Some(TlsConfig { ca_file: None }),
            None => None,
        };
        Ok(Some(MqttConfig {
            host,
            port,
            username: non_empty(&self.remote_broker_username),
            password: non_empty(&self.remote_broker_password),
            keep_alive_secs: base.and_then(|b| b.keep_alive_secs),
            clean_session: base.and_then(|b| b.clean_session),
            tls,
        }))
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn broker_url(cfg: &MqttConfig) -> String {
    let scheme = if cfg.tls.is_some() || cfg.port == 8883 {
        "mqtts"
    } else {
        "mqtt"
    };
    format!("{scheme}://{}:{}", cfg.host, cfg.port)
}

/// Split `mqtt[s]://host[:port]` into host, port and whether TLS is wanted.
/// A bare `host:port` is treated as plain MQTT.
pub fn parse_broker_url(url: &str) -> Result<(String, u16, bool)> {
    let (secure, rest) = if let Some(rest) = url.strip_prefix("mqtts://") {
        (true, rest)
    } else if let Some(rest) = url.strip_prefix("mqtt://") {
        (false, rest)
    } else if url.contains("://") {
        return Err(AppError::Config(format!("unsupported broker scheme: {url}")));
    } else {
        (false, url)
    };
    let rest = rest.trim_end_matches('/');
    let default_port = if secure { 8883 } else { 1883 };

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| AppError::Config(format!("invalid broker port in {url}")))?;
            (host, port)
        }
        None => (rest, default_port),
    };
    if host.is_empty() {
        return Err(AppError::Config(format!("broker url has no host: {url}")));
    }
    Ok((host.to_string(), port, secure))
}

/// Numbers and numeric strings are accepted; anything else, or a
/// non-positive value, falls back to the default.
fn interval_from_value(raw: &Value) -> Duration {
    let secs = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    secs.map_or(DEFAULT_INTERVAL, interval_from_secs)
}

/// Non-positive or non-finite intervals fall back to the default.
fn interval_from_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_INTERVAL)
}
