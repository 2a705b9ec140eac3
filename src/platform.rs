//! Host platform conventions: registration, settings schema, and the data
//! envelope used for everything published under `energy/{app}/...`.

use crate::settings::RuntimeSettings;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

pub const REGISTER_TOPIC: &str = "GeniusApps/register";
pub const WRITEBACK_MEASUREMENT: &str = "writeback";
pub const UI_DATA_MEASUREMENT: &str = "ui_data";

pub fn settings_topic(app: &str) -> String {
    format!("config/{app}/set")
}

pub fn schema_topic(app: &str) -> String {
    format!("{app}/settings/schema")
}

pub fn measurement_topic(app: &str, measurement: &str) -> String {
    format!("energy/{app}/{measurement}")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub app_name: String,
    pub developer_id: String,
    pub owner_id: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl Registration {
    pub fn new(app: &str, developer_id: &str, owner_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            app_name: app.to_string(),
            developer_id: developer_id.to_string(),
            owner_id: owner_id.to_string(),
            timestamp: now.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeTags<'a> {
    pub app: &'a str,
}

/// `{measurement, fields, tags: {app}}` wrapper for published data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope<'a, T> {
    pub measurement: &'a str,
    pub fields: &'a T,
    pub tags: EnvelopeTags<'a>,
}

impl<'a, T: Serialize> Envelope<'a, T> {
    pub fn new(app: &'a str, measurement: &'a str, fields: &'a T) -> Self {
        Self {
            measurement,
            fields,
            tags: EnvelopeTags { app },
        }
    }
}

/// Settings form rendered by the host UI; keys match [`crate::settings`] updates.
/// Defaults mirror the settings the service started with, except the password.
pub fn settings_schema(current: &RuntimeSettings) -> Value {
    json!({
        "target_device_id": {
            "type": "string",
            "label": "Target Connect ID (e.g., connect/DEMO_MAC)",
            "default": current.target_device_id
        },
        "calculation_interval": {
            "type": "number",
            "label": "Aggregation Interval (seconds)",
            "default": current.interval.as_secs_f64()
        },
        "remote_broker_url": {
            "type": "string",
            "label": "Remote Broker URL (mqtt://host:port, blank to disable)",
            "default": current.remote_broker_url
        },
        "remote_broker_username": {
            "type": "string",
            "label": "Remote Broker Username",
            "default": current.remote_broker_username
        },
        "remote_broker_password": {
            "type": "password",
            "label": "Remote Broker Password",
            "default": ""
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_topics() {
        assert_eq!(settings_topic("App"), "config/App/set");
        assert_eq!(schema_topic("App"), "App/settings/schema");
        assert_eq!(measurement_topic("App", UI_DATA_MEASUREMENT), "energy/App/ui_data");
    }

    #[test]
    fn test_registration_payload() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let reg = Registration::new("App", "Dev-1", "Owner-1", now);
        assert_eq!(
            serde_json::to_value(&reg).unwrap(),
            json!({
                "appName": "App",
                "developerId": "Dev-1",
                "ownerId": "Owner-1",
                "timestamp": 1_700_000_000_123i64
            })
        );
    }

    #[test]
    fn test_envelope() {
        let fields = json!({"ct_phases": [1, 2]});
        let env = Envelope::new("App", WRITEBACK_MEASUREMENT, &fields);
        assert_eq!(
            serde_json::to_value(&env).unwrap(),
            json!({
                "measurement": "writeback",
                "fields": {"ct_phases": [1, 2]},
                "tags": {"app": "App"}
            })
        );
    }

    #[test]
    fn test_schema_defaults() {
        let current = RuntimeSettings {
            target_device_id: String::new(),
            interval: std::time::Duration::from_secs(15),
            remote_broker_url: "mqtt://device.local:1883".into(),
            remote_broker_username: "dev".into(),
            remote_broker_password: "secret".into(),
        };
        let schema = settings_schema(&current);
        assert_eq!(schema["calculation_interval"]["default"], 15.0);
        assert_eq!(schema["target_device_id"]["default"], "");
        assert_eq!(schema["remote_broker_url"]["default"], "mqtt://device.local:1883");
        assert_eq!(schema["remote_broker_username"]["default"], "dev");
        assert_eq!(schema["remote_broker_password"]["default"], "");
    }
}
