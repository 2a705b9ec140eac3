use crate::config::MqttConfig;
use crate::error::AppError;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type QoS = mqtt5::mqttbytes::QoS;

/// Every metering device publishes telemetry below this filter.
pub const TELEMETRY_FILTER: &str = "connect/+/data";

pub fn data_topic(target: &str) -> String {
    format!("{target}/data")
}

pub fn config_in_topic(target: &str) -> String {
    format!("{target}/config/in")
}

pub fn build_options(cfg: &MqttConfig, client_prefix: &str) -> Result<MqttOptions, AppError> {
    let client_id = format!("{}-{}", client_prefix, Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    match cfg.tls.as_ref().and_then(|t| t.ca_file.as_ref()) {
        Some(ca_file) => {
            let ca = std::fs::read(ca_file)?;
            opts.set_transport(Transport::tls(ca, None, None));
        }
        None if cfg.tls.is_some() || cfg.port == 8883 => {
            opts.set_transport(Transport::tls_with_default_config());
        }
        None => {}
    }
    Ok(opts)
}

pub fn new(options: MqttOptions) -> (AsyncClient, EventLoop) {
    mqtt5::AsyncClient::new(options, 50)
}

#[derive(Debug, Clone, PartialEq)]
pub enum MqttEvent {
    /// Broker acknowledged the (re)connection; subscriptions must be renewed.
    Connected,
    Message { topic: String, payload: Vec<u8> },
}

pub async fn next_event(eventloop: &mut EventLoop) -> Result<MqttEvent, AppError> {
    loop {
        match eventloop.poll().await {
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(_))) => {
                return Ok(MqttEvent::Connected)
            }
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(p))) => {
                match std::str::from_utf8(&p.topic) {
                    Ok(topic) => {
                        return Ok(MqttEvent::Message {
                            topic: topic.to_string(),
                            payload: p.payload.to_vec(),
                        })
                    }
                    Err(_) => {
                        warn!(topic_bytes = ?p.topic, "non-utf8 topic; skipping message");
                        continue;
                    }
                }
            }
            Ok(_) => continue,
            Err(e) => return Err(AppError::Mqtt(e.to_string())),
        }
    }
}

pub async fn subscribe(client: &AsyncClient, topic: &str) -> Result<(), AppError> {
    client
        .subscribe(topic.to_string(), QoS::AtLeastOnce)
        .await
        .map_err(|e| AppError::Mqtt(e.to_string()))
}

pub async fn publish_json<T: Serialize>(
    client: &AsyncClient,
    topic: &str,
    payload: &T,
    retain: bool,
) -> Result<(), AppError> {
    let bytes = serde_json::to_vec(payload)?;
    client
        .publish(topic.to_string(), QoS::AtLeastOnce, retain, bytes)
        .await
        .map_err(|e| AppError::Mqtt(e.to_string()))
}

/// True for `connect/{device}/data`, the topics [`TELEMETRY_FILTER`] covers.
pub fn is_telemetry_topic(topic: &str) -> bool {
    topic
        .strip_prefix("connect/")
        .and_then(|rest| rest.strip_suffix("/data"))
        .is_some_and(|device| !device.is_empty() && !device.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_telemetry_topic() {
        assert!(is_telemetry_topic("connect/58:BF:25:DA:00:01/data"));
        assert!(!is_telemetry_topic("connect/58:BF/config/in"));
        assert!(!is_telemetry_topic("connect/data"));
        assert!(!is_telemetry_topic("connect//data"));
        assert!(!is_telemetry_topic("connect/a/b/data"));
        assert!(!is_telemetry_topic("energy/App/ui_data"));
    }

    #[test]
    fn test_device_topics() {
        assert_eq!(data_topic("connect/AA"), "connect/AA/data");
        assert_eq!(config_in_topic("connect/AA"), "connect/AA/config/in");
    }

    #[test]
    fn test_build_options_plain() {
        let cfg = MqttConfig {
            host: "localhost".into(),
            port: 1883,
            username: Some("admin".into()),
            password: Some("secret".into()),
            keep_alive_secs: Some(10),
            clean_session: None,
            tls: None,
        };
        let opts = build_options(&cfg, "resolver").unwrap();
        assert_eq!(opts.keep_alive(), Duration::from_secs(10));
        assert!(opts.client_id().starts_with("resolver-"));
    }
}
