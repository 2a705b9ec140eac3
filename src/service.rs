//! Glue between the brokers and the engine: routes incoming messages,
//! applies settings updates and publishes window reports.

use crate::config::Config;
use crate::engine::{Engine, WindowReport};
use crate::error::AppError;
use crate::mqtt::{self, AsyncClient, EventLoop, TELEMETRY_FILTER};
use crate::platform::{self, Envelope, Registration};
use crate::settings::RuntimeSettings;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Telemetry,
    Settings,
    Ignore,
}

/// Decide what an incoming message is, given the live settings.
pub fn route(app: &str, settings: &RuntimeSettings, topic: &str) -> Route {
    if topic == platform::settings_topic(app) {
        Route::Settings
    } else if settings.is_target_data_topic(topic) {
        Route::Telemetry
    } else {
        if mqtt::is_telemetry_topic(topic) {
            debug!(topic = %topic, "ignoring telemetry from non-target device");
        }
        Route::Ignore
    }
}

/// Optional direct connection to the metering device's broker.
pub struct RemoteLink {
    pub client: AsyncClient,
    pub connected: bool,
}

pub struct Service {
    cfg: Config,
    settings: RuntimeSettings,
    engine: Engine,
    local: AsyncClient,
    remote: Option<RemoteLink>,
    /// Set when the remote broker settings changed and the link must be rebuilt.
    remote_reconnect: bool,
}

impl Service {
    /// The remote link starts down; call [`Service::rebuild_remote`] to bring it up.
    pub fn new(cfg: Config, local: AsyncClient, now: DateTime<Utc>) -> Self {
        let settings = RuntimeSettings::from_config(&cfg);
        let engine = Engine::new(settings.interval, now);
        Self {
            cfg,
            settings,
            engine,
            local,
            remote: None,
            remote_reconnect: false,
        }
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Publish the settings schema and the registration request.
    pub async fn announce(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        let app = &self.cfg.app_name;
        mqtt::publish_json(
            &self.local,
            &platform::schema_topic(app),
            &platform::settings_schema(&self.settings),
            true,
        )
        .await?;
        let reg = Registration::new(app, &self.cfg.developer_id, &self.cfg.owner_id, now);
        mqtt::publish_json(&self.local, platform::REGISTER_TOPIC, &reg, false).await?;
        info!(app = %app, "registration request sent");
        Ok(())
    }

    pub async fn on_local_connected(&self) -> Result<(), AppError> {
        info!("connected to local broker");
        mqtt::subscribe(&self.local, TELEMETRY_FILTER).await?;
        mqtt::subscribe(&self.local, &platform::settings_topic(&self.cfg.app_name)).await?;
        if let Some(topic) = self.settings.data_topic() {
            mqtt::subscribe(&self.local, &topic).await?;
            info!(topic = %topic, "subscribed to target telemetry");
        }
        Ok(())
    }

    pub async fn on_remote_connected(&mut self) -> Result<(), AppError> {
        let Some(remote) = self.remote.as_mut() else {
            return Ok(());
        };
        remote.connected = true;
        info!("connected to remote broker");
        if let Some(topic) = self.settings.data_topic() {
            mqtt::subscribe(&remote.client, &topic).await?;
            info!(topic = %topic, "subscribed to remote target telemetry");
        }
        Ok(())
    }

    /// Returns and clears the pending remote rebuild request.
    pub fn take_remote_reconnect(&mut self) -> bool {
        std::mem::take(&mut self.remote_reconnect)
    }

    /// Replace the remote link with one built from the live settings.
    ///
    /// The returned event loop must be polled by the caller; `None` means the
    /// remote broker is now disabled. On error the current link is kept.
    pub fn rebuild_remote(&mut self) -> Result<Option<EventLoop>, AppError> {
        let next = match self.settings.remote_config(self.cfg.remote.as_ref())? {
            Some(remote_cfg) => {
                let opts = mqtt::build_options(&remote_cfg, &self.cfg.app_name)?;
                Some((remote_cfg, opts))
            }
            None => None,
        };
        if let Some(old) = self.remote.take() {
            if let Err(e) = old.client.try_disconnect() {
                debug!(error = %e, "old remote client already gone");
            }
        }
        let Some((remote_cfg, opts)) = next else {
            debug!("no remote broker configured");
            return Ok(None);
        };
        let (client, eventloop) = mqtt::new(opts);
        info!(host = %remote_cfg.host, port = remote_cfg.port, "connecting to remote broker");
        self.remote = Some(RemoteLink {
            client,
            connected: false,
        });
        Ok(Some(eventloop))
    }

    pub fn on_remote_error(&mut self) {
        if let Some(remote) = self.remote.as_mut() {
            remote.connected = false;
        }
    }

    pub async fn on_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match route(&self.cfg.app_name, &self.settings, topic) {
            Route::Settings => self.apply_settings(payload).await,
            Route::Telemetry => match self.engine.ingest_payload(payload, now) {
                Some(report) => self.publish_report(&report).await,
                None => Ok(()),
            },
            Route::Ignore => Ok(()),
        }
    }

    async fn apply_settings(&mut self, payload: &[u8]) -> Result<(), AppError> {
        let change = self.settings.apply_update(payload)?;
        info!(
            target_device_id = %self.settings.target_device_id,
            interval_secs = self.settings.interval.as_secs_f64(),
            "settings updated"
        );
        if change.interval_changed {
            self.engine.set_interval(self.settings.interval);
        }
        if change.remote_changed {
            info!(url = %self.settings.remote_broker_url, "remote broker settings changed");
            self.remote_reconnect = true;
        }
        if change.target_changed {
            if let Some(topic) = self.settings.data_topic() {
                mqtt::subscribe(&self.local, &topic).await?;
                if let Some(remote) = self.remote.as_ref().filter(|r| r.connected) {
                    mqtt::subscribe(&remote.client, &topic).await?;
                }
                info!(topic = %topic, "subscribed to new target telemetry");
            }
        }
        Ok(())
    }

    async fn publish_report(&self, report: &WindowReport) -> Result<(), AppError> {
        let app = &self.cfg.app_name;

        if let Some(config_topic) = self.settings.config_topic() {
            let writeback = Envelope::new(
                app,
                platform::WRITEBACK_MEASUREMENT,
                &report.device_config,
            );
            mqtt::publish_json(
                &self.local,
                &platform::measurement_topic(app, platform::WRITEBACK_MEASUREMENT),
                &writeback,
                false,
            )
            .await?;

            match self.remote.as_ref().filter(|r| r.connected) {
                Some(remote) => {
                    mqtt::publish_json(&remote.client, &config_topic, &report.device_config, false)
                        .await?;
                    info!(topic = %config_topic, "sent CT configuration to remote broker");
                }
                None => {
                    mqtt::publish_json(&self.local, &config_topic, &report.device_config, false)
                        .await?;
                    info!(topic = %config_topic, "sent CT configuration to local broker");
                }
            }
        } else {
            debug!("no target device configured; skipping CT configuration writeback");
        }

        let ui = Envelope::new(app, platform::UI_DATA_MEASUREMENT, &report.snapshot);
        mqtt::publish_json(
            &self.local,
            &platform::measurement_topic(app, platform::UI_DATA_MEASUREMENT),
            &ui,
            false,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn settings(target: &str) -> RuntimeSettings {
        RuntimeSettings {
            target_device_id: target.into(),
            interval: Duration::from_secs(15),
            remote_broker_url: String::new(),
            remote_broker_username: String::new(),
            remote_broker_password: String::new(),
        }
    }

    fn service() -> (Service, EventLoop) {
        let cfg: Config = serde_yaml::from_str(
            r#"
app_name: App
mqtt:
  host: localhost
  port: 1883
resolver:
  target_device_id: connect/AA
"#,
        )
        .unwrap();
        let (local, local_loop) = mqtt::new(mqtt::build_options(&cfg.mqtt, "test").unwrap());
        (Service::new(cfg, local, Utc::now()), local_loop)
    }

    #[test]
    fn test_route_settings_topic() {
        let s = settings("connect/AA");
        assert_eq!(route("App", &s, "config/App/set"), Route::Settings);
        assert_eq!(route("App", &s, "config/Other/set"), Route::Ignore);
    }

    #[test]
    fn test_route_target_telemetry_only() {
        let s = settings("connect/AA");
        assert_eq!(route("App", &s, "connect/AA/data"), Route::Telemetry);
        assert_eq!(route("App", &s, "connect/BB/data"), Route::Ignore);
        assert_eq!(route("App", &settings(""), "connect/AA/data"), Route::Ignore);
    }

    #[tokio::test]
    async fn test_settings_message_updates_engine() {
        let (mut service, _local_loop) = service();
        assert_eq!(service.engine().interval(), Duration::from_secs(15));

        let payload = br#"{"target_device_id": "connect/BB", "calculation_interval": "30"}"#;
        service
            .on_message("config/App/set", payload, Utc::now())
            .await
            .unwrap();

        assert_eq!(service.settings().target_device_id, "connect/BB");
        assert_eq!(service.settings().interval, Duration::from_secs(30));
        assert_eq!(service.engine().interval(), Duration::from_secs(30));
        assert!(!service.take_remote_reconnect());
    }

    #[tokio::test]
    async fn test_old_target_telemetry_is_ignored_after_switch() {
        let (mut service, _local_loop) = service();
        service
            .on_message(
                "config/App/set",
                br#"{"target_device_id": "connect/BB"}"#,
                Utc::now(),
            )
            .await
            .unwrap();

        let frame = br#"{"voltages": [230, 0, 0, 0, 0, 0], "channels": [{"id": 1, "current": 2}]}"#;
        service
            .on_message("connect/AA/data", frame, Utc::now())
            .await
            .unwrap();
        assert_eq!(service.engine().window().sample_count(), 0);

        service
            .on_message("connect/BB/data", frame, Utc::now())
            .await
            .unwrap();
        assert_eq!(service.engine().window().sample_count(), 1);
    }

    #[tokio::test]
    async fn test_remote_broker_rebuilt_on_settings_change() {
        let (mut service, _local_loop) = service();
        service
            .on_message(
                "config/App/set",
                br#"{"remote_broker_url": "mqtt://device.local:1884", "remote_broker_username": "dev"}"#,
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(service.settings().remote_broker_url, "mqtt://device.local:1884");
        assert!(service.take_remote_reconnect());
        assert!(!service.take_remote_reconnect());

        let eventloop = service.rebuild_remote().unwrap();
        assert!(eventloop.is_some());
        assert!(service.remote.as_ref().is_some_and(|r| !r.connected));

        service
            .on_message("config/App/set", br#"{"remote_broker_url": ""}"#, Utc::now())
            .await
            .unwrap();
        assert!(service.take_remote_reconnect());
        assert!(service.rebuild_remote().unwrap().is_none());
        assert!(service.remote.is_none());
    }

    #[tokio::test]
    async fn test_bad_remote_url_keeps_current_link() {
        let (mut service, _local_loop) = service();
        service
            .on_message(
                "config/App/set",
                br#"{"remote_broker_url": "mqtt://device.local"}"#,
                Utc::now(),
            )
            .await
            .unwrap();
        let _remote_loop = service.rebuild_remote().unwrap();

        service
            .on_message(
                "config/App/set",
                br#"{"remote_broker_url": "ws://device.local"}"#,
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(service.take_remote_reconnect());
        assert!(service.rebuild_remote().is_err());
        assert!(service.remote.is_some());
    }
}
