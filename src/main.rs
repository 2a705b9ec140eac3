use chrono::Utc;
use connect_phase_resolver::config::Config;
use connect_phase_resolver::logs;
use connect_phase_resolver::mqtt::{self, EventLoop, MqttEvent};
use connect_phase_resolver::service::Service;
use connect_phase_resolver::AppError;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (forwarder, log_handle) = logs::forwarder(&cfg.app_name);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .with(forwarder)
        .init();
    info!(
        app = %cfg.app_name,
        target = %cfg.resolver.target_device_id,
        interval_secs = cfg.resolver.calculation_interval_secs,
        remote = cfg.remote.is_some(),
        "loaded config"
    );

    let (local, mut local_loop) = mqtt::new(mqtt::build_options(&cfg.mqtt, &cfg.app_name)?);
    log_handle.attach(local.clone());
    let mut service = Service::new(cfg, local, Utc::now());
    let mut remote_loop = service.rebuild_remote()?;
    service.announce(Utc::now()).await?;

    let sig = tokio::signal::ctrl_c();
    tokio::pin!(sig);
    loop {
        tokio::select! {
            biased;
            _ = &mut sig => {
                info!("shutdown requested");
                break;
            }
            res = mqtt::next_event(&mut local_loop) => {
                let outcome = match res {
                    Ok(MqttEvent::Connected) => service.on_local_connected().await,
                    Ok(MqttEvent::Message { topic, payload }) => {
                        service.on_message(&topic, &payload, Utc::now()).await
                    }
                    Err(e) => {
                        warn!("local mqtt error: {e}; reconnecting after short delay");
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                        Ok(())
                    }
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "processing failed for local broker event");
                }
            }
            res = next_remote_event(remote_loop.as_mut()) => {
                let outcome = match res {
                    Ok(MqttEvent::Connected) => service.on_remote_connected().await,
                    Ok(MqttEvent::Message { topic, payload }) => {
                        service.on_message(&topic, &payload, Utc::now()).await
                    }
                    Err(e) => {
                        service.on_remote_error();
                        warn!("remote mqtt error: {e}; reconnecting after short delay");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        Ok(())
                    }
                };
                if let Err(e) = outcome {
                    warn!(error = %e, "processing failed for remote broker event");
                }
            }
        }

        if service.take_remote_reconnect() {
            match service.rebuild_remote() {
                Ok(next) => remote_loop = next,
                Err(e) => warn!(error = %e, "keeping current remote broker link"),
            }
        }
    }

    Ok(())
}

/// Never resolves when no remote broker is configured.
async fn next_remote_event(eventloop: Option<&mut EventLoop>) -> Result<MqttEvent, AppError> {
    match eventloop {
        Some(el) => mqtt::next_event(el).await,
        None => std::future::pending().await,
    }
}
