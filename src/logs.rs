//! Forwards this service's log events to the host platform on `logs/{app}`.

use crate::mqtt::{AsyncClient, QoS};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Only events from this crate are forwarded; the MQTT client's own
/// events would otherwise feed back into the broker.
const FORWARDED_TARGET: &str = env!("CARGO_CRATE_NAME");

pub fn log_topic(app: &str) -> String {
    format!("logs/{app}")
}

/// Fire-and-forget destination for serialized log records.
pub trait LogSink: Send + Sync {
    fn send(&self, topic: String, payload: Vec<u8>);
}

impl LogSink for AsyncClient {
    fn send(&self, topic: String, payload: Vec<u8>) {
        // Dropped when the request queue is full
        let _ = self.try_publish(topic, QoS::AtMostOnce, false, payload);
    }
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    level: &'a str,
    service: &'a str,
    message: String,
    meta: Map<String, Value>,
    timestamp: String,
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    meta: Map<String, Value>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.meta.insert(field.name().to_string(), value.into());
        }
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.meta.insert(field.name().to_string(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.meta.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.meta.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.meta.insert(field.name().to_string(), value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        if field.name() == "message" {
            self.message = text;
        } else {
            self.meta.insert(field.name().to_string(), text.into());
        }
    }
}

type SharedSink = Arc<OnceLock<Box<dyn LogSink>>>;

/// Tracing layer publishing each event as a JSON record. Events are
/// discarded until a sink is attached through the paired [`LogHandle`].
pub struct LogForwarder {
    app: String,
    topic: String,
    sink: SharedSink,
}

/// Attaches the sink once the broker client exists.
#[derive(Clone)]
pub struct LogHandle {
    sink: SharedSink,
}

impl LogHandle {
    /// Later calls are ignored.
    pub fn attach(&self, sink: impl LogSink + 'static) {
        let _ = self.sink.set(Box::new(sink));
    }
}

pub fn forwarder(app: &str) -> (LogForwarder, LogHandle) {
    let sink: SharedSink = Arc::new(OnceLock::new());
    let layer = LogForwarder {
        app: app.to_string(),
        topic: log_topic(app),
        sink: sink.clone(),
    };
    (layer, LogHandle { sink })
}

impl<S: Subscriber> Layer<S> for LogForwarder {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(sink) = self.sink.get() else {
            return;
        };
        let meta = event.metadata();
        if !meta.target().starts_with(FORWARDED_TARGET) {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let record = LogRecord {
            level: meta.level().as_str(),
            service: &self.app,
            message: visitor.message,
            meta: visitor.meta,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        if let Ok(payload) = serde_json::to_vec(&record) {
            sink.send(self.topic.clone(), payload);
        }
    }
}
