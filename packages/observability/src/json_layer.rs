//! Layer that renders each tracing event as one JSON line.
//!
//! Relay identity fields (`local_id`, `session_id`) are lifted out of the
//! field map to the top level so a single client's history can be pulled
//! out with `jq 'select(.local_id == "...")'`.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Field names promoted to top-level keys.
const IDENTITY_FIELDS: [&str; 2] = ["local_id", "session_id"];

/// One rendered log line.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub ts: String,
    pub level: &'static str,
    pub service: String,
    pub pid: u32,
    pub target: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Remaining event fields, sorted by name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    /// Innermost span the event was recorded in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

#[derive(Default)]
struct EntryFields {
    msg: Option<String>,
    values: BTreeMap<String, Value>,
}

impl EntryFields {
    fn put(&mut self, field: &Field, value: Value) {
        match (field.name(), value) {
            ("message", Value::String(s)) => self.msg = Some(s),
            ("message", other) => self.msg = Some(other.to_string()),
            (name, value) => {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    fn take_identity(&mut self, name: &str) -> Option<String> {
        self.values.remove(name).map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

impl Visit for EntryFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Writes one [`LogEntry`] per event through `make_writer`.
pub struct JsonLayer<W> {
    service: String,
    pid: u32,
    make_writer: W,
}

impl<W> JsonLayer<W> {
    pub fn new(service: impl Into<String>, make_writer: W) -> Self {
        Self {
            service: service.into(),
            pid: std::process::id(),
            make_writer,
        }
    }

    fn entry<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogEntry
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let mut fields = EntryFields::default();
        event.record(&mut fields);

        let [local_key, session_key] = IDENTITY_FIELDS;
        let meta = event.metadata();
        LogEntry {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            level: meta.level().as_str(),
            service: self.service.clone(),
            pid: self.pid,
            target: meta.target().to_string(),
            local_id: fields.take_identity(local_key),
            session_id: fields.take_identity(session_key),
            msg: fields.msg.take().unwrap_or_default(),
            fields: fields.values,
            span: ctx.event_span(event).map(|span| span.name().to_string()),
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let entry = self.entry(event, &ctx);
        let Ok(mut line) = serde_json::to_vec(&entry) else {
            return;
        };
        line.push(b'\n');
        // A dropped log line is not worth failing the event over.
        let _ = self.make_writer.make_writer().write_all(&line);
    }
}
