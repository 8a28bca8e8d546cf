//! Bridge from `tracing` events to the agent handler.
//!
//! [`AgentLayer`] is a `tracing_subscriber` layer turning each event into a
//! structured entry: every recorded field becomes a key of the entry, with
//! the formatted event text under `message`. Span data is not captured.

use std::sync::Arc;

use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

use crate::{
    agent_handler::AgentHandler,
    level::Level,
    log_compat::{is_own_target, normalise_target},
    log_record::LogRecord,
    value::{Map, Value},
};

/// Layer forwarding events to an [`AgentHandler`].
#[derive(Clone, Debug)]
pub struct AgentLayer {
    handler: Arc<AgentHandler>,
}

impl AgentLayer {
    pub fn new(handler: Arc<AgentHandler>) -> Self {
        Self { handler }
    }
}

fn map_level(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::TRACE => Level::Trace,
        tracing::Level::DEBUG => Level::Debug,
        tracing::Level::INFO => Level::Info,
        tracing::Level::WARN => Level::Warn,
        tracing::Level::ERROR => Level::Error,
    }
}

#[derive(Default)]
struct FieldCollector(Map);

impl FieldCollector {
    fn insert(&mut self, field: &Field, value: Value) {
        self.0.insert(field.name().to_owned(), value);
    }
}

impl Visit for FieldCollector {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::Float(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::Int(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        let value = i64::try_from(value).map_or_else(|_| Value::Str(value.to_string()), Value::Int);
        self.insert(field, value);
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::Bool(value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.insert(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, Value::Str(format!("{value:?}")));
    }
}

impl<S: Subscriber> Layer<S> for AgentLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) {
            return;
        }
        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        let logger = normalise_target(metadata.target());
        self.handler.emit(&LogRecord::new(
            &logger,
            map_level(metadata.level()),
            fields.0,
        ));
    }
}
