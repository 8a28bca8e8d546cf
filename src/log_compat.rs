//! Compatibility bridge for the Rust `log` crate.
//!
//! [`AgentLogAdapter`] implements `log::Log` and forwards every record to an
//! [`AgentHandler`] as a message entry. Records emitted by this crate's own
//! diagnostics are skipped; shipping them through the handler that produced
//! them would feed connection warnings back into the failing connection.

use std::borrow::Cow;
use std::sync::Arc;

use log::{LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;

use crate::{
    agent_handler::AgentHandler, handler::Handler, level::Level, log_record::LogRecord,
};

const OWN_TARGET: &str = "agentlog";

/// Adapter implementing the Rust `log::Log` trait.
pub struct AgentLogAdapter {
    handler: Arc<AgentHandler>,
    max_level: LevelFilter,
}

impl AgentLogAdapter {
    pub fn new(handler: Arc<AgentHandler>, max_level: LevelFilter) -> Self {
        Self { handler, max_level }
    }
}

/// Turn `a::b::c` module paths into dotted logger names.
pub(crate) fn normalise_target(target: &str) -> Cow<'_, str> {
    if target.contains("::") {
        Cow::Owned(target.replace("::", "."))
    } else {
        Cow::Borrowed(target)
    }
}

/// Whether `target` belongs to this crate's own diagnostics.
pub(crate) fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

impl log::Log for AgentLogAdapter {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level && !is_own_target(metadata.target())
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let logger = normalise_target(record.target());
        self.handler.emit(&LogRecord::new(
            &logger,
            Level::from(record.level()),
            record.args().to_string(),
        ));
    }

    fn flush(&self) {
        self.handler.flush();
    }
}

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Install an adapter for `handler` as the global Rust logger.
///
/// Returns `true` on success and `false` when another global logger is
/// already set. Only the first call has an effect; later calls return the
/// cached outcome.
pub fn install(handler: Arc<AgentHandler>, max_level: LevelFilter) -> bool {
    *INSTALLED.get_or_init(|| {
        let adapter = AgentLogAdapter::new(handler, max_level);
        if log::set_boxed_logger(Box::new(adapter)).is_err() {
            return false;
        }
        log::set_max_level(max_level);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        agent_handler::AgentHandlerConfig,
        test_utils::closed_port,
        transport::TransportConfig,
    };
    use log::Log;
    use rstest::rstest;

    fn offline_handler() -> Arc<AgentHandler> {
        let config = AgentHandlerConfig {
            host_type: Some("log-compat".into()),
            ..AgentHandlerConfig::default()
        }
        .with_transport(TransportConfig::default().with_address("127.0.0.1", closed_port()));
        Arc::new(AgentHandler::with_config(config).expect("handler"))
    }

    #[rstest]
    #[case("my_app::db::pool", "my_app.db.pool")]
    #[case("plain", "plain")]
    #[case("", "")]
    fn normalises_targets(#[case] target: &str, #[case] expected: &str) {
        assert_eq!(normalise_target(target), expected);
    }

    #[rstest]
    #[case("agentlog", true)]
    #[case("agentlog::transport::worker", true)]
    #[case("agentlogger", false)]
    #[case("my_app", false)]
    fn recognises_own_targets(#[case] target: &str, #[case] own: bool) {
        assert_eq!(is_own_target(target), own);
    }

    #[test]
    fn forwards_enabled_records() {
        let handler = offline_handler();
        let adapter = AgentLogAdapter::new(Arc::clone(&handler), LevelFilter::Info);
        let record = |level, target| {
            adapter.log(
                &Record::builder()
                    .args(format_args!("event"))
                    .level(level)
                    .target(target)
                    .build(),
            );
        };
        record(log::Level::Info, "my_app::orders");
        record(log::Level::Debug, "my_app::orders");
        record(log::Level::Warn, "agentlog::transport::worker");
        assert_eq!(handler.backlog().live, 1);
    }
}
