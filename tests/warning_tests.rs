//! Rate-limited warnings observed through the `log` facade.

use std::time::Duration;

use agentlog::{
    AgentHandlerBuilder, Handler, Level, LogRecord, test_utils::closed_port,
};
use logtest::Logger;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use serial_test::serial;

// `Logger::start` installs the global logger, so it may run only once per
// test binary.
static LOGGER: Lazy<Mutex<Logger>> = Lazy::new(|| Mutex::new(Logger::start()));

fn captured() -> MutexGuard<'static, Logger> {
    let mut logger = LOGGER.lock();
    while logger.pop().is_some() {}
    logger
}

fn offline() -> AgentHandlerBuilder {
    AgentHandlerBuilder::new()
        .with_address("127.0.0.1", closed_port())
        .with_host_type("warnings")
        .with_shutdown_timeout(Duration::from_secs(2))
        .with_warn_interval(Duration::from_secs(60))
}

fn warnings_containing(logger: &mut Logger, needle: &str) -> Vec<String> {
    let mut found = Vec::new();
    while let Some(record) = logger.pop() {
        if record.level() == log::Level::Warn && record.args().contains(needle) {
            found.push(record.args().to_owned());
        }
    }
    found
}

#[test]
#[serial]
fn backlog_overflow_warns_once_per_interval() {
    let mut logger = captured();
    let handler = offline().with_max_backlog(1).build().expect("handler");
    for i in 0..4 {
        handler.emit(&LogRecord::new("app", Level::Info, format!("m{i}")));
    }
    assert_eq!(handler.dropped(), 3);
    let warnings = warnings_containing(&mut logger, "backlog full");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("dropped 1 records"), "{}", warnings[0]);
}

#[test]
#[serial]
fn records_after_close_are_summarised() {
    let mut logger = captured();
    let handler = offline().build().expect("handler");
    handler.close();
    while logger.pop().is_some() {}
    for _ in 0..3 {
        handler.emit(&LogRecord::new("app", Level::Info, "late"));
    }
    let warnings = warnings_containing(&mut logger, "after close");
    assert_eq!(warnings, vec!["AgentHandler dropped 1 records after close".to_owned()]);
}
