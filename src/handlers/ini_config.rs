//! Populate an [`AgentHandlerBuilder`] from an INI section.
//!
//! ```ini
//! [agent]
//! host = collector.internal
//! port = 8888
//! database = shop
//! default_table = misc
//! backup_dir = /var/log/agent
//! io_timeout = 0.25
//! ```
//!
//! Timeouts are given in (fractional) seconds. Unknown keys are rejected so
//! typos do not silently fall back to defaults.

use std::{fmt::Display, fs, path::Path, str::FromStr, time::Duration};

use ini::Ini;

use crate::level::Level;

use super::{HandlerBuildError, agent_builder::AgentHandlerBuilder};

fn invalid(key: &str, raw: &str, reason: impl Display) -> HandlerBuildError {
    HandlerBuildError::InvalidConfig(format!("{key} = {raw:?}: {reason}"))
}

fn parse<T>(key: &str, raw: &str) -> Result<T, HandlerBuildError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim().parse().map_err(|err| invalid(key, raw, err))
}

fn parse_seconds(key: &str, raw: &str) -> Result<Duration, HandlerBuildError> {
    let seconds: f64 = parse(key, raw)?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| invalid(key, raw, "expected a non-negative number of seconds"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, HandlerBuildError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

impl AgentHandlerBuilder {
    /// Read the options in `section` of the INI file at `path`.
    pub fn from_ini_file(path: impl AsRef<Path>, section: &str) -> Result<Self, HandlerBuildError> {
        let text = fs::read_to_string(path)?;
        Self::from_ini_str(&text, section)
    }

    /// Read the options in `section` of INI formatted `text`.
    pub fn from_ini_str(text: &str, section: &str) -> Result<Self, HandlerBuildError> {
        let ini = Ini::load_from_str(text)?;
        let props = ini.section(Some(section)).ok_or_else(|| {
            HandlerBuildError::InvalidConfig(format!("missing section [{section}]"))
        })?;
        props
            .iter()
            .try_fold(Self::new(), |builder, (key, raw)| builder.apply_ini_option(key, raw))
    }

    fn apply_ini_option(mut self, key: &str, raw: &str) -> Result<Self, HandlerBuildError> {
        let value = raw.trim();
        match key {
            "host" => self.host = Some(value.to_owned()),
            "port" => self.port = Some(parse(key, raw)?),
            "database" => self.database = Some(value.to_owned()),
            "table" => self.table = Some(value.to_owned()),
            "default_table" => return Ok(self.with_default_table(value)),
            "joiner" => return Ok(self.with_joiner(value)),
            "sentinel" => return Ok(self.with_sentinel(value)),
            "backup_dir" if value.is_empty() => self.backup_dir = None,
            "backup_dir" => self.backup_dir = Some(value.into()),
            "max_backlog" => self.max_backlog = Some(parse(key, raw)?),
            "flush_size" => self.flush_size = Some(parse(key, raw)?),
            "agent_timeout" => self.agent_timeout = Some(parse_seconds(key, raw)?),
            "io_timeout" => self.io_timeout = Some(parse_seconds(key, raw)?),
            "connect_timeout" => self.connect_timeout = Some(parse_seconds(key, raw)?),
            "shutdown_timeout" => self.shutdown_timeout = Some(parse_seconds(key, raw)?),
            "level" => self.level = Some(parse::<Level>(key, raw)?),
            "log_acks" => self.log_acks = Some(parse_bool(key, raw)?),
            "host_type" => self.host_type = Some(value.to_owned()),
            _ => {
                return Err(HandlerBuildError::InvalidConfig(format!(
                    "unknown option '{key}'"
                )));
            }
        }
        Ok(self)
    }
}
