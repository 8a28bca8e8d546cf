//! Handler builders and associated traits.
//!
//! Builders validate user supplied options, fill in defaults, and return a
//! ready handler. [`AgentHandlerBuilder`] can also be populated from an INI
//! section.

use std::io;

use thiserror::Error;

use crate::{agent_handler::JournalError, handler::Handler};

mod agent_builder;
mod builder_macros;
mod ini_config;

pub use agent_builder::AgentHandlerBuilder;

/// Errors that may occur while building a handler.
#[derive(Debug, Error)]
pub enum HandlerBuildError {
    /// Invalid user supplied configuration.
    #[error("invalid handler configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst reading configuration.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The configuration file is not valid INI.
    #[error("invalid ini configuration: {0}")]
    Ini(#[from] ini::ParseError),
    /// The journal directory could not be prepared.
    #[error(transparent)]
    Journal(#[from] JournalError),
}

/// Trait implemented by all handler builders.
///
/// Builders return boxed [`Handler`] objects so the caller can register
/// them without knowing the concrete handler type.
pub trait HandlerBuilderTrait: Send + Sync {
    /// Build the handler instance.
    fn build_handler(&self) -> Result<Box<dyn Handler>, HandlerBuildError>;
}
