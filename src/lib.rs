//! Reliable, asynchronous shipping of structured log records to a local
//! collector agent.
//!
//! Records handed to an [`AgentHandler`] are flattened into scalar-only
//! maps, optionally journaled to disk, framed as MessagePack and queued in a
//! bounded backlog. A background worker writes the frames over TCP, matches
//! the collector's acknowledgments, and resends anything left
//! unacknowledged, so producers never block on the network.

pub mod agent_handler;
pub mod context;
pub mod flatten;
pub mod handler;
pub mod handlers;
pub mod level;
#[cfg(feature = "log-compat")]
pub mod log_compat;
pub mod log_record;
pub mod metrics;
pub mod rate_limited_warner;
#[cfg(any(test, feature = "test-util"))]
pub mod test_utils;
#[cfg(feature = "tracing-compat")]
pub mod tracing_compat;
pub mod transport;
pub mod value;

pub use agent_handler::{AgentHandler, AgentHandlerConfig, TableMode};
pub use context::{ContextSource, RequestContext, ThreadLocalContext};
pub use handler::{Handler, HandlerError};
pub use handlers::{AgentHandlerBuilder, HandlerBuildError};
pub use level::Level;
#[cfg(feature = "log-compat")]
pub use log_compat::AgentLogAdapter;
pub use log_record::{LogEntry, LogRecord};
pub use metrics::{CountingMetrics, MetricsSink, NoopMetrics, TransportEvent};
#[cfg(feature = "tracing-compat")]
pub use tracing_compat::AgentLayer;
pub use value::{Map, ObjectId, Value};
