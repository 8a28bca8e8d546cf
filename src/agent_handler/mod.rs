//! Handler façade shipping structured records to a collector agent.
//!
//! [`AgentHandler`] resolves the destination table, enriches and flattens
//! each record, optionally journals it to disk, and queues MessagePack
//! frames in the transport backlog. Delivery, acknowledgment, and resend are
//! handled by the [`transport`](crate::transport) module.

mod config;
mod handler;
mod host;
mod journal;
mod table;


pub use config::{
    AgentHandlerConfig, DEFAULT_DATABASE, DEFAULT_FLUSH_SIZE, DEFAULT_JOINER, DEFAULT_LEVEL,
    DEFAULT_SENTINEL, DEFAULT_TABLE, TableMode,
};
pub use handler::{AgentHandler, PROJECT_KEY, TABLE_KEY, TIME_KEY};
pub use host::{host_type, local_hostname};
pub use journal::{Journal, JournalError, journal_path, json_encode};
pub use table::{DYNAMIC_JOURNAL_TABLE, dynamic_table};
