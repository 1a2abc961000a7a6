//! Parley channel node.
//!
//! Production glue around [`parley_core`]: the system clock and OS entropy,
//! an in-memory identity directory, in-memory or redb-backed sequence
//! counters, and audit sinks that log through tracing and persist to a CBOR
//! file.
//!
//! # Components
//!
//! - [`ChannelService`]: key-exchange manager and envelope validator wired
//!   to shared dependencies
//! - [`Node`]: a service plus its background audit writer
//! - [`SequenceBackend`]: sequence store selected by configuration
//! - [`SystemEnv`]: production environment (wall clock, crypto RNG)
//! - [`demo`]: scripted attack scenarios run by the `parley` binary

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
mod config;
pub mod demo;
mod directory;
mod error;
mod service;
pub mod storage;
mod system_env;

pub use audit::{ForwardingAuditSink, TracingAuditSink, audit_channel, read_audit_log, run_audit_writer};
pub use config::{DEFAULT_AUDIT_BUFFER, NodeConfig};
pub use directory::MemoryDirectory;
pub use error::NodeError;
pub use service::{ChannelService, Node};
pub use storage::{ChaoticSequenceStore, RedbSequenceStore, SequenceBackend, StorageError};
pub use system_env::SystemEnv;
