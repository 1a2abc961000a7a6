//! Deterministic test harness for the Parley protocol core.
//!
//! - [`SimEnv`]: virtual clock and seeded RNG, so every run of a test
//!   produces the same session ids and timing decisions
//! - [`TestIdentity`]: an identity that holds its private signing key and
//!   can produce correctly (or incorrectly) signed handshake offers
//! - [`RecordingAuditSink`] / [`FailingAuditSink`]: observe audit output or
//!   simulate a broken audit backend

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod identity;
pub mod sim_env;

pub use audit::{FailingAuditSink, RecordingAuditSink};
pub use identity::{StaticDirectory, TestIdentity};
pub use sim_env::SimEnv;
