//! `drip-core`: shared types for the drip delivery service.
//!
//! Holds the domain model (subscriptions, send-log entries, step
//! descriptors), the fan-out wire contract, the collaborator traits the
//! scheduler consumes, configuration loading and the error taxonomy.

pub mod config;
pub mod error;
pub mod ports;
pub mod types;
pub mod wire;

pub use error::{DripError, Result};
