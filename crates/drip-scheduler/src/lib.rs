//! `drip-scheduler`: per-minute drip email dispatch over SQLite.
//!
//! # Overview
//!
//! Every invocation (one per minute, from an external trigger) walks the
//! active subscriptions and sends each one its next pack step when due.
//! Missed or duplicate invocations are harmless: due-ness is derived from
//! the send log, and a step with a SUCCESS entry is never sent again.
//!
//! # Layers
//!
//! | Component                          | Role                                              |
//! |------------------------------------|---------------------------------------------------|
//! | [`due`]                            | Pure cron/timezone due check                      |
//! | [`guard::IdempotencyGuard`]        | Send-log view; SUCCESS entries block re-delivery  |
//! | [`dispatcher::SubscriptionDispatcher`] | One subscription, one step                    |
//! | [`batch::BatchCoordinator`]        | Bounded concurrent sub-batches, failure isolation |
//! | [`fanout::FanOutController`]       | Local run or chunked fan-out to workers           |
//! | [`store::SqliteStore`]             | `subscriptions` + `send_log` tables               |

pub mod batch;
pub mod db;
pub mod dispatcher;
pub mod due;
pub mod error;
pub mod fanout;
pub mod guard;
pub mod store;

#[cfg(test)]
mod testing;

pub use batch::BatchCoordinator;
pub use dispatcher::{DispatchError, DispatchOutcome, SkipReason, SubscriptionDispatcher};
pub use error::{Result, SchedulerError};
pub use fanout::{FanOutController, FanOutPolicy, WorkerClient};
pub use guard::IdempotencyGuard;
pub use store::SqliteStore;
