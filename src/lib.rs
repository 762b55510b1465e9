//! Courier client core: coarse-grained background scheduling.
//!
//! The Courier messaging client runs a number of logically independent
//! maintenance jobs (session re-checks, expiry sweeps, state refreshes)
//! that all want "roughly every N seconds" timing. This crate provides the
//! [`LowPrecisionTaskScheduler`] that coalesces every job sharing a repeat
//! interval onto one shared tokio timer, so the number of live timers is
//! bounded by the number of distinct intervals rather than the number of
//! jobs.
//!
//! # Architecture
//!
//! - **Registration**: callers hand the scheduler a [`TaskRegistration`]
//!   keyed by `(key, interval)`; re-registering a key replaces the entry.
//! - **Interval buckets**: all registrations with the same interval share
//!   one repeating timer and fire on its cadence ("low precision").
//! - **Dispatch**: due work is spawned fire-and-forget; a failing task is
//!   logged at the dispatch boundary and never disturbs its siblings or
//!   the timer.
//!
//! Transport, crypto sessions, and message encoding live in sibling crates
//! and only interact with this one through task callbacks.

pub mod error;
pub mod scheduler;

pub use error::{CourierError, Result};
pub use scheduler::{LowPrecisionTaskScheduler, TaskRegistration};
