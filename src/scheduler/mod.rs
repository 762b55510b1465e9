//! Low-precision background task scheduling.
//!
//! Coalesces periodic maintenance work onto one shared repeating timer per
//! distinct interval. Used by client subsystems that need coarse "every N
//! seconds" re-checks without paying for a timer per task.

pub mod low_precision;
pub mod task;

pub use low_precision::LowPrecisionTaskScheduler;
pub use task::TaskRegistration;
