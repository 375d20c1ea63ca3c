//! vax-lifecycle
//!
//! Order Lifecycle Manager for vaccination orders.
//!
//! Pure deterministic logic. No IO, no wall-clock — callers pass `now` in.
//! The daemon applies an event via [`apply`], persists the returned phase,
//! and executes the returned side-effect descriptors exactly once.

mod state_machine;

pub use state_machine::{
    apply, reconcile_to_completed, Effects, LifecycleEvent, OrderPhase, TransitionError,
    TransitionOutcome,
};

use chrono::{DateTime, Utc};

/// Source of "now" for date guards. Production uses [`SystemClock`]; tests
/// inject a manual clock so "advance past the appointment date" is a method
/// call, not a sleep.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
