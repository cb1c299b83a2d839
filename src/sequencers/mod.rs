//! escalating schedules of requested delays
//!
//! a [`PayloadSequencer`] decides *which* delay the next probe asks for; the
//! [`TimingOracle`] decides what the measurement means. The oracle only relies on
//! delays increasing strictly, the step policy is up to the scan rule.
//!
//! [`TimingOracle`]: crate::oracle::TimingOracle
use dyn_clone::DynClone;
use tracing::{error, trace};

use crate::budget::{Budget, BudgetUsage};
use crate::error::BlindTimingError;
use crate::std_ext::named::Named;

mod geometric;
mod linear;

pub use geometric::GeometricSequencer;
pub use linear::LinearSequencer;

/// sleep time used when a rule doesn't configure one, or configures something unusable
pub const DEFAULT_SLEEP_SECONDS: f64 = 5.0;

/// produces a bounded, strictly increasing sequence of requested delays
///
/// implementors only describe their escalation policy through [`PayloadSequencer::escalate`];
/// budget and monotonicity checks are shared by the provided [`PayloadSequencer::next`]
pub trait PayloadSequencer: DynClone + Named + Send + Sync {
    /// the first delay to request
    fn initial(&self) -> f64;

    /// the delay to request after `previous`
    fn escalate(&self, previous: f64) -> f64;

    /// get the next delay to request, or `None` once the budget is exhausted
    ///
    /// the sequence ends when `budget`'s probe limit has been reached, when waiting for the
    /// next delay would push `usage` past the budget's total wait, or when the policy fails
    /// to produce a longer delay than `previous`
    fn next(&mut self, budget: &Budget, usage: &BudgetUsage, previous: Option<f64>) -> Option<f64> {
        let delay = previous.map_or_else(|| self.initial(), |previous| self.escalate(previous));

        if !delay.is_finite() || delay <= 0.0 {
            trace!(delay, "escalation policy produced an unusable delay");
            return None;
        }

        if previous.is_some_and(|previous| delay <= previous) {
            trace!(delay, ?previous, "escalation policy stopped increasing");
            return None;
        }

        if !usage.allows(budget, delay) {
            trace!(
                delay,
                probes_sent = usage.probes_sent(),
                seconds_spent = usage.seconds_spent(),
                "budget exhausted"
            );
            return None;
        }

        Some(delay)
    }
}

impl Clone for Box<dyn PayloadSequencer> {
    fn clone(&self) -> Self {
        dyn_clone::clone_box(&**self)
    }
}

impl std::fmt::Debug for dyn PayloadSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadSequencer")
            .field("name", &self.name())
            .field("initial", &self.initial())
            .finish()
    }
}

// shared validation for sequencer constructors
fn validate_base(base: f64) -> Result<(), BlindTimingError> {
    if !base.is_finite() || base <= 0.0 {
        error!(base, "a sequencer's base delay must be a positive number of seconds");

        return Err(BlindTimingError::InvalidParameter {
            param: base.to_string(),
            message: "base delay must be a positive number of seconds",
        });
    }

    Ok(())
}
