#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use super::{validate_base, PayloadSequencer, DEFAULT_SLEEP_SECONDS};
use crate::error::BlindTimingError;
use crate::std_ext::named::Named;

/// escalates by a fixed number of seconds per probe
///
/// # Examples
///
/// with a base of 5s and a step of 5s, the requested delays are
///
/// `5s, 10s, 15s, 20s, ...`
///
/// until the budget runs out
///
/// ```
/// use blindtiming::budget::{Budget, BudgetUsage};
/// use blindtiming::sequencers::{LinearSequencer, PayloadSequencer};
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut sequencer = LinearSequencer::new(5.0, 5.0)?;
/// let budget = Budget::new(3, 100.0)?;
/// let usage = BudgetUsage::new();
///
/// assert_eq!(sequencer.next(&budget, &usage, None), Some(5.0));
/// assert_eq!(sequencer.next(&budget, &usage, Some(5.0)), Some(10.0));
/// # Ok(())
/// # }
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearSequencer {
    base: f64,
    step: f64,
}

impl LinearSequencer {
    /// create a new `LinearSequencer` starting at `base` seconds and adding `step`
    /// seconds per probe
    ///
    /// # Errors
    ///
    /// both `base` and `step` must be positive, finite numbers of seconds
    #[instrument(level = "trace")]
    pub fn new(base: f64, step: f64) -> Result<Self, BlindTimingError> {
        validate_base(base)?;

        if !step.is_finite() || step <= 0.0 {
            error!(step, "a linear step must be a positive number of seconds");

            return Err(BlindTimingError::InvalidParameter {
                param: step.to_string(),
                message: "step must be a positive number of seconds",
            });
        }

        Ok(Self { base, step })
    }

    /// escalate by the base delay itself, i.e. `base, 2*base, 3*base, ...`
    ///
    /// # Errors
    ///
    /// `base` must be a positive, finite number of seconds
    pub fn with_base(base: f64) -> Result<Self, BlindTimingError> {
        Self::new(base, base)
    }

    /// the first requested delay
    #[must_use]
    pub const fn base(&self) -> f64 {
        self.base
    }

    /// seconds added per probe
    #[must_use]
    pub const fn step(&self) -> f64 {
        self.step
    }
}

impl Default for LinearSequencer {
    fn default() -> Self {
        Self {
            base: DEFAULT_SLEEP_SECONDS,
            step: DEFAULT_SLEEP_SECONDS,
        }
    }
}

impl PayloadSequencer for LinearSequencer {
    fn initial(&self) -> f64 {
        self.base
    }

    fn escalate(&self, previous: f64) -> f64 {
        previous + self.step
    }
}

impl Named for LinearSequencer {
    fn name(&self) -> &'static str {
        "LinearSequencer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{Budget, BudgetUsage};

    /// sub-second steps, like +300ms, are allowed
    #[test]
    fn linear_sequence_with_fractional_step() {
        let mut sequencer = LinearSequencer::new(1.0, 0.3).unwrap();
        let budget = Budget::new(10, 100.0).unwrap();
        let usage = BudgetUsage::new();

        let mut delays = Vec::new();
        let mut previous = None;

        for _ in 0..4 {
            let delay = sequencer.next(&budget, &usage, previous).unwrap();
            delays.push(delay);
            previous = Some(delay);
        }

        let expected = [1.0, 1.3, 1.6, 1.9];
        for (delay, expected) in delays.iter().zip(expected) {
            assert!((delay - expected).abs() < 1e-9);
        }
    }

    /// a sequence stops once waiting for the next delay would exceed the budget
    #[test]
    fn linear_sequence_respects_total_wait() {
        let mut sequencer = LinearSequencer::with_base(5.0).unwrap();
        let budget = Budget::new(10, 20.0).unwrap();
        let mut usage = BudgetUsage::new();

        let first = sequencer.next(&budget, &usage, None).unwrap();
        usage.record_probe(first);

        let second = sequencer.next(&budget, &usage, Some(first)).unwrap();
        usage.record_probe(second);

        // 5 + 10 spent, 15 more would make 30 > 20
        assert_eq!(sequencer.next(&budget, &usage, Some(second)), None);
    }

    /// a sequence stops once the probe limit is reached
    #[test]
    fn linear_sequence_respects_probe_limit() {
        let mut sequencer = LinearSequencer::default();
        let budget = Budget::new(1, 1000.0).unwrap();
        let mut usage = BudgetUsage::new();

        let first = sequencer.next(&budget, &usage, None).unwrap();
        assert_eq!(first, DEFAULT_SLEEP_SECONDS);
        usage.record_probe(first);

        assert_eq!(sequencer.next(&budget, &usage, Some(first)), None);
    }

    /// zero, negative, and non-finite parameters are rejected
    #[test]
    fn linear_sequencer_rejects_bad_parameters() {
        assert!(LinearSequencer::new(0.0, 1.0).is_err());
        assert!(LinearSequencer::new(5.0, 0.0).is_err());
        assert!(LinearSequencer::new(5.0, -1.0).is_err());
        assert!(LinearSequencer::new(f64::NAN, 1.0).is_err());
    }
}
