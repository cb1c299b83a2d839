#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use super::{validate_base, PayloadSequencer, DEFAULT_SLEEP_SECONDS};
use crate::error::BlindTimingError;
use crate::std_ext::named::Named;

/// escalates by multiplying the previous delay by a constant factor
///
/// # Examples
///
/// a base of 1s with a factor of 2 (doubling) requests
///
/// `1s, 2s, 4s, 8s, ...`
///
/// until the budget runs out
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeometricSequencer {
    base: f64,
    factor: f64,
}

impl GeometricSequencer {
    /// create a new `GeometricSequencer` starting at `base` seconds and multiplying by
    /// `factor` per probe
    ///
    /// # Errors
    ///
    /// `base` must be a positive, finite number of seconds and `factor` must be greater
    /// than 1
    #[instrument(level = "trace")]
    pub fn new(base: f64, factor: f64) -> Result<Self, BlindTimingError> {
        validate_base(base)?;

        if !factor.is_finite() || factor <= 1.0 {
            error!(factor, "a geometric factor must be greater than 1");

            return Err(BlindTimingError::InvalidParameter {
                param: factor.to_string(),
                message: "factor must be greater than 1",
            });
        }

        Ok(Self { base, factor })
    }

    /// double the delay on every probe
    ///
    /// # Errors
    ///
    /// `base` must be a positive, finite number of seconds
    pub fn doubling(base: f64) -> Result<Self, BlindTimingError> {
        Self::new(base, 2.0)
    }

    /// the first requested delay
    #[must_use]
    pub const fn base(&self) -> f64 {
        self.base
    }

    /// multiplier applied per probe
    #[must_use]
    pub const fn factor(&self) -> f64 {
        self.factor
    }
}

impl Default for GeometricSequencer {
    fn default() -> Self {
        Self {
            base: DEFAULT_SLEEP_SECONDS,
            factor: 2.0,
        }
    }
}

impl PayloadSequencer for GeometricSequencer {
    fn initial(&self) -> f64 {
        self.base
    }

    fn escalate(&self, previous: f64) -> f64 {
        previous * self.factor
    }
}

impl Named for GeometricSequencer {
    fn name(&self) -> &'static str {
        "GeometricSequencer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{Budget, BudgetUsage};

    /// doubling produces 1, 2, 4, 8 and then runs out of waiting budget
    #[test]
    fn doubling_sequence() {
        let mut sequencer = GeometricSequencer::doubling(1.0).unwrap();
        let budget = Budget::new(10, 15.0).unwrap();
        let mut usage = BudgetUsage::new();

        let mut delays = Vec::new();
        let mut previous = None;

        while let Some(delay) = sequencer.next(&budget, &usage, previous) {
            usage.record_probe(delay);
            delays.push(delay);
            previous = Some(delay);
        }

        // 1 + 2 + 4 + 8 = 15; 16 more won't fit
        assert_eq!(delays, vec![1.0, 2.0, 4.0, 8.0]);
    }

    /// factors that wouldn't escalate are rejected
    #[test]
    fn geometric_sequencer_rejects_bad_factor() {
        assert!(GeometricSequencer::new(1.0, 1.0).is_err());
        assert!(GeometricSequencer::new(1.0, 0.5).is_err());
        assert!(GeometricSequencer::new(-1.0, 2.0).is_err());
        assert_eq!(GeometricSequencer::default().factor(), 2.0);
    }

    /// cloning a boxed sequencer keeps its policy
    #[test]
    fn boxed_sequencer_clones() {
        let boxed: Box<dyn PayloadSequencer> = Box::new(GeometricSequencer::doubling(3.0).unwrap());
        let cloned = boxed.clone();

        assert_eq!(cloned.initial(), 3.0);
        assert_eq!(cloned.escalate(3.0), 6.0);
        assert_eq!(cloned.name(), "GeometricSequencer");
    }
}
