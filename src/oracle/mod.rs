//! the [`TimingOracle`] decides whether a target's latency follows the delays its payloads
//! request
//!
//! a run sends probes with strictly increasing requested delays and confirms only when a
//! streak of consecutive probes is both *consistent* (each observed elapsed time is within
//! [`Tolerance`] of its requested delay) and *increasing* (each took longer than the last).
//! A single slow response never confirms anything.
//!
//! with a control sender, every injected probe is preceded by a control probe that requests
//! no delay. A streak then also has to outgrow whatever the control series did over the
//! same interval, which rejects servers that are just getting slower on their own.
//!
//! # Examples
//!
//! ```
//! use blindtiming::prelude::*;
//!
//! let oracle = TimingOracle::builder()
//!     .tolerance(Tolerance::new(0.8, None)?)
//!     .build()?;
//!
//! // a target that sleeps exactly as long as asked, plus a bit of network latency
//! let verdict = oracle.verify(&mut |delay: f64| Ok::<_, BlindTimingError>(delay + 0.05))?;
//!
//! assert!(verdict.is_confirmed());
//! assert_eq!(verdict.probes_sent(), 2);
//! # Ok::<(), BlindTimingError>(())
//! ```
use std::sync::{Arc, RwLock};

use cfg_if::cfg_if;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::budget::{AlertThreshold, AttackStrength, Budget, BudgetUsage};
use crate::cancellation::Cancellation;
use crate::config::RuleConfig;
use crate::dialects::Dialect;
use crate::error::BlindTimingError;
use crate::events::Publisher;
use crate::sequencers::{LinearSequencer, PayloadSequencer};

mod blocking;
mod regression;
mod verification;

cfg_if! {
    if #[cfg(feature = "async")] {
        mod async_oracle;
    }
}

pub use self::regression::{
    RegressionCheck, DEFAULT_CORRELATION_ERROR_RANGE, DEFAULT_SLOPE_ERROR_RANGE,
};

/// lower tolerance used when none is configured
pub const DEFAULT_LOWER_TOLERANCE: f64 = 0.8;

/// multiplicative bounds around the requested delay that an observed elapsed time must
/// fall within to be consistent with injection
///
/// `observed >= requested * lower`, and `observed <= requested * upper` when an upper
/// bound is configured
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "UncheckedTolerance")
)]
pub struct Tolerance {
    lower: f64,
    upper: Option<f64>,
}

// deserialized bounds, validated by `Tolerance::new` before use
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct UncheckedTolerance {
    lower: f64,
    upper: Option<f64>,
}

#[cfg(feature = "serde")]
impl TryFrom<UncheckedTolerance> for Tolerance {
    type Error = BlindTimingError;

    fn try_from(unchecked: UncheckedTolerance) -> Result<Self, Self::Error> {
        Self::new(unchecked.lower, unchecked.upper)
    }
}

impl Tolerance {
    /// create a new `Tolerance`
    ///
    /// # Errors
    ///
    /// `lower` must be a positive, finite number; `upper`, if given, must be finite and
    /// larger than `lower`
    pub fn new(lower: f64, upper: Option<f64>) -> Result<Self, BlindTimingError> {
        if !lower.is_finite() || lower <= 0.0 {
            error!(lower, "lower tolerance must be positive");

            return Err(BlindTimingError::InvalidParameter {
                param: lower.to_string(),
                message: "lower tolerance must be a positive, finite number",
            });
        }

        if let Some(upper) = upper {
            if !upper.is_finite() || upper <= lower {
                error!(lower, upper, "upper tolerance must exceed the lower tolerance");

                return Err(BlindTimingError::InvalidParameter {
                    param: upper.to_string(),
                    message: "upper tolerance must be finite and larger than the lower tolerance",
                });
            }
        }

        Ok(Self { lower, upper })
    }

    /// the lower multiplicative bound
    #[must_use]
    pub const fn lower(&self) -> f64 {
        self.lower
    }

    /// the upper multiplicative bound, if any
    #[must_use]
    pub const fn upper(&self) -> Option<f64> {
        self.upper
    }

    /// true if `observed` seconds is consistent with a requested delay of `requested` seconds
    #[must_use]
    pub fn accepts(&self, requested: f64, observed: f64) -> bool {
        observed >= requested * self.lower
            && self.upper.map_or(true, |upper| observed <= requested * upper)
    }
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            lower: DEFAULT_LOWER_TOLERANCE,
            upper: None,
        }
    }
}

/// a configured timing oracle; see the [module documentation](self)
///
/// one oracle can serve any number of concurrent runs. Each run clones the sequencer and
/// owns its own probe series and budget usage; the oracle itself is only read.
#[derive(Debug, Clone)]
pub struct TimingOracle {
    tolerance: Tolerance,
    budget: Budget,
    threshold: AlertThreshold,
    sequencer: Box<dyn PayloadSequencer>,
    regression: Option<RegressionCheck>,
    baseline_check: bool,
    cancellation: Cancellation,
    events: Arc<RwLock<Publisher>>,
}

impl TimingOracle {
    /// start building a `TimingOracle`
    #[must_use]
    pub fn builder() -> TimingOracleBuilder {
        TimingOracleBuilder::new()
    }

    /// configure an oracle for `dialect` from a scan rule's configuration
    ///
    /// the sleep time seeds the dialect's escalation policy, the attack strength picks the
    /// budget from the default [`StrengthTable`], and the alert threshold sets the streak
    /// length. The dialect's [`RegressionCheck`] is used if it has one; otherwise `Insane`
    /// strength turns on the default check.
    ///
    /// [`StrengthTable`]: crate::budget::StrengthTable
    ///
    /// # Errors
    ///
    /// fails if the configured strength or threshold isn't recognized, or if the strength's
    /// budget can't afford a confirming streak at the configured sleep time
    ///
    /// # Examples
    ///
    /// ```
    /// use blindtiming::prelude::*;
    ///
    /// let config = RuleConfig::new()
    ///     .with("rules.common.sleep", "3")
    ///     .with("rules.attack.strength", "high");
    ///
    /// let oracle = TimingOracle::for_dialect(&Dialect::mysql(), &config)?;
    ///
    /// assert_eq!(oracle.budget().max_probes(), 6);
    /// # Ok::<(), BlindTimingError>(())
    /// ```
    #[instrument(skip_all, level = "trace")]
    pub fn for_dialect(dialect: &Dialect, config: &RuleConfig) -> Result<Self, BlindTimingError> {
        let strength = config.attack_strength()?;

        let mut builder = Self::builder()
            .tolerance(dialect.tolerance())
            .budget(Budget::for_strength(strength))
            .alert_threshold(config.alert_threshold()?)
            .boxed_sequencer(dialect.sequencer(config.sleep_time())?);

        if let Some(check) = dialect.regression_check() {
            builder = builder.regression_check(check);
        } else if strength == AttackStrength::Insane {
            builder = builder.regression_check(RegressionCheck::default());
        }

        builder.build()
    }

    /// the acceptance bounds
    #[must_use]
    pub const fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// the per-run budget
    #[must_use]
    pub const fn budget(&self) -> Budget {
        self.budget
    }

    /// how long a streak must be to confirm
    #[must_use]
    pub const fn alert_threshold(&self) -> AlertThreshold {
        self.threshold
    }

    /// the regression check, if enabled
    #[must_use]
    pub const fn regression_check(&self) -> Option<RegressionCheck> {
        self.regression
    }

    /// the token that stops this oracle's runs
    #[must_use]
    pub const fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    /// the oracle's event publisher
    #[must_use]
    pub fn events(&self) -> Arc<RwLock<Publisher>> {
        self.events.clone()
    }
}

/// builder for a [`TimingOracle`]; every setting has a default
#[derive(Debug, Clone)]
pub struct TimingOracleBuilder {
    tolerance: Tolerance,
    budget: Budget,
    threshold: AlertThreshold,
    sequencer: Option<Box<dyn PayloadSequencer>>,
    regression: Option<RegressionCheck>,
    baseline_check: bool,
    cancellation: Cancellation,
    events: Option<Arc<RwLock<Publisher>>>,
}

impl Default for TimingOracleBuilder {
    fn default() -> Self {
        Self {
            tolerance: Tolerance::default(),
            budget: Budget::default(),
            threshold: AlertThreshold::default(),
            sequencer: None,
            regression: None,
            baseline_check: true,
            cancellation: Cancellation::new(),
            events: None,
        }
    }
}

impl TimingOracleBuilder {
    /// create a builder with the default settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// acceptance bounds; defaults to a lower bound of [`DEFAULT_LOWER_TOLERANCE`] and no
    /// upper bound
    #[must_use]
    pub fn tolerance(mut self, tolerance: Tolerance) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// per-run budget; defaults to the `Medium` strength budget
    #[must_use]
    pub fn budget(mut self, budget: Budget) -> Self {
        self.budget = budget;
        self
    }

    /// per-run budget looked up from the default strength table
    #[must_use]
    pub fn attack_strength(mut self, strength: AttackStrength) -> Self {
        self.budget = Budget::for_strength(strength);
        self
    }

    /// streak length required to confirm; defaults to `Medium`
    #[must_use]
    pub fn alert_threshold(mut self, threshold: AlertThreshold) -> Self {
        self.threshold = threshold;
        self
    }

    /// escalation policy; defaults to a [`LinearSequencer`] of 5s steps starting at 5s
    #[must_use]
    pub fn sequencer<S>(self, sequencer: S) -> Self
    where
        S: PayloadSequencer + 'static,
    {
        self.boxed_sequencer(Box::new(sequencer))
    }

    /// escalation policy, already boxed
    #[must_use]
    pub fn boxed_sequencer(mut self, sequencer: Box<dyn PayloadSequencer>) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    /// require streaks to fit a unit-slope regression; off by default
    #[must_use]
    pub fn regression_check(mut self, check: RegressionCheck) -> Self {
        self.regression = Some(check);
        self
    }

    /// measure the control series' baseline before probing; on by default, only applies
    /// to runs with a control sender
    #[must_use]
    pub fn baseline_check(mut self, enabled: bool) -> Self {
        self.baseline_check = enabled;
        self
    }

    /// share an existing cancellation token with the oracle
    #[must_use]
    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// share an existing event publisher with the oracle
    #[must_use]
    pub fn events(mut self, events: Arc<RwLock<Publisher>>) -> Self {
        self.events = Some(events);
        self
    }

    /// build the configured [`TimingOracle`]
    ///
    /// # Errors
    ///
    /// fails if the budget can't pay for the shortest streak the alert threshold accepts.
    /// The sequencer's first `required_probes` delays have to fit within both the probe
    /// limit and the total wait, otherwise no run could ever confirm
    pub fn build(self) -> Result<TimingOracle, BlindTimingError> {
        let sequencer = match self.sequencer {
            Some(sequencer) => sequencer,
            None => Box::new(LinearSequencer::default()),
        };

        let required = self.threshold.required_probes().max(2);

        let mut schedule = sequencer.clone();
        let mut usage = BudgetUsage::new();
        let mut previous = None;

        for _ in 0..required {
            let Some(delay) = schedule.next(&self.budget, &usage, previous) else {
                error!(
                    required,
                    affordable = usage.probes_sent(),
                    max_probes = self.budget.max_probes(),
                    max_total_wait = self.budget.max_total_wait(),
                    "the budget can't pay for a confirming streak"
                );

                return Err(BlindTimingError::InvalidParameter {
                    param: format!(
                        "max_probes={}, max_total_wait={}",
                        self.budget.max_probes(),
                        self.budget.max_total_wait()
                    ),
                    message: "the budget can't fit the delays of the shortest confirming streak",
                });
            };

            usage.record_probe(delay);
            previous = Some(delay);
        }

        Ok(TimingOracle {
            tolerance: self.tolerance,
            budget: self.budget,
            threshold: self.threshold,
            sequencer,
            regression: self.regression,
            baseline_check: self.baseline_check,
            cancellation: self.cancellation,
            events: self
                .events
                .unwrap_or_else(|| Arc::new(RwLock::new(Publisher::new()))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::StrengthTable;
    use crate::config::{RULE_ALERT_THRESHOLD, RULE_ATTACK_STRENGTH, RULE_COMMON_SLEEP_TIME};

    /// tolerance bounds are validated and applied multiplicatively
    #[test]
    fn tolerance_bounds() {
        assert!(Tolerance::new(0.0, None).is_err());
        assert!(Tolerance::new(0.8, Some(0.5)).is_err());
        assert!(Tolerance::new(0.8, Some(f64::INFINITY)).is_err());

        let open = Tolerance::new(0.8, None).unwrap();
        assert!(open.accepts(5.0, 4.0));
        assert!(!open.accepts(5.0, 3.9));
        assert!(open.accepts(5.0, 500.0));

        let closed = Tolerance::new(0.8, Some(1.5)).unwrap();
        assert!(closed.accepts(10.0, 15.0));
        assert!(!closed.accepts(10.0, 15.1));
    }

    /// deserialized tolerances go through the same validation as `Tolerance::new`
    #[cfg(feature = "json")]
    #[test]
    fn deserialized_tolerance_is_validated() {
        let tolerance: Tolerance = serde_json::from_str(r#"{"lower": 0.8}"#).unwrap();
        assert_eq!(tolerance, Tolerance::default());

        let closed: Tolerance =
            serde_json::from_str(r#"{"lower": 0.8, "upper": 1.5}"#).unwrap();
        assert_eq!(closed.upper(), Some(1.5));

        assert!(serde_json::from_str::<Tolerance>(r#"{"lower": -1.0}"#).is_err());
        assert!(serde_json::from_str::<Tolerance>(r#"{"lower": 0.8, "upper": 0.5}"#).is_err());
    }

    /// an oracle that could never afford its first probe is refused
    #[test]
    fn build_rejects_unaffordable_first_delay() {
        let result = TimingOracle::builder()
            .sequencer(LinearSequencer::with_base(30.0).unwrap())
            .budget(Budget::new(3, 20.0).unwrap())
            .build();

        assert!(result.is_err());
    }

    /// every delay of the shortest confirming streak has to fit, not only the first
    #[test]
    fn build_rejects_unaffordable_streak() {
        // 10s then 20s doesn't fit in low strength's 20s of waiting
        let slow_sleep = RuleConfig::new()
            .with(RULE_COMMON_SLEEP_TIME, "10")
            .with(RULE_ATTACK_STRENGTH, "low");
        assert!(TimingOracle::for_dialect(&Dialect::mysql(), &slow_sleep).is_err());

        // a high threshold needs 5s, 10s and 15s
        let long_streak = RuleConfig::new()
            .with(RULE_ATTACK_STRENGTH, "low")
            .with(RULE_ALERT_THRESHOLD, "high");
        assert!(TimingOracle::for_dialect(&Dialect::mysql(), &long_streak).is_err());

        let too_few_probes = TimingOracle::builder()
            .budget(Budget::new(2, 1000.0).unwrap())
            .alert_threshold(AlertThreshold::High)
            .build();
        assert!(too_few_probes.is_err());

        // 5s + 10s fits in 20s, and a perfect target gets confirmed
        let low = RuleConfig::new().with(RULE_ATTACK_STRENGTH, "low");
        let oracle = TimingOracle::for_dialect(&Dialect::mysql(), &low).unwrap();

        let verdict = oracle
            .verify(&mut |delay: f64| Ok::<_, BlindTimingError>(delay))
            .unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 2);
    }

    /// rule configuration drives the budget, threshold, and regression check
    #[test]
    fn for_dialect_reads_rule_config() {
        let config = RuleConfig::new()
            .with(RULE_COMMON_SLEEP_TIME, "bogus")
            .with(RULE_ATTACK_STRENGTH, "insane")
            .with(RULE_ALERT_THRESHOLD, "high");

        let oracle = TimingOracle::for_dialect(&Dialect::postgresql(), &config).unwrap();

        assert_eq!(
            oracle.budget(),
            StrengthTable::default().budget(AttackStrength::Insane)
        );
        assert_eq!(oracle.alert_threshold(), AlertThreshold::High);
        assert!(oracle.regression_check().is_some());

        let oracle = TimingOracle::for_dialect(&Dialect::postgresql(), &RuleConfig::new()).unwrap();
        assert!(oracle.regression_check().is_none());
        assert_eq!(oracle.budget(), Budget::default());

        let oracle =
            TimingOracle::for_dialect(&Dialect::unix_command(), &RuleConfig::new()).unwrap();
        assert!(oracle.regression_check().is_some());

        let garbled = RuleConfig::new().with(RULE_ATTACK_STRENGTH, "maximum");
        assert!(TimingOracle::for_dialect(&Dialect::mysql(), &garbled).is_err());
    }

    /// one oracle can be shared between threads
    #[test]
    fn oracle_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TimingOracle>();
    }
}
