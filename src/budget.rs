//! probe budgets and the scan-intensity settings they're derived from
#![allow(clippy::use_self)] // clippy false-positive on enums that derive Serialize
use std::fmt::{self, Display};
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::BlindTimingError;

/// scan-intensity setting; controls how many probes a verification run may send
///
/// `Low` keeps scans fast at the cost of more false negatives, `Insane` is the most
/// thorough
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AttackStrength {
    /// fewest, cheapest probes
    Low,

    /// the default
    #[default]
    Medium,

    /// more probes, longer waits
    High,

    /// everything the budget table allows
    Insane,
}

impl FromStr for AttackStrength {
    type Err = BlindTimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "default" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "insane" => Ok(Self::Insane),
            _ => {
                error!(strength = s, "unknown attack strength");

                Err(BlindTimingError::InvalidParameter {
                    param: s.to_string(),
                    message: "attack strength must be one of low, medium, high, insane",
                })
            }
        }
    }
}

impl Display for AttackStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Insane => "INSANE",
        };

        write!(f, "{name}")
    }
}

/// how much evidence is needed before a timing signal is confirmed
///
/// maps to the number of consecutive consistent probes with increasing elapsed
/// time a run must observe
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AlertThreshold {
    /// two sequential increases
    Low,

    /// two sequential increases
    #[default]
    Medium,

    /// three sequential increases
    High,
}

impl AlertThreshold {
    /// number of consecutive consistent probes needed to confirm; never less than two
    #[must_use]
    pub const fn required_probes(&self) -> usize {
        match self {
            Self::Low | Self::Medium => 2,
            Self::High => 3,
        }
    }
}

impl FromStr for AlertThreshold {
    type Err = BlindTimingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "default" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => {
                error!(threshold = s, "unknown alert threshold");

                Err(BlindTimingError::InvalidParameter {
                    param: s.to_string(),
                    message: "alert threshold must be one of low, medium, high",
                })
            }
        }
    }
}

/// upper bounds on the cost of a single verification run
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "UncheckedBudget")
)]
pub struct Budget {
    max_probes: usize,
    max_total_wait: f64,
}

// deserialized fields of a `Budget`, validated by `Budget::new` before use
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct UncheckedBudget {
    max_probes: usize,
    max_total_wait: f64,
}

#[cfg(feature = "serde")]
impl TryFrom<UncheckedBudget> for Budget {
    type Error = BlindTimingError;

    fn try_from(unchecked: UncheckedBudget) -> Result<Self, Self::Error> {
        Self::new(unchecked.max_probes, unchecked.max_total_wait)
    }
}

impl Budget {
    /// create a new `Budget`
    ///
    /// # Errors
    ///
    /// `max_probes` must be at least 1 and `max_total_wait` (seconds) must be a positive,
    /// finite number
    pub fn new(max_probes: usize, max_total_wait: f64) -> Result<Self, BlindTimingError> {
        if max_probes == 0 {
            error!("a budget must allow at least one probe");

            return Err(BlindTimingError::InvalidParameter {
                param: max_probes.to_string(),
                message: "max_probes must be at least 1",
            });
        }

        if !max_total_wait.is_finite() || max_total_wait <= 0.0 {
            error!(max_total_wait, "a budget must allow some waiting");

            return Err(BlindTimingError::InvalidParameter {
                param: max_total_wait.to_string(),
                message: "max_total_wait must be a positive number of seconds",
            });
        }

        Ok(Self {
            max_probes,
            max_total_wait,
        })
    }

    /// look up the budget for `strength` in the default [`StrengthTable`]
    #[must_use]
    pub fn for_strength(strength: AttackStrength) -> Self {
        StrengthTable::default().budget(strength)
    }

    /// maximum number of injected probes a run may send
    #[must_use]
    pub const fn max_probes(&self) -> usize {
        self.max_probes
    }

    /// maximum number of seconds a run may spend waiting on probes
    #[must_use]
    pub const fn max_total_wait(&self) -> f64 {
        self.max_total_wait
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::for_strength(AttackStrength::default())
    }
}

/// running tally of what a verification run has spent from its [`Budget`]
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BudgetUsage {
    probes_sent: usize,
    seconds_spent: f64,
}

impl BudgetUsage {
    /// create a new, empty `BudgetUsage`
    #[must_use]
    pub const fn new() -> Self {
        Self {
            probes_sent: 0,
            seconds_spent: 0.0,
        }
    }

    /// injected probes sent so far, including skipped ones
    #[must_use]
    pub const fn probes_sent(&self) -> usize {
        self.probes_sent
    }

    /// seconds spent waiting so far
    #[must_use]
    pub const fn seconds_spent(&self) -> f64 {
        self.seconds_spent
    }

    /// true if another probe of `delay` seconds still fits within `budget`
    #[must_use]
    pub fn allows(&self, budget: &Budget, delay: f64) -> bool {
        self.probes_sent < budget.max_probes()
            && self.seconds_spent + delay <= budget.max_total_wait()
    }

    pub(crate) fn record_probe(&mut self, seconds: f64) {
        self.probes_sent += 1;
        self.seconds_spent += seconds;
    }

    pub(crate) fn record_wait(&mut self, seconds: f64) {
        self.seconds_spent += seconds;
    }
}

/// attack strength → [`Budget`] mapping, supplied by the scan rule
///
/// the default table is
///
/// | strength | probes | total wait |
/// |----------|--------|------------|
/// | Low      | 3      | 20s        |
/// | Medium   | 4      | 40s        |
/// | High     | 6      | 90s        |
/// | Insane   | 10     | 300s       |
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "UncheckedStrengthTable")
)]
pub struct StrengthTable {
    low: Budget,
    medium: Budget,
    high: Budget,
    insane: Budget,
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct UncheckedStrengthTable {
    low: Budget,
    medium: Budget,
    high: Budget,
    insane: Budget,
}

#[cfg(feature = "serde")]
impl TryFrom<UncheckedStrengthTable> for StrengthTable {
    type Error = BlindTimingError;

    fn try_from(unchecked: UncheckedStrengthTable) -> Result<Self, Self::Error> {
        Self::new(unchecked.low, unchecked.medium, unchecked.high, unchecked.insane)
    }
}

impl StrengthTable {
    /// create a new `StrengthTable`
    ///
    /// # Errors
    ///
    /// budgets must not shrink as the strength increases
    pub fn new(
        low: Budget,
        medium: Budget,
        high: Budget,
        insane: Budget,
    ) -> Result<Self, BlindTimingError> {
        let ordered = [low, medium, high, insane].windows(2).all(|pair| {
            pair[0].max_probes() <= pair[1].max_probes()
                && pair[0].max_total_wait() <= pair[1].max_total_wait()
        });

        if !ordered {
            error!("strength table budgets must grow with attack strength");

            return Err(BlindTimingError::InvalidParameter {
                param: String::from("StrengthTable"),
                message: "budgets must not shrink as attack strength increases",
            });
        }

        Ok(Self {
            low,
            medium,
            high,
            insane,
        })
    }

    /// the budget for the given strength
    #[must_use]
    pub const fn budget(&self, strength: AttackStrength) -> Budget {
        match strength {
            AttackStrength::Low => self.low,
            AttackStrength::Medium => self.medium,
            AttackStrength::High => self.high,
            AttackStrength::Insane => self.insane,
        }
    }
}

impl Default for StrengthTable {
    fn default() -> Self {
        Self {
            low: Budget {
                max_probes: 3,
                max_total_wait: 20.0,
            },
            medium: Budget {
                max_probes: 4,
                max_total_wait: 40.0,
            },
            high: Budget {
                max_probes: 6,
                max_total_wait: 90.0,
            },
            insane: Budget {
                max_probes: 10,
                max_total_wait: 300.0,
            },
        }
    }
}
