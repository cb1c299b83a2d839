//! [`Probe`] measurements and the [`ProbeSeries`] that holds them for a single verification run
#![allow(clippy::use_self)] // clippy false-positive on enums that derive Serialize
use derive_more::{Constructor, Display, From, Into};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};

use crate::error::BlindTimingError;
use crate::std_ext::ops::Len;

/// position of a [`Probe`] within the run that produced it
///
/// skipped probes consume an id too, so ids are unique per run but not
/// necessarily contiguous within a [`ProbeSeries`]
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Constructor,
    From,
    Into,
    Display,
)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbeId(usize);

/// a single request/measurement pair
///
/// created by the oracle once the sender returns; never mutated afterwards
#[derive(Copy, Clone, Debug, Default, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Probe {
    id: ProbeId,
    requested_delay: f64,
    observed_elapsed: f64,
}

impl Probe {
    /// create a new `Probe`
    #[must_use]
    pub const fn new(id: ProbeId, requested_delay: f64, observed_elapsed: f64) -> Self {
        Self {
            id,
            requested_delay,
            observed_elapsed,
        }
    }

    /// the probe's position in its run
    #[must_use]
    pub const fn id(&self) -> ProbeId {
        self.id
    }

    /// delay (in seconds) the payload asked the target to wait
    #[must_use]
    pub const fn requested_delay(&self) -> f64 {
        self.requested_delay
    }

    /// wall-clock seconds the round trip actually took
    #[must_use]
    pub const fn observed_elapsed(&self) -> f64 {
        self.observed_elapsed
    }
}

/// what a [`ProbeSeries`] is measuring
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SeriesKind {
    /// probes carrying an injected delay; requested delays must strictly increase
    #[default]
    Injected,

    /// baseline probes with no injected delay
    Control,
}

/// ordered probes of one verification run
///
/// an [`SeriesKind::Injected`] series enforces monotonic escalation: every probe must
/// request a longer delay than the one before it. A real timing side-channel has to
/// follow the *increase*, being slow once proves nothing.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProbeSeries {
    kind: SeriesKind,
    probes: Vec<Probe>,
}

impl ProbeSeries {
    /// create an empty series of injected probes
    #[must_use]
    pub const fn injected() -> Self {
        Self {
            kind: SeriesKind::Injected,
            probes: Vec::new(),
        }
    }

    /// create an empty series of control probes
    #[must_use]
    pub const fn control() -> Self {
        Self {
            kind: SeriesKind::Control,
            probes: Vec::new(),
        }
    }

    /// what this series is measuring
    #[must_use]
    pub const fn kind(&self) -> SeriesKind {
        self.kind
    }

    /// append a probe to the series
    ///
    /// # Errors
    ///
    /// returns [`BlindTimingError::NonIncreasingDelay`] if this is an injected series and
    /// the probe's requested delay doesn't exceed the last one
    #[instrument(skip(self), level = "trace")]
    pub fn push(&mut self, probe: Probe) -> Result<(), BlindTimingError> {
        if self.kind == SeriesKind::Injected {
            if let Some(last) = self.probes.last() {
                if probe.requested_delay() <= last.requested_delay() {
                    error!(
                        requested = probe.requested_delay(),
                        previous = last.requested_delay(),
                        "requested delays must strictly increase"
                    );

                    return Err(BlindTimingError::NonIncreasingDelay {
                        requested: probe.requested_delay(),
                        previous: last.requested_delay(),
                    });
                }
            }
        }

        self.probes.push(probe);

        Ok(())
    }

    /// most recently recorded probe
    #[must_use]
    pub fn last(&self) -> Option<&Probe> {
        self.probes.last()
    }

    /// look up a probe by its position in the series (not its [`ProbeId`])
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Probe> {
        self.probes.get(position)
    }

    /// iterate over the recorded probes, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Probe> {
        self.probes.iter()
    }
}

impl Len for ProbeSeries {
    fn len(&self) -> usize {
        self.probes.len()
    }
}

impl<'a> IntoIterator for &'a ProbeSeries {
    type Item = &'a Probe;
    type IntoIter = std::slice::Iter<'a, Probe>;

    fn into_iter(self) -> Self::IntoIter {
        self.probes.iter()
    }
}
