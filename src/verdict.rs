//! the outcome of a single verification run
#![allow(clippy::use_self)] // clippy false-positive on enums that derive Serialize
use std::fmt::{self, Display};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::probes::Probe;
use crate::statistics::Statistics;

/// states of the oracle's probing state machine
///
/// `Probing` is the only non-terminal state
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OracleState {
    /// still sending probes
    #[default]
    Probing,

    /// the target's latency tracked the requested delays
    Confirmed,

    /// no timing signal was observed within budget
    ///
    /// this is **not** a verified negative
    Inconclusive,

    /// the run was stopped before reaching a decision
    Aborted,
}

/// why a run ended without confirmation
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum InconclusiveReason {
    /// the probe or waiting budget ran out
    BudgetExhausted,

    /// the target was too slow without any injected delay to be measured reliably
    SlowBaseline,
}

/// why a run was aborted
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum AbortReason {
    /// the scan was stopped through the run's [`Cancellation`] token
    ///
    /// [`Cancellation`]: crate::cancellation::Cancellation
    Cancelled,

    /// the sender failed in a way the oracle can't recover from
    Sender(ErrorKind),
}

impl AbortReason {
    /// the error category behind the abort
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Sender(kind) => *kind,
        }
    }
}

/// result of a verification run; produced once, never modified
///
/// an unconfirmed verdict means "no timing signal observed within budget", which is a
/// much weaker claim than "not vulnerable" and must not be reported as such
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Verdict {
    confirmed: bool,
    evidence_probe: Option<Probe>,
    probes_sent: usize,
    aborted: bool,
    abort_reason: Option<AbortReason>,
    inconclusive_reason: Option<InconclusiveReason>,
    statistics: Statistics,
}

impl Verdict {
    pub(crate) fn confirmed(evidence: Probe, probes_sent: usize, statistics: Statistics) -> Self {
        Self {
            confirmed: true,
            evidence_probe: Some(evidence),
            probes_sent,
            statistics,
            ..Self::default()
        }
    }

    pub(crate) fn inconclusive(
        reason: InconclusiveReason,
        probes_sent: usize,
        statistics: Statistics,
    ) -> Self {
        Self {
            probes_sent,
            inconclusive_reason: Some(reason),
            statistics,
            ..Self::default()
        }
    }

    pub(crate) fn aborted(reason: AbortReason, probes_sent: usize, statistics: Statistics) -> Self {
        Self {
            probes_sent,
            aborted: true,
            abort_reason: Some(reason),
            statistics,
            ..Self::default()
        }
    }

    /// true if the timing side-channel was confirmed
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// true if the run stopped before reaching a decision
    #[must_use]
    pub const fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// the probe that completed the confirmation, if any
    #[must_use]
    pub const fn evidence_probe(&self) -> Option<&Probe> {
        self.evidence_probe.as_ref()
    }

    /// number of injected probes issued, skipped probes included
    #[must_use]
    pub const fn probes_sent(&self) -> usize {
        self.probes_sent
    }

    /// why the run was aborted
    #[must_use]
    pub const fn abort_reason(&self) -> Option<AbortReason> {
        self.abort_reason
    }

    /// why the run ended without a decision
    #[must_use]
    pub const fn inconclusive_reason(&self) -> Option<InconclusiveReason> {
        self.inconclusive_reason
    }

    /// counters collected during the run
    #[must_use]
    pub const fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// terminal state the run ended in
    #[must_use]
    pub const fn state(&self) -> OracleState {
        if self.confirmed {
            OracleState::Confirmed
        } else if self.aborted {
            OracleState::Aborted
        } else {
            OracleState::Inconclusive
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.state(), self.evidence_probe.as_ref()) {
            (OracleState::Confirmed, Some(probe)) => write!(
                f,
                "confirmed after {} probes: requested {}s, observed {:.3}s",
                self.probes_sent,
                probe.requested_delay(),
                probe.observed_elapsed()
            ),
            (OracleState::Aborted, _) => write!(
                f,
                "aborted after {} probes: {:?}",
                self.probes_sent, self.abort_reason
            ),
            _ => write!(
                f,
                "inconclusive after {} probes: {:?}",
                self.probes_sent, self.inconclusive_reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::ProbeId;

    /// the terminal state follows the verdict's flags
    #[test]
    fn verdict_state_matches_constructor() {
        let probe = Probe::new(ProbeId::new(1), 10.0, 8.7);

        let confirmed = Verdict::confirmed(probe, 2, Statistics::new());
        assert_eq!(confirmed.state(), OracleState::Confirmed);
        assert_eq!(confirmed.evidence_probe(), Some(&probe));

        let inconclusive =
            Verdict::inconclusive(InconclusiveReason::BudgetExhausted, 3, Statistics::new());
        assert_eq!(inconclusive.state(), OracleState::Inconclusive);
        assert!(!inconclusive.is_confirmed());
        assert!(inconclusive.evidence_probe().is_none());

        let aborted = Verdict::aborted(AbortReason::Cancelled, 0, Statistics::new());
        assert_eq!(aborted.state(), OracleState::Aborted);
        assert_eq!(aborted.abort_reason().unwrap().kind(), ErrorKind::Cancelled);
    }

    /// display gives a short human readable summary
    #[test]
    fn verdict_display() {
        let probe = Probe::new(ProbeId::new(1), 10.0, 8.7);
        let confirmed = Verdict::confirmed(probe, 2, Statistics::new());

        assert_eq!(
            confirmed.to_string(),
            "confirmed after 2 probes: requested 10s, observed 8.700s"
        );
    }
}
