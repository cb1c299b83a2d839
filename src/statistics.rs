//! [`Statistics`] is the data container for everything a verification run counts along the way
//!
//! every [`Verdict`] carries the statistics of the run that produced it; a scan
//! verifying many parameters can sum them with `+` / `+=`
//!
//! [`Verdict`]: crate::verdict::Verdict
use std::fmt::Display;
use std::ops::{Add, AddAssign};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::{BlindTimingError, TransportErrorKind};

/// a verification run's tracked statistics
#[derive(Default, Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Statistics {
    /// tracker for injected probes sent, including those that were skipped
    probes: usize,

    /// tracker for control (no injected delay) probes sent
    control_probes: usize,

    /// tracker for probes that were skipped because of a transport error
    skipped: usize,

    /// tracker for number of timeouts seen by the sender
    timeouts: usize,

    /// tracker for total number of transport errors encountered by the sender
    ///
    /// the errors tracked here reflect things like network connection errors,
    /// timeouts, malformed responses, etc...
    errors: usize,

    /// tracker for number of errors triggered by redirection
    redirection_errors: usize,

    /// tracker for number of errors related to connecting
    connection_errors: usize,

    /// tracker for number of errors related to the request or response body
    request_errors: usize,

    /// total number of seconds spent waiting on probes, control probes included
    seconds_waited: f64,
}

impl Statistics {
    /// create a new default instance of `Statistics`
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// get the number of injected probes sent
    #[inline]
    #[must_use]
    pub const fn probes(&self) -> usize {
        self.probes
    }

    /// get the number of control probes sent
    #[inline]
    #[must_use]
    pub const fn control_probes(&self) -> usize {
        self.control_probes
    }

    /// get the number of injected probes skipped due to transport errors
    #[inline]
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// get the number of probe timeouts
    #[inline]
    #[must_use]
    pub const fn timeouts(&self) -> usize {
        self.timeouts
    }

    /// get the number of transport errors of any kind
    #[inline]
    #[must_use]
    pub const fn errors(&self) -> usize {
        self.errors
    }

    /// get the number of errors encountered during redirection (redirect loops etc)
    #[inline]
    #[must_use]
    pub const fn redirection_errors(&self) -> usize {
        self.redirection_errors
    }

    /// get the number of connection errors
    #[inline]
    #[must_use]
    pub const fn connection_errors(&self) -> usize {
        self.connection_errors
    }

    /// get the number of request/body errors
    #[inline]
    #[must_use]
    pub const fn request_errors(&self) -> usize {
        self.request_errors
    }

    /// get the number of seconds spent waiting on probes
    #[inline]
    #[must_use]
    pub const fn seconds_waited(&self) -> f64 {
        self.seconds_waited
    }

    pub(crate) fn update_from_probe(&mut self, elapsed: f64) {
        self.probes += 1;
        self.seconds_waited += elapsed;
    }

    pub(crate) fn update_from_control(&mut self, elapsed: f64) {
        self.control_probes += 1;
        self.seconds_waited += elapsed;
    }

    pub(crate) fn update_from_skip(&mut self, requested: f64) {
        self.probes += 1;
        self.skipped += 1;
        self.seconds_waited += requested;
    }

    /// update the internal trackers from the given error
    ///
    /// expects to receive [`BlindTimingError::Transport`] and no other [`BlindTimingError`] variants
    #[instrument(skip(self), level = "trace")]
    pub(crate) fn update_from_error(&mut self, error: &BlindTimingError) {
        if let BlindTimingError::Transport { kind, .. } = error {
            // increment total # of errors, doesn't matter what kind it is
            self.errors += 1;

            match kind {
                TransportErrorKind::Body(_)
                | TransportErrorKind::Decode(_)
                | TransportErrorKind::Request(_) => {
                    self.request_errors += 1;
                }
                TransportErrorKind::Connect(_) => {
                    self.connection_errors += 1;
                }
                TransportErrorKind::Redirect(_) => {
                    self.redirection_errors += 1;
                }
                TransportErrorKind::Timeout(_) => {
                    self.timeouts += 1;
                }
                TransportErrorKind::Unknown => {
                    warn!(?kind, "unknown transport error category");
                }
            }

            return;
        }

        warn!(
            ?error,
            "Expected BlindTimingError::Transport; did not update Statistics"
        );
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(feature = "json")]
        return write!(
            f,
            "{}",
            serde_json::to_string(&self).map_err(|_| { std::fmt::Error })?
        );

        #[cfg(not(feature = "json"))]
        return write!(f, "{self:?}");
    }
}

impl Add for Statistics {
    type Output = Self;

    /// add two [`Statistics`] objects together
    ///
    /// does not modify the original objects
    fn add(self, rhs: Self) -> Self::Output {
        let mut new = self;
        new += rhs;
        new
    }
}

impl AddAssign for Statistics {
    fn add_assign(&mut self, rhs: Self) {
        self.probes += rhs.probes;
        self.control_probes += rhs.control_probes;
        self.skipped += rhs.skipped;
        self.timeouts += rhs.timeouts;
        self.errors += rhs.errors;
        self.redirection_errors += rhs.redirection_errors;
        self.connection_errors += rhs.connection_errors;
        self.request_errors += rhs.request_errors;
        self.seconds_waited += rhs.seconds_waited;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// each transport category lands in its own counter
    #[test]
    fn update_from_error_categorizes_transport_errors() {
        let mut stats = Statistics::new();

        stats.update_from_error(&BlindTimingError::transport(
            TransportErrorKind::Timeout(None),
            "timed out",
        ));
        stats.update_from_error(&BlindTimingError::transport(
            TransportErrorKind::Connect(None),
            "refused",
        ));
        stats.update_from_error(&BlindTimingError::transport(
            TransportErrorKind::Decode(Some(200)),
            "bad gzip",
        ));
        stats.update_from_error(&BlindTimingError::transport(
            TransportErrorKind::Redirect(Some(302)),
            "loop",
        ));

        assert_eq!(stats.errors(), 4);
        assert_eq!(stats.timeouts(), 1);
        assert_eq!(stats.connection_errors(), 1);
        assert_eq!(stats.request_errors(), 1);
        assert_eq!(stats.redirection_errors(), 1);
    }

    /// non-transport errors are ignored
    #[test]
    fn update_from_error_ignores_other_errors() {
        let mut stats = Statistics::new();

        stats.update_from_error(&BlindTimingError::SenderNotInitialized {
            name: String::from("test"),
        });

        assert_eq!(stats, Statistics::new());
    }

    /// statistics from separate runs can be summed
    #[test]
    fn statistics_add_together() {
        let mut first = Statistics::new();
        first.update_from_probe(5.1);
        first.update_from_control(0.2);

        let mut second = Statistics::new();
        second.update_from_skip(10.0);

        let total = first.clone() + second;

        assert_eq!(total.probes(), 2);
        assert_eq!(total.control_probes(), 1);
        assert_eq!(total.skipped(), 1);
        assert!((total.seconds_waited() - 15.3).abs() < 1e-9);

        first += Statistics::new();
        assert_eq!(first.probes(), 1);
    }
}
