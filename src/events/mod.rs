//! subscribable events for introspection into a running verification
//!
//! every [`TimingOracle`] owns a [`Publisher`]; the [`EventPublisher`] trait provides a
//! simple interface for subscribing to and notifying listeners of events. Listeners run
//! synchronously on the verifying thread, keep them short.
//!
//! [`TimingOracle`]: crate::oracle::TimingOracle
//!
//! # Examples
//!
//! ```
//! use blindtiming::events::{EventPublisher, ProbeSent};
//! use blindtiming::oracle::TimingOracle;
//!
//! let oracle = TimingOracle::builder().build()?;
//!
//! oracle.events().subscribe(|event: ProbeSent| {
//!     println!("{:?}", event);
//! });
//!
//! assert!(oracle.events().has_listeners::<ProbeSent>());
//! # Ok::<(), blindtiming::error::BlindTimingError>(())
//! ```
mod publisher;

use crate::error::TransportErrorKind;
use crate::probes::{Probe, ProbeId};
use crate::verdict::OracleState;

pub use self::publisher::{EventPublisher, Publisher};

/// emitted after an injected probe was measured and run through the acceptance test
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProbeSent {
    /// the recorded probe
    pub probe: Probe,

    /// whether the measurement was consistent with the requested delay
    pub consistent: bool,
}

/// emitted when an injected probe failed with a transport error and was skipped
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProbeSkipped {
    /// the skipped probe's id
    pub id: ProbeId,

    /// the delay the skipped probe requested
    pub requested_delay: f64,

    /// what went wrong
    pub kind: TransportErrorKind,
}

/// emitted after a control (no injected delay) probe was measured
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControlProbeSent {
    /// id of the injected probe this control measurement is paired with
    pub id: ProbeId,

    /// the measured baseline latency
    pub observed_elapsed: f64,
}

/// emitted once per run, when it reaches a terminal state
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VerificationFinished {
    /// the terminal state
    pub state: OracleState,

    /// injected probes issued during the run
    pub probes_sent: usize,
}
