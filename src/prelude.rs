//! small collection of widely used core types and traits
//!
//! The goal in using the prelude is to reduce the number of imports
//! needed to (mostly) only those that have direct impact on wiring the
//! oracle into a scan rule.
//!
//! # Traits
//!
//! - [`ProbeSender`] - exposes the `send` method used by [`TimingOracle::verify`]
//! - [`AsyncProbeSender`] - exposes the `send` method used by [`TimingOracle::verify_async`]
//! - [`PayloadSequencer`] - exposes the `next` method on implementing types such as [`LinearSequencer`]
//! - [`EventPublisher`] - exposes the `subscribe` method on [`TimingOracle::events`]
//! - [`Len`] - exposes the `len` method on [`ProbeSeries`]
//!
//! # Structs & Enums
//!
//! The types included here are what nearly every caller touches
//! when building an oracle and reading its verdict.
//!
//! - [`TimingOracle`] - the oracle itself, built through [`TimingOracle::builder`]
//! - [`Verdict`] / [`OracleState`] - the outcome of a run
//! - [`Budget`], [`Tolerance`], [`RegressionCheck`] - how much a run may spend and how strict it is
//! - [`Dialect`], [`PayloadTemplate`], [`ProbeRequest`] - what gets injected where
//! - [`RuleConfig`] - the scan rule's string configuration
//! - [`Cancellation`] - stops runs from the outside
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "async")] {
        pub use crate::senders::AsyncProbeSender;
    }
}

// traits that are likely to be used by anyone wiring up the oracle
pub use crate::events::EventPublisher;
pub use crate::senders::ProbeSender;
pub use crate::sequencers::PayloadSequencer;
pub use crate::Len;

// core structs needed by everyone
pub use crate::budget::{AlertThreshold, AttackStrength, Budget, StrengthTable};
pub use crate::cancellation::Cancellation;
pub use crate::config::RuleConfig;
pub use crate::dialects::{Dialect, Escalation};
pub use crate::oracle::{RegressionCheck, TimingOracle, Tolerance};
pub use crate::probes::{Probe, ProbeSeries};
pub use crate::requests::{PayloadTemplate, ProbeRequest};
pub use crate::sequencers::{GeometricSequencer, LinearSequencer};
pub use crate::verdict::{OracleState, Verdict};

// crate's error type
pub use crate::error::{BlindTimingError, ErrorKind};
