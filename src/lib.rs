//! timing-oracle verification of blind injection vulnerabilities
//!
//! a blind injection payload can't show its effect in the response, but it can make the
//! target wait. The [`TimingOracle`] asks a [`ProbeSender`] for a series of probes with
//! strictly increasing requested delays and only confirms a vulnerability when the
//! observed latency keeps up with them. One slow response proves nothing.
//!
//! # Examples
//!
//! ```
//! use blindtiming::prelude::*;
//!
//! let oracle = TimingOracle::builder()
//!     .sequencer(LinearSequencer::new(5.0, 5.0)?)
//!     .budget(Budget::new(4, 40.0)?)
//!     .build()?;
//!
//! // a target that never waits on our payload
//! let verdict = oracle.verify(&mut |_: f64| Ok::<_, BlindTimingError>(0.2))?;
//!
//! // inconclusive, which is not the same thing as "not vulnerable"
//! assert!(!verdict.is_confirmed());
//! assert_eq!(verdict.state(), OracleState::Inconclusive);
//! # Ok::<(), BlindTimingError>(())
//! ```
//!
//! [`TimingOracle`]: crate::oracle::TimingOracle
//! [`ProbeSender`]: crate::senders::ProbeSender
#![macro_use]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::perf,
    rustdoc::broken_intra_doc_links,
    missing_docs,
    clippy::missing_const_for_fn
)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)] // appears to be a false positive; cargo tree doesn't show what clippy yells about

pub mod budget;
pub mod cancellation;
pub mod config;
pub mod dialects;
pub mod error;
pub mod events;
pub mod oracle;
pub mod prelude;
pub mod probes;
pub mod requests;
pub mod senders;
pub mod sequencers;
pub mod statistics;
pub mod verdict;
mod std_ext;

// re-exported traits, to be available as top-level imports for users
pub use std_ext::named::Named;
pub use std_ext::ops::Len;

/// Wrapper around `Atomic*.load` to save me from writing `Ordering::SeqCst` a bajillion times
#[macro_export]
macro_rules! atomic_load {
    ($atomic:expr) => {
        $atomic.load(Ordering::SeqCst)
    };
    ($atomic:expr, $ordering:expr) => {
        $atomic.load($ordering)
    };
}

/// Wrapper around `Atomic*.store` to save me from writing `Ordering::SeqCst` a bajillion times
#[macro_export]
macro_rules! atomic_store {
    ($atomic:expr, $value:expr) => {
        $atomic.store($value, Ordering::SeqCst);
    };
    ($atomic:expr, $value:expr, $ordering:expr) => {
        $atomic.store($value, $ordering);
    };
}
