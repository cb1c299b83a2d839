//! Custom error-type definitions
#![allow(clippy::use_self)] // clippy false-positive on enums that derive Serialize

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

/// primary error-type for the blindtiming library
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BlindTimingError {
    /// Represents a failure encountered while sending a probe / receiving its response
    ///
    /// this is the only error the oracle recovers from; the probe is skipped and the
    /// verification run continues with the next scheduled delay
    #[error("An error occurred while sending the probe: {kind:?} {message}")]
    Transport {
        /// what category of error occurred
        kind: TransportErrorKind,

        /// the underlying error message
        message: String,
    },

    /// Represents an invalid parameter passed to some function or constructor
    #[error("Invalid parameter provided, {message}: {param}")]
    InvalidParameter {
        /// the failing parameter
        param: String,

        /// the associated message to help the user
        message: &'static str,
    },

    /// Represents a delay that doesn't exceed the previous delay in a [`ProbeSeries`]
    ///
    /// [`ProbeSeries`]: crate::probes::ProbeSeries
    #[error("Requested delay {requested}s does not exceed the previous delay {previous}s")]
    NonIncreasingDelay {
        /// the delay that was rejected
        requested: f64,

        /// the last delay accepted into the series
        previous: f64,
    },

    /// Represents a [`ProbeSender`] that was used before it was given a way to send probes
    ///
    /// [`ProbeSender`]: crate::senders::ProbeSender
    #[error("The probe sender `{name}` was used before being initialized")]
    SenderNotInitialized {
        /// name of the sender
        name: String,
    },

    /// Represents a failure to parse the given string into a [`url::Url`](https://docs.rs/url/latest/url/struct.Url.html).
    #[error("The url `{url}` is invalid and couldn't be parsed.")]
    InvalidUrl {
        /// underlying source error-type
        source: ParseError,

        /// the url that couldn't be parsed
        url: String,
    },

    /// Represents a sender reporting an elapsed time that can't be a real measurement
    #[error("Observed elapsed time `{observed}` for requested delay {requested}s is not a valid measurement")]
    InvalidMeasurement {
        /// the delay that was requested
        requested: f64,

        /// the nonsensical elapsed time
        observed: f64,
    },

    /// Represents a payload template that couldn't be rendered into a request value
    #[error("Could not render payload template `{template}`: {reason}")]
    PayloadRender {
        /// the offending template
        template: String,

        /// why rendering failed
        reason: &'static str,
    },

    /// Represents a failure to parse an object from JSON
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error("Could not convert the given object from JSON")]
    JSONParseError {
        /// underlying source error-type
        #[from]
        source: serde_json::Error,
    },
}

impl BlindTimingError {
    /// the broad category of this error, which is what the oracle uses to decide
    /// between skipping a probe, aborting the run, or bailing out entirely
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::InvalidParameter { .. }
            | Self::NonIncreasingDelay { .. }
            | Self::SenderNotInitialized { .. } => ErrorKind::Configuration,
            Self::InvalidUrl { .. } | Self::InvalidMeasurement { .. } | Self::PayloadRender { .. } => {
                ErrorKind::Request
            }
            #[cfg(feature = "json")]
            Self::JSONParseError { .. } => ErrorKind::Request,
        }
    }

    /// convenience constructor for a [`BlindTimingError::Transport`] error
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }
}

/// broad error categories, as seen by the [`TimingOracle`]
///
/// [`TimingOracle`]: crate::oracle::TimingOracle
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// network-level failure; the probe is skipped and the run continues
    Transport,

    /// precondition violation; surfaced to the caller without a verdict
    Configuration,

    /// the probe couldn't be built or measured; the run is aborted
    Request,

    /// the run was stopped through its [`Cancellation`] token
    ///
    /// [`Cancellation`]: crate::cancellation::Cancellation
    Cancelled,
}

/// Used to differentiate between different types of errors that occur when sending probes.
///
/// That differentiation is then used internally to update the proper error counts in [`Statistics`]
///
/// [`Statistics`]: crate::statistics::Statistics
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// Represents a failure to read a response body
    Body(Option<u16>),

    /// Represents a failure during client connection to target
    Connect(Option<u16>),

    /// Represents a failure to decode a response body
    Decode(Option<u16>),

    /// Represents a failure to related to redirection, i.e. too many redirects
    Redirect(Option<u16>),

    /// Represents a failure related to the request
    Request(Option<u16>),

    /// Represents a timeout during the request
    Timeout(Option<u16>),

    /// Represents an unexpected error
    #[default]
    Unknown,
}
