//! the [`ProbeSender`] contract between the oracle and the transport, with optional
//! implementations using [`reqwest`]
//!
//! a sender sends one request carrying a payload parameterized by the requested delay
//! and reports how many seconds that single round trip took. The oracle never sees
//! responses; everything it knows about the target comes through this number.
//!
//! transport problems (timeouts, resets, malformed responses) must be reported as
//! [`BlindTimingError::Transport`] so the oracle can skip the probe and carry on.
//! Anything else ends the run.
use cfg_if::cfg_if;

use crate::error::BlindTimingError;

cfg_if! {
    if #[cfg(feature = "async")] {
        mod async_sender;
        pub use self::async_sender::AsyncSender;

        use async_trait::async_trait;

        /// trait for asynchronous probe senders
        ///
        /// see [`AsyncSender`] for a [`reqwest`] based implementation
        #[async_trait]
        #[cfg_attr(docsrs, doc(cfg(feature = "async")))]
        pub trait AsyncProbeSender: Send {
            /// send one probe requesting `requested_delay` seconds and return the observed
            /// elapsed time in seconds
            ///
            /// # Errors
            ///
            /// see the module documentation for how errors are interpreted
            async fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError>;
        }

        /// a sender that hasn't been set up yet; using it is a configuration error
        #[async_trait]
        impl<S> AsyncProbeSender for Option<S>
        where
            S: AsyncProbeSender,
        {
            async fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError> {
                match self {
                    Some(sender) => sender.send(requested_delay).await,
                    None => {
                        tracing::error!("probe sender used before it was initialized");

                        Err(BlindTimingError::SenderNotInitialized {
                            name: std::any::type_name::<S>().to_string(),
                        })
                    }
                }
            }
        }
    }
}

cfg_if! {
    if #[cfg(feature = "blocking")] {
        mod blocking_sender;
        pub use self::blocking_sender::BlockingSender;
    }
}

#[cfg(feature = "reqwest")]
mod utils; // maps reqwest errors to BlindTimingError

/// trait for blocking probe senders
///
/// closures of the form `FnMut(f64) -> Result<f64, BlindTimingError>` are senders too,
/// which is the easiest way to adapt an existing HTTP stack
///
/// # Examples
///
/// ```
/// use blindtiming::error::BlindTimingError;
/// use blindtiming::senders::ProbeSender;
///
/// let mut sender = |delay: f64| -> Result<f64, BlindTimingError> { Ok(delay + 0.05) };
///
/// assert_eq!(sender.send(5.0)?, 5.05);
/// # Ok::<(), blindtiming::error::BlindTimingError>(())
/// ```
pub trait ProbeSender {
    /// send one probe requesting `requested_delay` seconds and return the observed
    /// elapsed time in seconds
    ///
    /// # Errors
    ///
    /// see the module documentation for how errors are interpreted
    fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError>;
}

impl<F> ProbeSender for F
where
    F: FnMut(f64) -> Result<f64, BlindTimingError>,
{
    fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError> {
        self(requested_delay)
    }
}

/// marker trait for the [`reqwest`] backed senders
#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
pub trait HttpSender {
    /// which concrete client will be used
    type ClientType;

    /// create a new sender for `request`, using [`HttpSender::ClientType`] as the transport
    fn with_client(client: Self::ClientType, request: crate::requests::ProbeRequest) -> Self;
}
