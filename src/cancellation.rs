//! cooperative cancellation of verification runs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::{atomic_load, atomic_store};

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,

    #[cfg(feature = "async")]
    notify: tokio::sync::Notify,
}

/// cloneable stop signal shared between a scan and its verification runs
///
/// the oracle checks the token before every probe. The async oracle also races the
/// in-flight probe against it, so a stop doesn't have to wait out a long sleep payload.
///
/// # Examples
///
/// ```
/// use blindtiming::cancellation::Cancellation;
///
/// let token = Cancellation::new();
/// let handle = token.clone();
///
/// assert!(!token.is_cancelled());
///
/// handle.cancel();
///
/// assert!(token.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: Arc<Inner>,
}

impl Cancellation {
    /// create a new, un-cancelled token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// request that every run sharing this token stops
    pub fn cancel(&self) {
        debug!("cancellation requested");

        atomic_store!(self.inner.requested, true);

        #[cfg(feature = "async")]
        self.inner.notify.notify_waiters();
    }

    /// true once [`Cancellation::cancel`] has been called on any clone of this token
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        atomic_load!(self.inner.requested)
    }

    /// resolves once the token is cancelled
    #[cfg(feature = "async")]
    #[cfg_attr(docsrs, doc(cfg(feature = "async")))]
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        let mut notified = std::pin::pin!(notified);

        // register interest before checking the flag, otherwise a cancel landing
        // between the check and the await would be missed
        notified.as_mut().enable();

        if self.is_cancelled() {
            return;
        }

        notified.await;
    }
}
