use tracing::{instrument, trace};

use super::verification::{ControlStep, Verification};
use super::TimingOracle;
use crate::error::BlindTimingError;
use crate::senders::AsyncProbeSender;
use crate::verdict::{AbortReason, Verdict};

impl TimingOracle {
    /// run a verification against `sender`
    ///
    /// the in-flight probe is raced against the oracle's [`Cancellation`] token, so a
    /// cancelled scan doesn't have to wait out a long sleep payload
    ///
    /// # Examples
    ///
    /// ```
    /// # use tokio_test;
    /// use async_trait::async_trait;
    /// use blindtiming::prelude::*;
    ///
    /// struct Echo;
    ///
    /// #[async_trait]
    /// impl AsyncProbeSender for Echo {
    ///     async fn send(&mut self, requested_delay: f64) -> Result<f64, BlindTimingError> {
    ///         Ok(requested_delay + 0.05)
    ///     }
    /// }
    ///
    /// # tokio_test::block_on(async {
    /// let oracle = TimingOracle::builder().build()?;
    ///
    /// let verdict = oracle.verify_async(&mut Echo).await?;
    ///
    /// assert!(verdict.is_confirmed());
    /// # Ok::<(), BlindTimingError>(())
    /// # })?;
    /// # Ok::<(), BlindTimingError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// see [`TimingOracle::verify`]
    ///
    /// [`Cancellation`]: crate::cancellation::Cancellation
    #[instrument(skip_all, level = "trace")]
    pub async fn verify_async<S>(&self, sender: &mut S) -> Result<Verdict, BlindTimingError>
    where
        S: AsyncProbeSender,
    {
        self.run_async(sender, None).await
    }

    /// async counterpart of [`TimingOracle::verify_with_control`]
    ///
    /// # Errors
    ///
    /// see [`TimingOracle::verify`]
    #[instrument(skip_all, level = "trace")]
    pub async fn verify_with_control_async<S, C>(
        &self,
        sender: &mut S,
        control: &mut C,
    ) -> Result<Verdict, BlindTimingError>
    where
        S: AsyncProbeSender,
        C: AsyncProbeSender,
    {
        self.run_async(sender, Some(control)).await
    }

    async fn run_async(
        &self,
        sender: &mut dyn AsyncProbeSender,
        mut control: Option<&mut dyn AsyncProbeSender>,
    ) -> Result<Verdict, BlindTimingError> {
        let mut run = Verification::new(self, control.is_some());

        loop {
            if self.cancellation.is_cancelled() {
                return Ok(run.conclude_aborted(AbortReason::Cancelled));
            }

            let Some(delay) = run.next_delay() else {
                return Ok(run.exhausted());
            };

            if let Some(control) = control.as_deref_mut() {
                loop {
                    let Some(measured) = self.send_or_cancel(control, 0.0).await else {
                        return Ok(run.conclude_aborted(AbortReason::Cancelled));
                    };

                    match run.record_control(delay, measured)? {
                        ControlStep::Proceed => break,
                        ControlStep::Remeasure => {}
                        ControlStep::Finished(verdict) => return Ok(verdict),
                    }
                }
            }

            trace!(delay, "sending probe");

            let Some(measured) = self.send_or_cancel(sender, delay).await else {
                return Ok(run.conclude_aborted(AbortReason::Cancelled));
            };

            if let Some(verdict) = run.record(delay, measured)? {
                return Ok(verdict);
            }
        }
    }

    /// `None` if the run was cancelled while the probe was in flight
    async fn send_or_cancel(
        &self,
        sender: &mut dyn AsyncProbeSender,
        delay: f64,
    ) -> Option<Result<f64, BlindTimingError>> {
        tokio::select! {
            biased;

            () = self.cancellation.cancelled() => {
                trace!(delay, "probe abandoned");
                None
            }
            measured = sender.send(delay) => Some(measured),
        }
    }
}
