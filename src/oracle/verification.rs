//! run-level state shared by the blocking and async drivers
//!
//! the drivers own the I/O (sending probes, racing cancellation); everything that
//! decides what a measurement means lives here so both drivers reach identical verdicts
use tracing::{debug, error, trace, warn};

use super::regression::OnlineRegression;
use super::TimingOracle;
use crate::budget::BudgetUsage;
use crate::error::{BlindTimingError, ErrorKind};
use crate::events::{
    ControlProbeSent, EventPublisher, ProbeSent, ProbeSkipped, VerificationFinished,
};
use crate::probes::{Probe, ProbeId, ProbeSeries};
use crate::sequencers::PayloadSequencer;
use crate::statistics::Statistics;
use crate::std_ext::ops::Len;
use crate::verdict::{AbortReason, InconclusiveReason, Verdict};

/// what the driver should do after a control measurement
#[derive(Debug)]
pub(crate) enum ControlStep {
    /// send the injected probe
    Proceed,

    /// the baseline was too slow; measure it once more before giving up
    Remeasure,

    /// the run is over
    Finished(Verdict),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Baseline {
    Unmeasured,
    Remeasuring,
    Accepted,
}

pub(crate) struct Verification<'a> {
    oracle: &'a TimingOracle,
    sequencer: Box<dyn PayloadSequencer>,
    series: ProbeSeries,
    controls: ProbeSeries,
    // position in `controls` of the measurement paired with each probe in `series`
    paired_controls: Vec<Option<usize>>,
    pending_control: Option<usize>,
    // position in `series` where the current streak begins
    streak_start: Option<usize>,
    regression: OnlineRegression,
    usage: BudgetUsage,
    statistics: Statistics,
    previous_delay: Option<f64>,
    next_id: usize,
    baseline: Baseline,
    guarded: bool,
}

impl<'a> Verification<'a> {
    /// start a run; `guarded` runs pair each injected probe with a control measurement
    pub(crate) fn new(oracle: &'a TimingOracle, guarded: bool) -> Self {
        let baseline = if guarded && oracle.baseline_check {
            Baseline::Unmeasured
        } else {
            Baseline::Accepted
        };

        Self {
            oracle,
            sequencer: oracle.sequencer.clone(),
            series: ProbeSeries::injected(),
            controls: ProbeSeries::control(),
            paired_controls: Vec::new(),
            pending_control: None,
            streak_start: None,
            regression: OnlineRegression::new(),
            usage: BudgetUsage::new(),
            statistics: Statistics::new(),
            previous_delay: None,
            next_id: 0,
            baseline,
            guarded,
        }
    }

    /// the next delay to request, `None` once the budget is spent
    pub(crate) fn next_delay(&mut self) -> Option<f64> {
        self.sequencer
            .next(&self.oracle.budget, &self.usage, self.previous_delay)
    }

    /// record the outcome of the control probe sent ahead of the injected probe for `delay`
    pub(crate) fn record_control(
        &mut self,
        delay: f64,
        result: Result<f64, BlindTimingError>,
    ) -> Result<ControlStep, BlindTimingError> {
        let id = ProbeId::new(self.next_id);

        let elapsed = match result {
            Ok(elapsed) if elapsed.is_finite() && elapsed >= 0.0 => elapsed,
            Ok(elapsed) => {
                error!(elapsed, "control sender reported an invalid measurement");

                return Ok(ControlStep::Finished(
                    self.conclude_aborted(AbortReason::Sender(ErrorKind::Request)),
                ));
            }
            Err(error) => return self.control_failed(error),
        };

        self.statistics.update_from_control(elapsed);
        self.usage.record_wait(elapsed);
        self.controls.push(Probe::new(id, 0.0, elapsed))?;

        self.oracle.events.notify(ControlProbeSent {
            id,
            observed_elapsed: elapsed,
        });

        trace!(%id, elapsed, "control probe measured");

        if self.baseline != Baseline::Accepted {
            if elapsed > delay {
                if self.baseline == Baseline::Unmeasured {
                    debug!(elapsed, delay, "baseline slower than the first delay; re-measuring");
                    self.baseline = Baseline::Remeasuring;
                    return Ok(ControlStep::Remeasure);
                }

                debug!(elapsed, delay, "baseline still too slow to measure against");

                return Ok(ControlStep::Finished(self.conclude(Verdict::inconclusive(
                    InconclusiveReason::SlowBaseline,
                    self.usage.probes_sent(),
                    self.statistics.clone(),
                ))));
            }

            self.baseline = Baseline::Accepted;
        }

        self.pending_control = Some(self.controls.len() - 1);

        Ok(ControlStep::Proceed)
    }

    fn control_failed(&mut self, error: BlindTimingError) -> Result<ControlStep, BlindTimingError> {
        match error.kind() {
            ErrorKind::Transport => {
                warn!(%error, "control probe failed; the paired probe can't anchor a streak");

                self.statistics.update_from_error(&error);
                self.pending_control = None;

                Ok(ControlStep::Proceed)
            }
            ErrorKind::Configuration => {
                error!(%error, "control sender is misconfigured");
                Err(error)
            }
            kind => {
                error!(%error, "control probe failed; aborting");
                Ok(ControlStep::Finished(
                    self.conclude_aborted(AbortReason::Sender(kind)),
                ))
            }
        }
    }

    /// record the outcome of the injected probe for `delay`
    ///
    /// returns a verdict once the run reaches a terminal state
    pub(crate) fn record(
        &mut self,
        delay: f64,
        result: Result<f64, BlindTimingError>,
    ) -> Result<Option<Verdict>, BlindTimingError> {
        let id = ProbeId::new(self.next_id);
        self.next_id += 1;

        let paired_control = self.pending_control.take();

        let elapsed = match result {
            Ok(elapsed) => elapsed,
            Err(error) => return self.probe_failed(id, delay, error),
        };

        if !elapsed.is_finite() || elapsed < 0.0 {
            let error = BlindTimingError::InvalidMeasurement {
                requested: delay,
                observed: elapsed,
            };

            error!(%error, "sender reported an invalid measurement");

            return Ok(Some(self.conclude_aborted(AbortReason::Sender(error.kind()))));
        }

        let probe = Probe::new(id, delay, elapsed);

        self.series.push(probe)?;
        self.paired_controls.push(paired_control);
        self.previous_delay = Some(delay);
        self.usage.record_probe(elapsed);
        self.statistics.update_from_probe(elapsed);

        let consistent = self.oracle.tolerance.accepts(delay, elapsed);

        self.oracle.events.notify(ProbeSent { probe, consistent });

        if !consistent {
            trace!(%id, delay, elapsed, "probe inconsistent with requested delay; streak reset");

            self.streak_start = None;
            self.regression.reset();

            return Ok(None);
        }

        let position = self.series.len() - 1;

        let start = match self.streak_start {
            Some(start) if self.extends_streak(position, elapsed) => start,
            _ => {
                self.regression.reset();
                position
            }
        };

        self.streak_start = Some(start);
        self.regression.add(delay, elapsed);

        let length = position - start + 1;

        trace!(%id, delay, elapsed, length, "consistent probe");

        if length < self.oracle.threshold.required_probes().max(2) {
            return Ok(None);
        }

        if !self.control_guard_passes(start, position) {
            debug!(%id, "injected latency isn't outgrowing the control series");
            return Ok(None);
        }

        if let Some(check) = self.oracle.regression.as_ref() {
            if !check.accepts(&self.regression) {
                debug!(%id, "streak doesn't fit the requested delays");
                return Ok(None);
            }
        }

        Ok(Some(self.conclude(Verdict::confirmed(
            probe,
            self.usage.probes_sent(),
            self.statistics.clone(),
        ))))
    }

    fn probe_failed(
        &mut self,
        id: ProbeId,
        delay: f64,
        error: BlindTimingError,
    ) -> Result<Option<Verdict>, BlindTimingError> {
        match &error {
            BlindTimingError::Transport { kind, .. } => {
                warn!(%id, delay, %error, "probe skipped");

                self.statistics.update_from_error(&error);
                self.statistics.update_from_skip(delay);
                self.usage.record_probe(delay);
                self.previous_delay = Some(delay);

                self.oracle.events.notify(ProbeSkipped {
                    id,
                    requested_delay: delay,
                    kind: *kind,
                });

                Ok(None)
            }
            _ if error.kind() == ErrorKind::Configuration => {
                error!(%id, %error, "sender is misconfigured");
                Err(error)
            }
            _ => {
                error!(%id, %error, "probe failed; aborting");
                Ok(Some(self.conclude_aborted(AbortReason::Sender(error.kind()))))
            }
        }
    }

    // a consistent probe extends the streak only if it took longer than the last member
    fn extends_streak(&self, position: usize, elapsed: f64) -> bool {
        position
            .checked_sub(1)
            .and_then(|previous| self.series.get(previous))
            .is_some_and(|previous| elapsed > previous.observed_elapsed())
    }

    fn control_guard_passes(&self, start: usize, end: usize) -> bool {
        if !self.guarded {
            return true;
        }

        let (Some(first), Some(last)) = (self.series.get(start), self.series.get(end)) else {
            return false;
        };

        let paired = |position: usize| {
            self.paired_controls
                .get(position)
                .copied()
                .flatten()
                .and_then(|control| self.controls.get(control))
        };

        let (Some(first_control), Some(last_control)) = (paired(start), paired(end)) else {
            trace!("missing control measurement at a streak endpoint");
            return false;
        };

        let injected_growth = last.observed_elapsed() - first.observed_elapsed();
        let control_growth = last_control.observed_elapsed() - first_control.observed_elapsed();
        let requested_growth = last.requested_delay() - first.requested_delay();

        injected_growth - control_growth >= self.oracle.tolerance.lower() * requested_growth
    }

    /// the budget ran out before anything was confirmed
    pub(crate) fn exhausted(&self) -> Verdict {
        self.conclude(Verdict::inconclusive(
            InconclusiveReason::BudgetExhausted,
            self.usage.probes_sent(),
            self.statistics.clone(),
        ))
    }

    /// the run was stopped from outside or by an unrecoverable sender failure
    pub(crate) fn conclude_aborted(&self, reason: AbortReason) -> Verdict {
        self.conclude(Verdict::aborted(
            reason,
            self.usage.probes_sent(),
            self.statistics.clone(),
        ))
    }

    fn conclude(&self, verdict: Verdict) -> Verdict {
        debug!(%verdict, "verification finished");

        self.oracle.events.notify(VerificationFinished {
            state: verdict.state(),
            probes_sent: verdict.probes_sent(),
        });

        verdict
    }
}
