use tracing::{instrument, trace};

use super::verification::{ControlStep, Verification};
use super::TimingOracle;
use crate::error::BlindTimingError;
use crate::senders::ProbeSender;
use crate::verdict::{AbortReason, Verdict};

impl TimingOracle {
    /// run a verification against `sender`
    ///
    /// blocks for as long as the probes take; at most the budget's total wait plus the
    /// sender's own overhead
    ///
    /// # Errors
    ///
    /// only configuration errors are returned as `Err`. Transport failures skip the probe,
    /// other sender failures and cancellation end the run with an aborted [`Verdict`].
    #[instrument(skip_all, level = "trace")]
    pub fn verify<S>(&self, sender: &mut S) -> Result<Verdict, BlindTimingError>
    where
        S: ProbeSender,
    {
        self.run_blocking(sender, None)
    }

    /// run a verification against `sender`, pairing every injected probe with a control
    /// probe sent through `control` just before it
    ///
    /// `control` is always asked for a delay of `0`. Both senders usually target the same
    /// endpoint; the control sender leaves the parameter's original value in place.
    ///
    /// # Errors
    ///
    /// see [`TimingOracle::verify`]
    #[instrument(skip_all, level = "trace")]
    pub fn verify_with_control<S, C>(
        &self,
        sender: &mut S,
        control: &mut C,
    ) -> Result<Verdict, BlindTimingError>
    where
        S: ProbeSender,
        C: ProbeSender,
    {
        self.run_blocking(sender, Some(control))
    }

    fn run_blocking(
        &self,
        sender: &mut dyn ProbeSender,
        mut control: Option<&mut dyn ProbeSender>,
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
                    let measured = control.send(0.0);

                    match run.record_control(delay, measured)? {
                        ControlStep::Proceed => break,
                        ControlStep::Remeasure => {
                            if self.cancellation.is_cancelled() {
                                return Ok(run.conclude_aborted(AbortReason::Cancelled));
                            }
                        }
                        ControlStep::Finished(verdict) => return Ok(verdict),
                    }
                }
            }

            trace!(delay, "sending probe");

            let measured = sender.send(delay);

            if let Some(verdict) = run.record(delay, measured)? {
                return Ok(verdict);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::budget::{AlertThreshold, Budget};
    use crate::error::{ErrorKind, TransportErrorKind};
    use crate::events::{EventPublisher, ProbeSkipped, VerificationFinished};
    use crate::oracle::{RegressionCheck, Tolerance};
    use crate::sequencers::LinearSequencer;
    use crate::verdict::{InconclusiveReason, OracleState};

    /// adapt a plain latency model into a sender
    fn sender(
        mut latency: impl FnMut(f64) -> f64,
    ) -> impl FnMut(f64) -> Result<f64, BlindTimingError> {
        move |delay| Ok(latency(delay))
    }

    fn oracle(lower: f64, budget: Budget) -> TimingOracle {
        TimingOracle::builder()
            .tolerance(Tolerance::new(lower, None).unwrap())
            .sequencer(LinearSequencer::new(5.0, 5.0).unwrap())
            .budget(budget)
            .build()
            .unwrap()
    }

    /// a target that sleeps exactly as long as asked is confirmed by the second probe
    #[test]
    fn perfect_sender_confirms_within_two_probes() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());

        let verdict = oracle.verify(&mut sender(|delay| delay)).unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 2);
        assert_eq!(verdict.evidence_probe().unwrap().requested_delay(), 10.0);
        assert_eq!(verdict.state(), OracleState::Confirmed);
    }

    /// 5s -> 4.1s and 10s -> 8.7s with a 0.8 lower tolerance is a confirmed signal
    #[test]
    fn slightly_fast_but_tracking_target_is_confirmed() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());

        let mut sender = sender(|delay| if delay < 7.0 { 4.1 } else { 8.7 });
        let verdict = oracle.verify(&mut sender).unwrap();

        assert!(verdict.is_confirmed());
        let evidence = verdict.evidence_probe().unwrap();
        assert_eq!(evidence.requested_delay(), 10.0);
        assert!((evidence.observed_elapsed() - 8.7).abs() < f64::EPSILON);
    }

    /// a target that never slows down runs out of budget without a verdict
    #[test]
    fn flat_latency_is_inconclusive() {
        let oracle = oracle(0.8, Budget::new(3, 60.0).unwrap());

        let verdict = oracle.verify(&mut sender(|_| 0.2)).unwrap();

        assert!(!verdict.is_confirmed());
        assert!(!verdict.is_aborted());
        assert_eq!(verdict.probes_sent(), 3);
        assert_eq!(
            verdict.inconclusive_reason(),
            Some(InconclusiveReason::BudgetExhausted)
        );
    }

    /// one stalled response doesn't confirm, wherever it lands in the run
    #[test]
    fn single_stall_is_rejected() {
        for stalled_call in 0..4 {
            let oracle = oracle(0.8, Budget::new(4, 200.0).unwrap());

            let mut calls = 0;
            let mut sender = sender(|_| {
                let elapsed = if calls == stalled_call { 30.0 } else { 0.2 };
                calls += 1;
                elapsed
            });

            let verdict = oracle.verify(&mut sender).unwrap();

            assert_eq!(
                verdict.state(),
                OracleState::Inconclusive,
                "stall on call {stalled_call}"
            );
        }
    }

    /// a consistent probe that isn't slower than the previous one restarts the streak
    #[test]
    fn non_increasing_elapsed_restarts_streak() {
        let oracle = oracle(0.5, Budget::new(4, 200.0).unwrap());

        // 5 -> 20 and 10 -> 12 are both consistent, but 12 < 20
        let mut sender = sender(|delay| match delay as u32 {
            5 => 20.0,
            10 => 12.0,
            _ => delay + 1.0,
        });

        let verdict = oracle.verify(&mut sender).unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);
        assert_eq!(verdict.evidence_probe().unwrap().requested_delay(), 15.0);
    }

    /// neither limit of the budget is ever overrun
    #[test]
    fn budget_is_respected() {
        // probe limit
        let oracle = oracle(0.8, Budget::new(4, 1000.0).unwrap());
        let mut calls = 0;
        let verdict = oracle
            .verify(&mut sender(|_| {
                calls += 1;
                0.1
            }))
            .unwrap();
        assert_eq!(calls, 4);
        assert_eq!(verdict.probes_sent(), 4);

        // wait limit; an upper bound makes every probe inconsistent
        let oracle = TimingOracle::builder()
            .tolerance(Tolerance::new(0.8, Some(1.2)).unwrap())
            .sequencer(LinearSequencer::new(5.0, 5.0).unwrap())
            .budget(Budget::new(10, 50.0).unwrap())
            .build()
            .unwrap();

        let mut calls = 0;
        let verdict = oracle
            .verify(&mut sender(|delay| {
                calls += 1;
                delay * 3.0
            }))
            .unwrap();

        // 15s + 30s spent; a third probe would need 15 more
        assert_eq!(calls, 2);
        assert!(verdict.statistics().seconds_waited() <= 50.0);
        assert_eq!(
            verdict.inconclusive_reason(),
            Some(InconclusiveReason::BudgetExhausted)
        );
    }

    /// a transport error on one probe is skipped without breaking the run
    #[test]
    fn transport_error_is_skipped() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());

        let skipped = Arc::new(AtomicUsize::new(0));
        let counter = skipped.clone();
        oracle.events().subscribe(move |event: ProbeSkipped| {
            assert_eq!(event.requested_delay, 5.0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut first = true;
        let mut sender = |delay: f64| {
            if first {
                first = false;
                return Err(BlindTimingError::transport(
                    TransportErrorKind::Connect(None),
                    "connection reset",
                ));
            }
            Ok(delay + 0.05)
        };

        let verdict = oracle.verify(&mut sender).unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);
        assert_eq!(verdict.statistics().skipped(), 1);
        assert_eq!(verdict.statistics().connection_errors(), 1);
        assert_eq!(skipped.load(Ordering::SeqCst), 1);
    }

    /// a skipped probe in the middle of a streak neither extends nor breaks it
    #[test]
    fn transport_error_inside_streak_is_neutral() {
        let oracle = oracle(0.8, Budget::new(4, 100.0).unwrap());

        let mut sender = |delay: f64| {
            if (delay - 10.0).abs() < f64::EPSILON {
                return Err(BlindTimingError::transport(
                    TransportErrorKind::Timeout(None),
                    "operation timed out",
                ));
            }
            Ok(delay + 0.05)
        };

        let verdict = oracle.verify(&mut sender).unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);
        assert_eq!(verdict.statistics().skipped(), 1);
        assert!((verdict.evidence_probe().unwrap().requested_delay() - 15.0).abs() < 1e-9);
    }

    /// an inconsistent probe after a skip still resets the streak
    #[test]
    fn inconsistent_probe_after_skip_resets_streak() {
        let five_probes = oracle(0.8, Budget::new(5, 100.0).unwrap());

        let mut sender = |delay: f64| {
            if (delay - 10.0).abs() < f64::EPSILON {
                return Err(BlindTimingError::transport(
                    TransportErrorKind::Connect(None),
                    "connection reset",
                ));
            }
            if (delay - 15.0).abs() < f64::EPSILON {
                return Ok(0.2);
            }
            Ok(delay + 0.05)
        };

        let verdict = five_probes.verify(&mut sender).unwrap();

        // the 5s probe is forgotten; 20s and 25s form a new streak
        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 5);
        assert_eq!(verdict.statistics().skipped(), 1);
        assert!((verdict.evidence_probe().unwrap().requested_delay() - 25.0).abs() < 1e-9);

        // without the fifth probe, 20s alone can't confirm
        let four_probes = oracle(0.8, Budget::new(4, 100.0).unwrap());
        let verdict = four_probes.verify(&mut sender).unwrap();

        assert_eq!(verdict.state(), OracleState::Inconclusive);
        assert_eq!(
            verdict.inconclusive_reason(),
            Some(InconclusiveReason::BudgetExhausted)
        );
    }

    /// configuration errors surface as `Err`; other failures abort with a verdict
    #[test]
    fn sender_errors_by_kind() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());

        let mut misconfigured = |_: f64| -> Result<f64, BlindTimingError> {
            Err(BlindTimingError::SenderNotInitialized {
                name: String::from("test"),
            })
        };
        assert!(oracle.verify(&mut misconfigured).is_err());

        let mut nonsense = sender(|_| f64::NAN);
        let verdict = oracle.verify(&mut nonsense).unwrap();
        assert!(verdict.is_aborted());
        assert_eq!(
            verdict.abort_reason(),
            Some(AbortReason::Sender(ErrorKind::Request))
        );
    }

    /// a cancelled token stops the run before the first probe, or between probes
    #[test]
    fn cancellation_aborts() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());
        let token = oracle.cancellation().clone();

        let mut calls = 0;
        let mut tracking = sender(|delay| {
            calls += 1;
            token.cancel();
            delay
        });

        let verdict = oracle.verify(&mut tracking).unwrap();
        assert!(verdict.is_aborted());
        assert_eq!(verdict.abort_reason(), Some(AbortReason::Cancelled));
        assert_eq!(verdict.probes_sent(), 1);

        // already cancelled; nothing is sent
        let verdict = oracle.verify(&mut sender(|_| unreachable!())).unwrap();
        assert_eq!(verdict.probes_sent(), 0);
        assert_eq!(verdict.state(), OracleState::Aborted);
        drop(tracking);
        assert_eq!(calls, 1);
    }

    /// a server that slows down on every request, injected or not, isn't confirmed
    #[test]
    fn generic_slowdown_is_rejected_with_control() {
        let oracle = oracle(0.8, Budget::new(4, 200.0).unwrap());

        // every request, control or injected, takes 3s longer than the one before
        let clock = Rc::new(Cell::new(0.0));

        let injected_clock = clock.clone();
        let mut injected = sender(move |_| {
            injected_clock.set(injected_clock.get() + 3.0);
            injected_clock.get()
        });

        let control_clock = clock;
        let mut control = sender(move |_| {
            control_clock.set(control_clock.get() + 3.0);
            control_clock.get()
        });

        // without the control series this looks like a perfect signal
        let unguarded = oracle.verify(&mut sender({
            let mut elapsed = 3.0;
            move |_| {
                elapsed += 6.0;
                elapsed
            }
        }));
        assert!(unguarded.unwrap().is_confirmed());

        let verdict = oracle.verify_with_control(&mut injected, &mut control).unwrap();

        assert!(!verdict.is_confirmed());
        assert_eq!(verdict.statistics().control_probes(), 4);
    }

    /// a real signal still confirms with a control series
    #[test]
    fn real_signal_confirms_with_control() {
        let oracle = oracle(0.8, Budget::new(4, 40.0).unwrap());

        let verdict = oracle
            .verify_with_control(&mut sender(|delay| delay + 0.1), &mut sender(|_| 0.1))
            .unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 2);
        assert_eq!(verdict.statistics().control_probes(), 2);
    }

    /// a missing control measurement keeps its probe from anchoring a confirmation
    #[test]
    fn failed_control_blocks_confirmation_at_that_endpoint() {
        let oracle = oracle(0.8, Budget::new(4, 100.0).unwrap());

        let mut control_calls = 0;
        let mut control = |_: f64| {
            control_calls += 1;
            if control_calls == 2 {
                return Err(BlindTimingError::transport(
                    TransportErrorKind::Timeout(None),
                    "timed out",
                ));
            }
            Ok(0.1)
        };

        let verdict = oracle
            .verify_with_control(&mut sender(|delay| delay + 0.1), &mut control)
            .unwrap();

        // probe 2 has no control pair, so the streak 5 -> 10 -> 15 confirms at 15
        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);
        assert_eq!(verdict.statistics().timeouts(), 1);
    }

    /// a slow baseline is re-measured once, then the run gives up
    #[test]
    fn slow_baseline_is_inconclusive() {
        let oracle = oracle(0.8, Budget::new(4, 200.0).unwrap());

        let mut injected_calls = 0;
        let mut control_calls = 0;

        let verdict = oracle
            .verify_with_control(
                &mut sender(|delay| {
                    injected_calls += 1;
                    delay
                }),
                &mut sender(|_| {
                    control_calls += 1;
                    9.0
                }),
            )
            .unwrap();

        assert_eq!(
            verdict.inconclusive_reason(),
            Some(InconclusiveReason::SlowBaseline)
        );
        assert_eq!(verdict.probes_sent(), 0);
        assert_eq!(control_calls, 2);
        assert_eq!(injected_calls, 0);

        // a one-off slow baseline recovers on the re-measurement
        let mut baselines = vec![0.1, 9.0];
        let verdict = oracle
            .verify_with_control(
                &mut sender(|delay| delay + 0.1),
                &mut sender(move |_| baselines.pop().unwrap_or(0.1)),
            )
            .unwrap();
        assert!(verdict.is_confirmed());
    }

    /// the regression check rejects latency that grows at the wrong rate
    #[test]
    fn regression_check_rejects_wrong_slope() {
        let build = |regression: Option<RegressionCheck>| {
            let builder = TimingOracle::builder()
                .sequencer(LinearSequencer::new(5.0, 5.0).unwrap())
                .budget(Budget::new(3, 1000.0).unwrap());

            match regression {
                Some(check) => builder.regression_check(check).build().unwrap(),
                None => builder.build().unwrap(),
            }
        };

        let mut tripled = |delay: f64| Ok::<_, BlindTimingError>(delay * 3.0);

        assert!(build(None).verify(&mut tripled).unwrap().is_confirmed());

        let verdict = build(Some(RegressionCheck::default()))
            .verify(&mut tripled)
            .unwrap();
        assert!(!verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);

        let verdict = build(Some(RegressionCheck::default()))
            .verify(&mut sender(|delay| delay + 0.2))
            .unwrap();
        assert!(verdict.is_confirmed());
    }

    /// higher alert thresholds need longer streaks
    #[test]
    fn high_threshold_needs_three_probes() {
        let oracle = TimingOracle::builder()
            .sequencer(LinearSequencer::new(5.0, 5.0).unwrap())
            .budget(Budget::new(4, 100.0).unwrap())
            .alert_threshold(AlertThreshold::High)
            .build()
            .unwrap();

        let verdict = oracle.verify(&mut sender(|delay| delay)).unwrap();

        assert!(verdict.is_confirmed());
        assert_eq!(verdict.probes_sent(), 3);
    }

    /// every run announces how it ended
    #[test]
    fn finished_event_is_published() {
        let oracle = oracle(0.8, Budget::new(3, 60.0).unwrap());

        let finished = Arc::new(AtomicUsize::new(0));
        let counter = finished.clone();
        oracle.events().subscribe(move |event: VerificationFinished| {
            assert_eq!(event.state, OracleState::Inconclusive);
            assert_eq!(event.probes_sent, 3);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        oracle.verify(&mut sender(|_| 0.2)).unwrap();

        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
