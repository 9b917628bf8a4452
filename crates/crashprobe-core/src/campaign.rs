//! Campaign driver.
//!
//! `Idle → Calibrating (time offset only) → Iterating → Exhausted | Corrupted | AbortedByOperator`
//!
//! One control task runs iterations back to back. Inside an iteration the
//! armed trigger (a probe task or an alarm) races the monitored operation in
//! a `select!` biased toward the trigger; the kill itself is always sent
//! from the control task through the controller, never from the probe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crashprobe_process::{
    Delivery, EventBus, ExitStatus, KillSignal, ProcessController, ProcessHandle,
};
use crashprobe_trigger::{
    Alarm, ArmedProbe, Calibration, CountingProbe, LogEventProbe, OffsetSampler, Trigger,
    TriggerError,
};
use crashprobe_verify::{
    CommandProbe, Consistency, Expectation, ReadyCheck, RecoveryVerifier, TargetError,
    TargetProbe, Verdict,
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;

use crate::analytics::{AnalyticsSummary, CampaignAnalytics};
use crate::capsule::ReproductionCapsule;
use crate::config::{CampaignSpec, MonitoredOperation, SuiteSpec, TriggerMode};
use crate::error::HarnessError;
use crate::iteration::{unix_nanos, Iteration, Outcome};
use crate::limits::{ResourceChecker, StopReason};

/// Attempts a fresh start gets before the campaign gives up.
const FRESH_START_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignState {
    Idle,
    Calibrating,
    Iterating,
    Exhausted,
    Corrupted,
    AbortedByOperator,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignState::Exhausted | CampaignState::Corrupted | CampaignState::AbortedByOperator
        )
    }
}

/// Cooperative cancellation, honoured between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignResult {
    pub name: String,
    pub state: CampaignState,
    pub stop_reason: StopReason,
    pub iterations: Vec<Iteration>,
    pub analytics: AnalyticsSummary,
    /// Expectation every restart was verified against.
    pub expected: Expectation,
    pub calibration: Option<Calibration>,
    /// Set when the campaign ended `Corrupted`.
    pub capsule: Option<ReproductionCapsule>,
}

impl CampaignResult {
    pub fn corrupted_iteration(&self) -> Option<&Iteration> {
        self.iterations
            .iter()
            .find(|iteration| iteration.outcome.is_corrupted())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub planned: usize,
    pub results: Vec<CampaignResult>,
}

impl SuiteResult {
    /// Every planned campaign ran and ended exhausted.
    pub fn passed(&self) -> bool {
        self.results.len() == self.planned
            && self
                .results
                .iter()
                .all(|result| result.state == CampaignState::Exhausted)
    }
}

/// A trigger armed for one iteration. Dropping it disarms.
enum ArmedTrigger {
    Probe {
        probe: ArmedProbe,
        fired: oneshot::Receiver<u64>,
    },
    Alarm(Alarm),
}

impl ArmedTrigger {
    /// Resolves when the trigger fires. A probe that can no longer fire
    /// never resolves.
    async fn fired(&mut self) {
        match self {
            ArmedTrigger::Probe { fired, .. } => {
                if fired.await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            ArmedTrigger::Alarm(alarm) => {
                alarm.await;
            }
        }
    }

    /// Occurrences the probe counted; None for alarms.
    fn disarm(self) -> Option<u64> {
        match self {
            ArmedTrigger::Probe { probe, .. } => Some(probe.disarm()),
            ArmedTrigger::Alarm(_) => None,
        }
    }
}

/// How the kill race of one iteration ended. The process is reaped.
struct RaceReport {
    outcome: Outcome,
    fired_at_ns: Option<u64>,
    exit: Option<ExitStatus>,
    events_observed: Option<u64>,
}

enum Plan {
    Count { event_name: String },
    Offset {
        calibration: Calibration,
        sampler: OffsetSampler,
    },
}

impl Plan {
    fn trigger(&self, index: u64) -> Result<Trigger, TriggerError> {
        match self {
            Plan::Count { event_name } => Trigger::event_count(event_name.clone(), index),
            Plan::Offset {
                calibration,
                sampler,
            } => sampler.trigger(calibration, index),
        }
    }
}

struct Progress {
    iterations: Vec<Iteration>,
    analytics: CampaignAnalytics,
    expected: Expectation,
    calibration: Option<Calibration>,
    capsule: Option<ReproductionCapsule>,
}

impl Progress {
    fn new(expected: Expectation) -> Self {
        Self {
            iterations: Vec::new(),
            analytics: CampaignAnalytics::new(),
            expected,
            calibration: None,
            capsule: None,
        }
    }
}

/// Drives one campaign against one target.
pub struct CampaignDriver<P, Q> {
    spec: CampaignSpec,
    controller: ProcessController,
    probe: P,
    counter: Q,
    verifier: RecoveryVerifier,
    cancel: CancelFlag,
    state: CampaignState,
}

impl CampaignDriver<CommandProbe, LogEventProbe> {
    /// Driver with command-based target queries and log-line counting.
    pub fn from_spec(spec: CampaignSpec) -> Self {
        let probe = CommandProbe::new(spec.probes.clone());
        Self::new(spec, probe, |bus| LogEventProbe::new(bus.clone()))
    }
}

impl<P: TargetProbe, Q: CountingProbe> CampaignDriver<P, Q> {
    /// `counter` builds the counting probe from the controller's output bus.
    pub fn new(spec: CampaignSpec, probe: P, counter: impl FnOnce(&EventBus) -> Q) -> Self {
        let controller = ProcessController::new(spec.launch.clone());
        let counter = counter(controller.events());
        let verifier = RecoveryVerifier::new(spec.verify.clone());
        Self {
            spec,
            controller,
            probe,
            counter,
            verifier,
            cancel: CancelFlag::new(),
            state: CampaignState::Idle,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn spec(&self) -> &CampaignSpec {
        &self.spec
    }

    pub fn state(&self) -> CampaignState {
        self.state
    }

    pub fn controller(&self) -> &ProcessController {
        &self.controller
    }

    /// Run the campaign to a terminal state.
    ///
    /// Corruption is a result, not an error: `Err` means the harness itself
    /// could not carry on.
    pub async fn run(&mut self) -> Result<CampaignResult, HarnessError> {
        let span = tracing::info_span!("campaign", name = %self.spec.name);
        self.drive().instrument(span).await
    }

    /// Run exactly one iteration with the trigger recorded in `capsule`.
    pub async fn replay(
        &mut self,
        capsule: &ReproductionCapsule,
    ) -> Result<CampaignResult, HarnessError> {
        self.spec.validate()?;
        self.check_capsule(capsule)?;

        let checker = ResourceChecker::new(self.spec.limits.clone());
        let mut progress = Progress::new(capsule.expected.clone());
        self.state = CampaignState::Iterating;

        let span = tracing::info_span!("replay", name = %self.spec.name, iteration = capsule.iteration);
        let iteration = self
            .run_iteration(capsule.iteration, capsule.trigger.clone(), &capsule.expected)
            .instrument(span)
            .await?;
        progress.analytics.record(&iteration);

        let reproduced = match &iteration.outcome {
            Outcome::Corrupted { reason } => Some(reason.clone()),
            _ => None,
        };
        progress.iterations.push(iteration);

        Ok(match reproduced {
            Some(reason) => {
                progress.capsule = Some(ReproductionCapsule {
                    reason,
                    ..capsule.clone()
                });
                self.finish(CampaignState::Corrupted, StopReason::CorruptionFound, progress, &checker)
            }
            None => self.finish(CampaignState::Exhausted, StopReason::ReplayComplete, progress, &checker),
        })
    }

    async fn drive(&mut self) -> Result<CampaignResult, HarnessError> {
        self.spec.validate()?;
        self.state = CampaignState::Idle;
        let checker = ResourceChecker::new(self.spec.limits.clone());
        let mut progress = Progress::new(self.spec.expected.clone().unwrap_or(Expectation::Any));

        if self.cancel.is_cancelled() {
            return Ok(self.finish(
                CampaignState::AbortedByOperator,
                StopReason::UserAborted,
                progress,
                &checker,
            ));
        }

        progress.expected = self.baseline().await?;
        tracing::info!(expected = ?progress.expected, "baseline healthy");

        let plan = match &self.spec.trigger {
            TriggerMode::EventCount { event_name } => Plan::Count {
                event_name: event_name.clone(),
            },
            TriggerMode::TimeOffset => {
                self.state = CampaignState::Calibrating;
                let calibration = self.calibrate().await?;
                progress.analytics.set_window(calibration.window_ns());
                progress.calibration = Some(calibration);
                Plan::Offset {
                    calibration,
                    sampler: OffsetSampler::Seeded {
                        seed: self.spec.seed,
                    },
                }
            }
        };

        self.state = CampaignState::Iterating;
        let mut index = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(self.finish(
                    CampaignState::AbortedByOperator,
                    StopReason::UserAborted,
                    progress,
                    &checker,
                ));
            }
            if let Some(reason) = checker.check(index) {
                return Ok(self.finish(CampaignState::Exhausted, reason, progress, &checker));
            }

            index += 1;
            let trigger = plan.trigger(index)?;
            let iteration = self
                .run_iteration(index, trigger, &progress.expected)
                .await?;
            progress.analytics.record(&iteration);
            tracing::info!(
                index,
                trigger = %iteration.trigger,
                outcome = iteration.outcome.label(),
                "iteration finished"
            );

            let outcome = iteration.outcome.clone();
            let trigger = iteration.trigger.clone();
            progress.iterations.push(iteration);

            match outcome {
                Outcome::Corrupted { reason } => {
                    tracing::error!(index, %trigger, %reason, "corruption found");
                    progress.capsule = Some(ReproductionCapsule {
                        campaign: self.spec.name.clone(),
                        seed: self.spec.seed,
                        iteration: index,
                        trigger,
                        operation: self.spec.operation,
                        signal: self.spec.signal,
                        expected: progress.expected.clone(),
                        reason,
                    });
                    return Ok(self.finish(
                        CampaignState::Corrupted,
                        StopReason::CorruptionFound,
                        progress,
                        &checker,
                    ));
                }
                Outcome::FinishedNaturally if matches!(plan, Plan::Count { .. }) => {
                    return Ok(self.finish(
                        CampaignState::Exhausted,
                        StopReason::TargetFinishedNaturally,
                        progress,
                        &checker,
                    ));
                }
                Outcome::Aborted | Outcome::FinishedNaturally => {}
            }
        }
    }

    fn finish(
        &mut self,
        state: CampaignState,
        stop_reason: StopReason,
        progress: Progress,
        checker: &ResourceChecker,
    ) -> CampaignResult {
        self.state = state;
        let mut analytics = progress.analytics;
        analytics.set_elapsed(checker.elapsed_secs());
        tracing::info!(
            ?state,
            %stop_reason,
            iterations = progress.iterations.len(),
            "campaign finished"
        );
        CampaignResult {
            name: self.spec.name.clone(),
            state,
            stop_reason,
            iterations: progress.iterations,
            analytics: analytics.summary(),
            expected: progress.expected,
            calibration: progress.calibration,
            capsule: progress.capsule,
        }
    }

    fn check_capsule(&self, capsule: &ReproductionCapsule) -> Result<(), HarnessError> {
        let spec_counts = matches!(self.spec.trigger, TriggerMode::EventCount { .. });
        if capsule.trigger.is_event_count() != spec_counts {
            return Err(HarnessError::CapsuleMismatch(format!(
                "trigger {} does not fit the campaign's trigger mode",
                capsule.trigger
            )));
        }
        if capsule.operation != self.spec.operation {
            return Err(HarnessError::CapsuleMismatch(format!(
                "capsule monitors {}, campaign monitors {}",
                capsule.operation, self.spec.operation
            )));
        }
        if capsule.signal != self.spec.signal {
            return Err(HarnessError::CapsuleMismatch(format!(
                "capsule kills with {}, campaign with {}",
                capsule.signal, self.spec.signal
            )));
        }
        Ok(())
    }

    /// Start once before any kill: the target must be healthy, and its state
    /// becomes the expectation unless one is configured.
    async fn baseline(&mut self) -> Result<Expectation, HarnessError> {
        let mut handle = self.start_fresh().await?;
        let inspected = self.inspect_baseline(handle.pid()).await;
        self.controller
            .stop_graceful(&mut handle, self.spec.launch.stop_timeout())
            .await;
        inspected
    }

    async fn inspect_baseline(&self, pid: u32) -> Result<Expectation, HarnessError> {
        if let Consistency::Inconsistent(reason) = self.probe.consistency(pid).await? {
            return Err(HarnessError::UnhealthyBaseline(reason));
        }
        if let Some(expected) = &self.spec.expected {
            return Ok(expected.clone());
        }
        match self.probe.observable_state(pid).await {
            Ok(snapshot) => {
                let monotonic = self.spec.operation == MonitoredOperation::Workload;
                Ok(Expectation::from_baseline(snapshot, monotonic))
            }
            Err(TargetError::NotConfigured(_)) => Ok(Expectation::Any),
            Err(err) => Err(err.into()),
        }
    }

    /// Time one uninterrupted run of the monitored operation.
    async fn calibrate(&mut self) -> Result<Calibration, HarnessError> {
        let stop_timeout = self.spec.launch.stop_timeout();
        let calibration = match self.spec.operation {
            MonitoredOperation::Startup => {
                let mut handle = self.start_fresh().await?;
                let calibration = Calibration::measure(handle.started_at(), Instant::now());
                self.controller.stop_graceful(&mut handle, stop_timeout).await;
                calibration?
            }
            MonitoredOperation::Shutdown => {
                let mut handle = self.start_fresh().await?;
                let origin = Instant::now();
                self.controller.signal(&mut handle, KillSignal::Terminate)?;
                if let Err(err) = self.controller.wait_exited(&mut handle, stop_timeout).await {
                    self.controller.stop_forceful(&mut handle).await;
                    return Err(err.into());
                }
                Calibration::measure(origin, Instant::now())?
            }
            MonitoredOperation::Workload => {
                let mut handle = self.start_fresh().await?;
                let origin = Instant::now();
                let workload = self.probe.run_workload(handle.pid()).await;
                let end = Instant::now();
                self.controller.stop_graceful(&mut handle, stop_timeout).await;
                workload?;
                Calibration::measure(origin, end)?
            }
        };
        tracing::info!(window = ?calibration.window(), "calibrated");
        Ok(calibration)
    }

    /// Start and wait for readiness, retrying a failed startup once.
    async fn start_fresh(&mut self) -> Result<ProcessHandle, HarnessError> {
        let mut attempt = 1;
        loop {
            match self.controller.start(&ReadyCheck(&self.probe)).await {
                Ok(handle) => return Ok(handle),
                Err(err) if err.is_startup_failure() && attempt < FRESH_START_ATTEMPTS => {
                    tracing::warn!(attempt, "fresh start failed, retrying: {err}");
                    attempt += 1;
                }
                Err(err) if err.is_startup_failure() => {
                    return Err(HarnessError::StartupFailure {
                        attempts: attempt,
                        last: err,
                    })
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn arm(&self, trigger: &Trigger, origin: Instant) -> Result<ArmedTrigger, HarnessError> {
        match trigger {
            Trigger::EventCount {
                event_name,
                threshold,
            } => {
                let (tx, fired) = oneshot::channel();
                let probe = self.counter.arm(
                    event_name,
                    *threshold,
                    Box::new(move |count| {
                        let _ = tx.send(count);
                    }),
                )?;
                Ok(ArmedTrigger::Probe { probe, fired })
            }
            Trigger::TimeOffset { offset_ns, .. } => Ok(ArmedTrigger::Alarm(Alarm::arm(
                origin,
                Duration::from_nanos(*offset_ns),
            ))),
        }
    }

    /// Race, restart, verify, record.
    async fn run_iteration(
        &mut self,
        index: u64,
        trigger: Trigger,
        expected: &Expectation,
    ) -> Result<Iteration, HarnessError> {
        let armed_at_ns = unix_nanos();
        tracing::debug!(index, %trigger, operation = %self.spec.operation, "arming");

        let race = match self.spec.operation {
            MonitoredOperation::Startup => self.race_startup(&trigger).await?,
            MonitoredOperation::Shutdown => self.race_shutdown(&trigger).await?,
            MonitoredOperation::Workload => self.race_workload(&trigger).await?,
        };

        // No instance is live here; the race reaped it.
        let restarted_at_ns = unix_nanos();
        let (verdict, handle) = self
            .verifier
            .restart_and_verify(&mut self.controller, &self.probe, expected)
            .await?;
        if let Some(mut handle) = handle {
            self.controller
                .stop_graceful(&mut handle, self.spec.launch.stop_timeout())
                .await;
        }

        let outcome = match verdict {
            Verdict::Clean => race.outcome,
            Verdict::Corrupted(reason) => Outcome::Corrupted { reason },
        };
        Ok(Iteration {
            index,
            trigger,
            outcome,
            armed_at_ns,
            fired_at_ns: race.fired_at_ns,
            restarted_at_ns: Some(restarted_at_ns),
            exit: race.exit,
            events_observed: race.events_observed,
        })
    }

    /// Kill during startup. Counting probes attach before the spawn; alarms
    /// count from the spawn instant. Readiness is natural completion.
    async fn race_startup(&mut self, trigger: &Trigger) -> Result<RaceReport, HarnessError> {
        let ready_timeout = self.spec.launch.ready_timeout();
        let stop_timeout = self.spec.launch.stop_timeout();
        let mut attempt = 1;

        loop {
            let early = if trigger.is_event_count() {
                Some(self.arm(trigger, Instant::now())?)
            } else {
                None
            };
            let mut handle = self.controller.spawn()?;
            let mut armed = match early {
                Some(armed) => armed,
                None => self.arm(trigger, handle.started_at())?,
            };

            let ready_check = ReadyCheck(&self.probe);
            let race = tokio::select! {
                biased;
                _ = armed.fired() => None,
                ready = self.controller.await_ready(&mut handle, &ready_check, ready_timeout) => Some(ready),
            };

            match race {
                None => return self.deliver_kill(handle, armed).await,
                Some(Ok(())) => {
                    let events_observed = armed.disarm();
                    let exit = self.controller.stop_graceful(&mut handle, stop_timeout).await;
                    return Ok(RaceReport {
                        outcome: Outcome::FinishedNaturally,
                        fired_at_ns: None,
                        exit: Some(exit),
                        events_observed,
                    });
                }
                Some(Err(err)) => {
                    armed.disarm();
                    self.controller.stop_forceful(&mut handle).await;
                    if !err.is_startup_failure() {
                        return Err(err.into());
                    }
                    if attempt >= FRESH_START_ATTEMPTS {
                        return Err(HarnessError::StartupFailure {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    tracing::warn!(attempt, "fresh start failed, retrying: {err}");
                    attempt += 1;
                }
            }
        }
    }

    /// Kill during a graceful shutdown. The stop request is the origin;
    /// the process exiting is natural completion.
    async fn race_shutdown(&mut self, trigger: &Trigger) -> Result<RaceReport, HarnessError> {
        let stop_timeout = self.spec.launch.stop_timeout();
        let mut handle = self.start_fresh().await?;

        let early = if trigger.is_event_count() {
            Some(self.arm(trigger, Instant::now())?)
        } else {
            None
        };
        let origin = Instant::now();
        if let Err(err) = self.controller.signal(&mut handle, KillSignal::Terminate) {
            self.controller.stop_forceful(&mut handle).await;
            return Err(err.into());
        }
        let mut armed = match early {
            Some(armed) => armed,
            None => self.arm(trigger, origin)?,
        };

        let race = tokio::select! {
            biased;
            _ = armed.fired() => None,
            exited = self.controller.wait_exited(&mut handle, stop_timeout) => Some(exited),
        };

        match race {
            None => self.deliver_kill(handle, armed).await,
            Some(Ok(exit)) => Ok(RaceReport {
                outcome: Outcome::FinishedNaturally,
                fired_at_ns: None,
                exit: Some(exit),
                events_observed: armed.disarm(),
            }),
            Some(Err(_)) => {
                tracing::warn!(
                    pid = handle.pid(),
                    ?stop_timeout,
                    "shutdown hung, killing"
                );
                let events_observed = armed.disarm();
                let exit = self.controller.stop_forceful(&mut handle).await;
                Ok(RaceReport {
                    outcome: Outcome::Aborted,
                    fired_at_ns: None,
                    exit: Some(exit),
                    events_observed,
                })
            }
        }
    }

    /// Kill while the workload runs against a ready target. The workload
    /// start is the origin; the workload returning is natural completion.
    async fn race_workload(&mut self, trigger: &Trigger) -> Result<RaceReport, HarnessError> {
        enum Race {
            Fired,
            Done(Result<(), TargetError>),
            Exited(ExitStatus),
        }

        let stop_timeout = self.spec.launch.stop_timeout();
        let mut handle = self.start_fresh().await?;
        let pid = handle.pid();
        let mut armed = self.arm(trigger, Instant::now())?;

        let race = tokio::select! {
            biased;
            _ = armed.fired() => Race::Fired,
            done = self.probe.run_workload(pid) => Race::Done(done),
            exit = handle.exited() => Race::Exited(exit),
        };

        match race {
            Race::Fired => {
                let report = self.deliver_kill(handle, armed).await?;
                // Only a live target can be killed mid-workload.
                if report.outcome == Outcome::FinishedNaturally {
                    return Err(HarnessError::ExitedDuringWorkload(
                        report.exit.unwrap_or(ExitStatus::Lost),
                    ));
                }
                Ok(report)
            }
            Race::Done(Ok(())) => {
                let events_observed = armed.disarm();
                let exit = self.controller.stop_graceful(&mut handle, stop_timeout).await;
                Ok(RaceReport {
                    outcome: Outcome::FinishedNaturally,
                    fired_at_ns: None,
                    exit: Some(exit),
                    events_observed,
                })
            }
            Race::Done(Err(err)) => {
                armed.disarm();
                self.controller.stop_forceful(&mut handle).await;
                Err(err.into())
            }
            Race::Exited(status) => {
                armed.disarm();
                Err(HarnessError::ExitedDuringWorkload(status))
            }
        }
    }

    /// The trigger fired: send the campaign's signal and reap.
    ///
    /// A process found already gone finished before the kill could land.
    async fn deliver_kill(
        &self,
        mut handle: ProcessHandle,
        armed: ArmedTrigger,
    ) -> Result<RaceReport, HarnessError> {
        let fired_at_ns = unix_nanos();
        let delivery = self.controller.signal(&mut handle, self.spec.signal);
        let events_observed = armed.disarm();
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(err) => {
                self.controller.stop_forceful(&mut handle).await;
                return Err(err.into());
            }
        };

        let exit = match self
            .controller
            .wait_exited(&mut handle, self.spec.launch.stop_timeout())
            .await
        {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    pid = handle.pid(),
                    signal = %self.spec.signal,
                    "target outlived the kill signal, escalating"
                );
                self.controller.stop_forceful(&mut handle).await
            }
        };

        let outcome = match delivery {
            Delivery::Delivered => Outcome::Aborted,
            Delivery::AlreadyExited => {
                tracing::info!(pid = handle.pid(), %exit, "target exited before the kill");
                Outcome::FinishedNaturally
            }
        };
        Ok(RaceReport {
            outcome,
            fired_at_ns: Some(fired_at_ns),
            exit: Some(exit),
            events_observed,
        })
    }
}

/// Run the suite's campaigns in order, stopping after the first one that
/// does not end exhausted.
pub async fn run_suite(suite: &SuiteSpec, cancel: CancelFlag) -> Result<SuiteResult, HarnessError> {
    suite.validate()?;
    let mut results = Vec::with_capacity(suite.campaigns.len());

    for spec in &suite.campaigns {
        let mut driver = CampaignDriver::from_spec(spec.clone()).with_cancel_flag(cancel.clone());
        let result = driver.run().await?;
        let exhausted = result.state == CampaignState::Exhausted;
        results.push(result);
        if !exhausted {
            tracing::warn!(suite = %suite.name, campaign = %spec.name, "suite stopped early");
            break;
        }
    }

    Ok(SuiteResult {
        name: suite.name.clone(),
        planned: suite.campaigns.len(),
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!CampaignState::Idle.is_terminal());
        assert!(!CampaignState::Calibrating.is_terminal());
        assert!(!CampaignState::Iterating.is_terminal());
        assert!(CampaignState::Exhausted.is_terminal());
        assert!(CampaignState::Corrupted.is_terminal());
        assert!(CampaignState::AbortedByOperator.is_terminal());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_count_plan_uses_iteration_as_threshold() {
        let plan = Plan::Count {
            event_name: "init".to_string(),
        };
        for index in 1..=5 {
            assert_eq!(plan.trigger(index).unwrap().threshold(), Some(index));
        }
    }

    #[test]
    fn test_offset_plan_stays_in_window() {
        let calibration = Calibration::new(Duration::from_millis(300)).unwrap();
        let plan = Plan::Offset {
            calibration,
            sampler: OffsetSampler::Seeded { seed: 9 },
        };
        for index in 1..=100 {
            match plan.trigger(index).unwrap() {
                Trigger::TimeOffset {
                    window_ns,
                    offset_ns,
                } => {
                    assert_eq!(window_ns, calibration.window_ns());
                    assert!(offset_ns < window_ns);
                }
                other => panic!("unexpected trigger {other}"),
            }
        }
    }

    #[tokio::test]
    async fn test_alarm_trigger_disarms_to_none() {
        let mut armed = ArmedTrigger::Alarm(Alarm::arm(Instant::now(), Duration::ZERO));
        armed.fired().await;
        assert_eq!(armed.disarm(), None);
    }

    fn driver(script: &str) -> CampaignDriver<CommandProbe, LogEventProbe> {
        let launch = crashprobe_process::LaunchSpec::new("/bin/sh").with_args(["-c", script]);
        let trigger = TriggerMode::EventCount {
            event_name: "init".to_string(),
        };
        CampaignDriver::from_spec(CampaignSpec::new("tie-break", launch, trigger))
    }

    fn fired_alarm() -> ArmedTrigger {
        ArmedTrigger::Alarm(Alarm::arm(Instant::now(), Duration::ZERO))
    }

    #[tokio::test]
    async fn test_kill_after_natural_exit_is_finished_naturally() {
        let mut driver = driver("exit 3");
        let mut handle = driver.controller.spawn().unwrap();
        let status = driver
            .controller
            .wait_exited(&mut handle, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, ExitStatus::Code(3));

        let report = driver.deliver_kill(handle, fired_alarm()).await.unwrap();

        assert_eq!(report.outcome, Outcome::FinishedNaturally);
        assert!(report.fired_at_ns.is_some());
        assert_eq!(report.exit, Some(ExitStatus::Code(3)));
        assert_eq!(report.events_observed, None);
    }

    #[tokio::test]
    async fn test_kill_of_live_target_is_aborted() {
        let mut driver = driver("exec sleep 30");
        let handle = driver.controller.spawn().unwrap();

        let report = driver.deliver_kill(handle, fired_alarm()).await.unwrap();

        assert_eq!(report.outcome, Outcome::Aborted);
        assert!(report.fired_at_ns.is_some());
        assert_eq!(report.exit, Some(ExitStatus::Signal(9)));
    }
}
