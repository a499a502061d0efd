use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rquickjs::CatchResultExt;
use tracing::{debug, info, trace};

use crate::binding::SharedTimers;
use crate::config::{DriverConfig, IdleStrategy};
use crate::diagnostics::{DiagnosticsHandle, ErrorOrigin, ScriptError};
use crate::engine::{describe_caught, Engine, JobOutcome};
use crate::error::{HostError, Result};
use crate::timer::{FireOutcome, TimerKey};

/// Whether the driver has more work after a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Continue,
    /// Job queue empty and nothing armed
    Idle,
}

/// Counters for one `run`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriveSummary {
    pub cycles: u64,
    pub jobs_run: u64,
    pub jobs_failed: u64,
    pub timers_fired: u64,
    pub callback_failures: u64,
    /// Stopped by the interrupt flag rather than by running out of work
    pub interrupted: bool,
}

/// Interleaves the engine job queue with the event substrate.
///
/// Each cycle drains every ready job, polls the substrate once, then fires the keys it reported
/// due in order. All script code runs on the calling thread.
pub struct DriverLoop<'a> {
    engine: &'a Engine,
    timers: &'a SharedTimers,
    diagnostics: &'a DiagnosticsHandle,
    config: DriverConfig,
    interrupt: Option<Arc<AtomicBool>>,
    summary: DriveSummary,
}

impl<'a> DriverLoop<'a> {
    pub fn new(
        engine: &'a Engine,
        timers: &'a SharedTimers,
        diagnostics: &'a DiagnosticsHandle,
        config: DriverConfig,
    ) -> Self {
        Self {
            engine,
            timers,
            diagnostics,
            config,
            interrupt: None,
            summary: DriveSummary::default(),
        }
    }

    /// Stop at the next cycle boundary once `flag` is set
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Run cycles until there is no work left, the cycle limit is hit or the interrupt flag is set
    pub fn run(&mut self) -> Result<DriveSummary> {
        loop {
            if self.interrupted() {
                info!(target: "driver", "interrupted after {} cycles", self.summary.cycles);
                self.summary.interrupted = true;
                break;
            }
            if let Some(limit) = self.config.cycle_limit() {
                if self.summary.cycles >= limit {
                    info!(target: "driver", "stopping at cycle limit {}", limit);
                    break;
                }
            }

            if self.run_cycle()? == CycleOutcome::Idle {
                debug!(target: "driver", "idle after {} cycles", self.summary.cycles);
                break;
            }
        }
        Ok(self.summary)
    }

    /// One drain, poll and termination check.
    ///
    /// Fails with [`HostError::Evaluation`] once a module entry suspended in top-level
    /// `await` rejects.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.summary.cycles += 1;

        self.drain_jobs();
        self.check_entry()?;
        self.check_fatal()?;

        let wait = self.poll_wait();
        let due = self.timers.borrow_mut().poll(wait);
        if !due.is_empty() {
            trace!(target: "driver", "cycle {}: {} timers due", self.summary.cycles, due.len());
        }
        for key in due {
            self.fire(key);
        }
        self.check_fatal()?;

        let alive = self.engine.has_pending_jobs() || self.timers.borrow().is_alive();
        if !alive {
            self.check_entry()?;
        }
        Ok(if alive {
            CycleOutcome::Continue
        } else {
            CycleOutcome::Idle
        })
    }

    pub fn summary(&self) -> DriveSummary {
        self.summary
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    // Blocking is only allowed once the job queue is empty, so it cannot reorder anything.
    fn poll_wait(&self) -> Option<Duration> {
        match self.config.idle {
            IdleStrategy::Block if !self.engine.has_pending_jobs() => Some(self.config.max_block()),
            IdleStrategy::Block | IdleStrategy::BusyPoll => None,
        }
    }

    fn drain_jobs(&mut self) {
        loop {
            match self.engine.drain_next_job() {
                JobOutcome::Completed => self.summary.jobs_run += 1,
                JobOutcome::Failed(message) => {
                    self.summary.jobs_run += 1;
                    self.summary.jobs_failed += 1;
                    self.diagnostics
                        .report_error(&ScriptError::new(ErrorOrigin::Job, message));
                }
                JobOutcome::Empty => break,
            }
        }
    }

    fn fire(&mut self, key: TimerKey) {
        let closure = self.timers.borrow_mut().begin_fire(key);
        let Some(closure) = closure else {
            trace!(target: "driver", "skipping timer {}, no longer armed", key);
            return;
        };

        let result = self.engine.with(|ctx| {
            closure
                .invoke(&ctx)
                .catch(&ctx)
                .map_err(|err| describe_caught(&ctx, err))
        });
        self.summary.timers_fired += 1;
        if let Err(message) = result {
            self.summary.callback_failures += 1;
            self.diagnostics
                .report_error(&ScriptError::new(ErrorOrigin::TimerCallback(key), message));
        }

        let outcome = self.timers.borrow_mut().finish_fire(key, closure);
        if let FireOutcome::Closed(reason) = outcome {
            trace!(target: "driver", "timer {} closed after firing ({:?})", key, reason);
        }
    }

    // A module suspended in top-level await can only reject from inside a job.
    fn check_entry(&self) -> Result<()> {
        match self.engine.check_entry() {
            Some(rejection) => {
                self.diagnostics.report_error(&ScriptError::new(
                    ErrorOrigin::Evaluation,
                    rejection.message,
                ));
                Err(HostError::Evaluation {
                    origin: rejection.origin,
                })
            }
            None => Ok(()),
        }
    }

    fn check_fatal(&self) -> Result<()> {
        match self.timers.borrow_mut().take_fatal() {
            Some(err) => Err(HostError::ResourceExhausted(err)),
            None => Ok(()),
        }
    }
}
