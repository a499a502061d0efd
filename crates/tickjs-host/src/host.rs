use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::{debug, info};

use crate::binding::{self, SharedTimers};
use crate::config::RuntimeConfig;
use crate::console::{self, OutputHandle, StdioOutput};
use crate::diagnostics::{ConsoleDiagnostics, DiagnosticsHandle, ErrorOrigin, ScriptError};
use crate::driver::{DriveSummary, DriverLoop};
use crate::engine::Engine;
use crate::error::{HostError, Result};
use crate::loader::load_source;
use crate::substrate::{ClockHandle, EventSubstrate, MonotonicClock, TimerQueue};
use crate::timer::{ReaperStats, TimerRegistry};

/// Assembles a [`Host`]; every collaborator has a production default
pub struct HostBuilder {
    config: RuntimeConfig,
    clock: Option<ClockHandle>,
    substrate: Option<Box<dyn EventSubstrate>>,
    diagnostics: Option<DiagnosticsHandle>,
    output: Option<OutputHandle>,
    script_args: Vec<String>,
}

impl HostBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            clock: None,
            substrate: None,
            diagnostics: None,
            output: None,
            script_args: Vec::new(),
        }
    }

    /// Clock for the default timer queue. Ignored when a substrate is supplied.
    pub fn with_clock(mut self, clock: ClockHandle) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_substrate(mut self, substrate: Box<dyn EventSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsHandle) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn with_output(mut self, output: OutputHandle) -> Self {
        self.output = Some(output);
        self
    }

    /// Values exposed to scripts as `scriptArgs`
    pub fn with_script_args(mut self, args: Vec<String>) -> Self {
        self.script_args = args;
        self
    }

    pub fn build(self) -> Result<Host> {
        let engine = Engine::new(&self.config.engine)?;

        let substrate: Box<dyn EventSubstrate> = match self.substrate {
            Some(substrate) => substrate,
            None => {
                let clock = self
                    .clock
                    .unwrap_or_else(|| Rc::new(MonotonicClock::new()));
                Box::new(TimerQueue::new(clock))
            }
        };
        let timers: SharedTimers = Rc::new(RefCell::new(TimerRegistry::new(
            substrate,
            self.config.timers.live_limit(),
        )));
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Rc::new(ConsoleDiagnostics));
        let output = self.output.unwrap_or_else(|| Rc::new(StdioOutput));

        engine.with(|ctx| -> rquickjs::Result<()> {
            console::install(&ctx, &output, &self.script_args)?;
            binding::install(&ctx, &timers)?;
            Ok(())
        })?;
        debug!(target: "host", "host ready");

        Ok(Host {
            timers,
            diagnostics,
            config: self.config,
            interrupt: None,
            engine,
        })
    }
}

/// One engine instance with its timers, driven on the calling thread.
///
/// Live timers are closed on [`Host::shutdown`] or drop, before the engine goes away.
pub struct Host {
    timers: SharedTimers,
    diagnostics: DiagnosticsHandle,
    config: RuntimeConfig,
    interrupt: Option<Arc<AtomicBool>>,
    engine: Engine,
}

impl Host {
    pub fn builder(config: RuntimeConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    /// Host with all production defaults
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        HostBuilder::new(config).build()
    }

    /// Evaluate the entry source. An uncaught exception is reported and returned as
    /// [`HostError::Evaluation`].
    pub fn evaluate(&self, source: &[u8], origin: &str) -> Result<()> {
        self.engine
            .evaluate(source, origin, self.config.engine.eval_mode)
            .map_err(|message| {
                self.diagnostics
                    .report_error(&ScriptError::new(ErrorOrigin::Evaluation, message));
                HostError::Evaluation {
                    origin: origin.to_string(),
                }
            })
    }

    /// A driver over this host's engine and timers
    pub fn driver(&self) -> DriverLoop<'_> {
        let driver = DriverLoop::new(
            &self.engine,
            &self.timers,
            &self.diagnostics,
            self.config.driver.clone(),
        );
        match &self.interrupt {
            Some(flag) => driver.with_interrupt(flag.clone()),
            None => driver,
        }
    }

    /// Drive until idle, interrupted or out of cycles
    pub fn run(&self) -> Result<DriveSummary> {
        let summary = self.driver().run()?;
        info!(
            target: "host",
            cycles = summary.cycles,
            jobs = summary.jobs_run,
            timers = summary.timers_fired,
            "driver finished"
        );
        Ok(summary)
    }

    /// Load, evaluate and drive a script file
    pub fn run_file(&self, path: &Path) -> Result<DriveSummary> {
        let source = load_source(path)?;
        self.evaluate(&source, &path.display().to_string())?;
        self.run()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn set_interrupt(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    pub fn timer_stats(&self) -> ReaperStats {
        self.timers.borrow().stats()
    }

    pub fn live_timers(&self) -> usize {
        self.timers.borrow().live_count()
    }

    pub fn scheduled_timers(&self) -> u64 {
        self.timers.borrow().scheduled_count()
    }

    /// Close every live timer and release its closure. Safe to call more than once.
    pub fn shutdown(&self) -> usize {
        let closed = match self.timers.try_borrow_mut() {
            Ok(mut timers) => timers.shutdown(),
            Err(_) => return 0,
        };
        if closed > 0 {
            info!(target: "host", "closed {} live timers at shutdown", closed);
        }
        self.engine.collect_garbage();
        closed
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}
