//! QuickJS runtime and context lifecycle.

use std::cell::RefCell;

use rquickjs::promise::PromiseState;
use rquickjs::{
    CatchResultExt, CaughtError, Coerced, Context, Ctx, Exception, FromJs, Module, Persistent,
    Promise, Runtime, Value,
};
use tracing::debug;

use crate::config::{EngineConfig, EvalMode};
use crate::error::{HostError, Result};

/// Result of running one engine job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The job threw; carries the formatted exception
    Failed(String),
    /// No job was ready
    Empty,
}

/// A module entry that rejected after `evaluate` had already returned (top-level `await`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRejection {
    pub origin: String,
    pub message: String,
}

struct PendingEntry {
    origin: String,
    promise: Persistent<Promise<'static>>,
}

/// An engine instance: one runtime with one full context.
///
/// Any retained closure must be released before this is dropped.
pub struct Engine {
    // Declared first: the persistent promise must be released before the runtime.
    pending_entry: RefCell<Option<PendingEntry>>,
    context: Context,
    runtime: Runtime,
}

impl Engine {
    /// Create a runtime and a context with the standard intrinsics
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let runtime = Runtime::new().map_err(HostError::EngineCreation)?;
        if config.memory_limit_bytes > 0 {
            runtime.set_memory_limit(config.memory_limit_bytes);
        }
        if config.max_stack_size_bytes > 0 {
            runtime.set_max_stack_size(config.max_stack_size_bytes);
        }
        let context = Context::full(&runtime).map_err(HostError::EngineCreation)?;
        debug!(target: "engine", "created engine ({:?})", config);
        Ok(Self {
            pending_entry: RefCell::new(None),
            context,
            runtime,
        })
    }

    /// Run `f` with the context entered
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R,
    {
        self.context.with(f)
    }

    /// Evaluate the entry source. On an uncaught exception returns its formatted text.
    ///
    /// Module evaluation does not run queued jobs, so continuations registered at top level
    /// stay pending for the driver. A module still suspended in a top-level `await` is kept
    /// and settled later through [`Engine::check_entry`].
    pub fn evaluate(
        &self,
        source: &[u8],
        origin: &str,
        mode: EvalMode,
    ) -> std::result::Result<(), String> {
        debug!(target: "engine", "evaluating {} as {:?}", origin, mode);
        let pending = self.context.with(|ctx| match mode {
            EvalMode::Script => ctx
                .eval::<(), _>(source)
                .catch(&ctx)
                .map(|_| None)
                .map_err(|err| describe_caught(&ctx, err)),
            EvalMode::Module => {
                let promise = Module::evaluate(ctx.clone(), origin, source)
                    .catch(&ctx)
                    .map_err(|err| describe_caught(&ctx, err))?;
                match settled(&ctx, &promise) {
                    Some(result) => result.map(|_| None),
                    None => Ok(Some(Persistent::save(&ctx, promise))),
                }
            }
        })?;

        if let Some(promise) = pending {
            debug!(target: "engine", "{} suspended in top-level await", origin);
            *self.pending_entry.borrow_mut() = Some(PendingEntry {
                origin: origin.to_string(),
                promise,
            });
        }
        Ok(())
    }

    /// Settle a module entry left pending by [`Engine::evaluate`].
    ///
    /// Returns the rejection once, the first time it is observed; a still-pending or fulfilled
    /// entry yields `None`.
    pub fn check_entry(&self) -> Option<EntryRejection> {
        let mut pending = self.pending_entry.borrow_mut();
        let entry = pending.as_ref()?;
        let outcome = self.context.with(|ctx| match entry.promise.clone().restore(&ctx) {
            Ok(promise) => settled(&ctx, &promise),
            Err(err) => Some(Err(err.to_string())),
        })?;

        let entry = pending.take()?;
        match outcome {
            Ok(()) => {
                debug!(target: "engine", "{} finished evaluating", entry.origin);
                None
            }
            Err(message) => Some(EntryRejection {
                origin: entry.origin,
                message,
            }),
        }
    }

    /// Run the next ready job, if any
    pub fn drain_next_job(&self) -> JobOutcome {
        match self.runtime.execute_pending_job() {
            Ok(true) => JobOutcome::Completed,
            Ok(false) => JobOutcome::Empty,
            Err(failed) => {
                let message = self.context.with(|ctx| {
                    let exception = ctx.catch();
                    describe_value(&ctx, exception)
                });
                // The job context is borrowed from the runtime without a reference of its own;
                // dropping it would free our context a second time.
                std::mem::forget(failed);
                JobOutcome::Failed(message)
            }
        }
    }

    pub fn has_pending_jobs(&self) -> bool {
        self.runtime.is_job_pending()
    }

    /// Force a garbage collection pass
    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }
}

/// `None` while pending, otherwise whether the promise fulfilled
fn settled<'js>(
    ctx: &Ctx<'js>,
    promise: &Promise<'js>,
) -> Option<std::result::Result<(), String>> {
    match promise.state() {
        PromiseState::Pending => None,
        PromiseState::Resolved => Some(Ok(())),
        PromiseState::Rejected => match promise.result::<Value>() {
            Some(result) => Some(
                result
                    .catch(ctx)
                    .map(|_| ())
                    .map_err(|err| describe_caught(ctx, err)),
            ),
            None => Some(Ok(())),
        },
    }
}

/// Format an exception caught at a script boundary
pub(crate) fn describe_caught<'js>(ctx: &Ctx<'js>, err: CaughtError<'js>) -> String {
    match err {
        CaughtError::Exception(exception) => describe_exception(&exception),
        CaughtError::Value(value) => describe_value(ctx, value),
        CaughtError::Error(err) => err.to_string(),
    }
}

fn describe_exception(exception: &Exception<'_>) -> String {
    let name: Option<String> = exception.as_object().get("name").ok();
    let message = exception.message().unwrap_or_default();
    let headline = match name {
        Some(name) if !name.is_empty() => format!("{}: {}", name, message),
        _ => message,
    };
    match exception.stack() {
        Some(stack) if !stack.trim().is_empty() => {
            format!("{}\n{}", headline, stack.trim_end())
        }
        _ => headline,
    }
}

fn describe_value<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> String {
    if let Some(exception) = value
        .as_object()
        .and_then(|obj| Exception::from_object(obj.clone()))
    {
        return describe_exception(&exception);
    }

    match Coerced::<String>::from_js(ctx, value) {
        Ok(text) => text.0,
        Err(err) => format!("(failed to stringify exception: {})", err),
    }
}
