//! `setTimeout`, `setInterval`, `clearTimeout` and `clearInterval`.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rquickjs::class::{JsClass, Readable, Trace, Tracer};
use rquickjs::function::{Constructor, Opt};
use rquickjs::{Class, Coerced, Ctx, Exception, FromJs, Function, JsLifetime, Value};
use tracing::trace;

use crate::error::TimerError;
use crate::timer::{ScriptClosure, ScriptTimers, TimerKey};

/// The registry shared between the driver and the installed globals.
///
/// Borrows are never held across a call into the engine.
pub type SharedTimers = Rc<RefCell<ScriptTimers>>;

/// Largest delay accepted, in milliseconds; longer delays are clamped
const MAX_DELAY_MS: f64 = i32::MAX as f64;

/// Opaque value returned by `setTimeout`/`setInterval`.
///
/// The key lives on the Rust side of a native class instance, so scripts can neither read nor
/// forge it; only a token this host handed out resolves to a timer.
#[derive(Debug, Clone, Copy)]
pub struct TimerToken {
    key: TimerKey,
}

impl TimerToken {
    pub fn key(&self) -> TimerKey {
        self.key
    }
}

impl<'js> Trace<'js> for TimerToken {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

// Holds no engine values.
unsafe impl<'js> JsLifetime<'js> for TimerToken {
    type Changed<'to> = TimerToken;
}

impl<'js> JsClass<'js> for TimerToken {
    const NAME: &'static str = "Timeout";

    type Mutable = Readable;

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Schedule {
    Once,
    Repeating,
}

/// Install the four timer globals on the context
pub fn install<'js>(ctx: &Ctx<'js>, timers: &SharedTimers) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set("setTimeout", scheduler(ctx, timers, Schedule::Once)?)?;
    globals.set("setInterval", scheduler(ctx, timers, Schedule::Repeating)?)?;
    // Both names cancel either kind; timeouts and intervals share one id space.
    globals.set("clearTimeout", canceller(ctx, timers)?)?;
    globals.set("clearInterval", canceller(ctx, timers)?)?;
    Ok(())
}

fn scheduler<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    schedule: Schedule,
) -> rquickjs::Result<Function<'js>> {
    let timers = timers.clone();
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, callback: Value<'js>, delay: Opt<Value<'js>>| {
            schedule_timer(&ctx, &timers, schedule, callback, delay.0)
        },
    )
}

fn canceller<'js>(ctx: &Ctx<'js>, timers: &SharedTimers) -> rquickjs::Result<Function<'js>> {
    let timers = timers.clone();
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, token: Opt<Value<'js>>| {
        cancel_timer(&ctx, &timers, token.0)
    })
}

fn schedule_timer<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    schedule: Schedule,
    callback: Value<'js>,
    delay: Option<Value<'js>>,
) -> rquickjs::Result<Class<'js, TimerToken>> {
    let Ok(callback) = Function::from_js(ctx, callback) else {
        return Err(throw_timer_error(ctx, &TimerError::NotCallable));
    };
    let delay = match delay_from_value(ctx, delay)? {
        Ok(delay) => delay,
        Err(err) => return Err(throw_timer_error(ctx, &err)),
    };

    let closure = ScriptClosure::new(ctx, callback);
    let scheduled = {
        let Ok(mut registry) = timers.try_borrow_mut() else {
            return Err(Exception::throw_internal(ctx, "timer registry is busy"));
        };
        match schedule {
            Schedule::Once => registry.schedule_once(closure, delay),
            Schedule::Repeating => registry.schedule_repeating(closure, delay),
        }
    };

    match scheduled {
        Ok(key) => Class::instance(ctx.clone(), TimerToken { key }),
        Err(err) => Err(throw_timer_error(ctx, &err)),
    }
}

fn cancel_timer<'js>(
    ctx: &Ctx<'js>,
    timers: &SharedTimers,
    token: Option<Value<'js>>,
) -> rquickjs::Result<()> {
    let Some(key) = token.as_ref().and_then(key_from_token) else {
        return Err(throw_timer_error(ctx, &TimerError::InvalidHandle));
    };

    let cancelled = {
        let Ok(mut registry) = timers.try_borrow_mut() else {
            return Err(Exception::throw_internal(ctx, "timer registry is busy"));
        };
        registry.cancel(key)
    };

    match cancelled {
        Ok(()) => {
            trace!(target: "timers", "script canceled timer {}", key);
            Ok(())
        }
        Err(err) => Err(throw_timer_error(ctx, &err)),
    }
}

/// Coerce the delay argument. The outer error is a script exception raised by the coercion
/// itself, the inner one a rejected value.
fn delay_from_value<'js>(
    ctx: &Ctx<'js>,
    value: Option<Value<'js>>,
) -> rquickjs::Result<Result<Duration, TimerError>> {
    let millis = match value {
        None => 0.0,
        Some(value) if value.is_undefined() => 0.0,
        Some(value) => Coerced::<f64>::from_js(ctx, value)?.0,
    };
    Ok(millis_from_f64(millis))
}

fn millis_from_f64(millis: f64) -> Result<Duration, TimerError> {
    if millis.is_nan() {
        return Ok(Duration::ZERO);
    }
    if !millis.is_finite() || millis < 0.0 {
        return Err(TimerError::InvalidDelay(format!(
            "{} is not a non-negative finite number of milliseconds",
            millis
        )));
    }
    Ok(Duration::from_millis(millis.trunc().min(MAX_DELAY_MS) as u64))
}

/// Key behind a token this host issued; plain objects and foreign classes resolve to nothing
fn key_from_token(token: &Value<'_>) -> Option<TimerKey> {
    let token = Class::<TimerToken>::from_object(token.as_object()?)?;
    let key = token.try_borrow().ok()?.key();
    Some(key)
}

fn throw_timer_error(ctx: &Ctx<'_>, err: &TimerError) -> rquickjs::Error {
    let message = err.to_string();
    match err {
        TimerError::NotCallable | TimerError::InvalidHandle => {
            Exception::throw_type(ctx, &message)
        }
        TimerError::InvalidDelay(_) => Exception::throw_range(ctx, &message),
        TimerError::CapacityExhausted(_) => Exception::throw_internal(ctx, &message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_and_nan_delay_is_zero() {
        assert_eq!(millis_from_f64(f64::NAN), Ok(Duration::ZERO));
        assert_eq!(millis_from_f64(0.0), Ok(Duration::ZERO));
    }

    #[test]
    fn test_fractional_delay_truncates() {
        assert_eq!(millis_from_f64(10.9), Ok(Duration::from_millis(10)));
        assert_eq!(millis_from_f64(0.4), Ok(Duration::ZERO));
    }

    #[test]
    fn test_negative_and_infinite_delay_rejected() {
        for millis in [-1.0, -0.5, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(
                matches!(millis_from_f64(millis), Err(TimerError::InvalidDelay(_))),
                "{} accepted",
                millis
            );
        }
    }

    #[test]
    fn test_huge_delay_clamped() {
        assert_eq!(
            millis_from_f64(1e18),
            Ok(Duration::from_millis(i32::MAX as u64))
        );
    }
}
