use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::error;

use crate::timer::TimerKey;

/// Where a script error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// Initial evaluation of the entry script
    Evaluation,
    /// An engine job (promise continuation) failed
    Job,
    /// A fired timer callback threw
    TimerCallback(TimerKey),
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorOrigin::Evaluation => write!(f, "evaluation"),
            ErrorOrigin::Job => write!(f, "job"),
            ErrorOrigin::TimerCallback(key) => write!(f, "timer {}", key),
        }
    }
}

/// A formatted exception raised by script code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub origin: ErrorOrigin,
    pub message: String,
}

impl ScriptError {
    pub fn new(origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Sink for script errors that were contained at a fire or job boundary. Must never fail.
pub trait Diagnostics {
    fn report_error(&self, error: &ScriptError);
}

pub type DiagnosticsHandle = Rc<dyn Diagnostics>;

/// Prints the exception to stderr, the way the QuickJS std helpers dump errors
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDiagnostics;

impl Diagnostics for ConsoleDiagnostics {
    fn report_error(&self, err: &ScriptError) {
        error!(target: "host", origin = %err.origin, "uncaught script exception");
        eprintln!("{}", err.message);
    }
}

/// Keeps every report, for tests
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    errors: RefCell<Vec<ScriptError>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn errors(&self) -> Vec<ScriptError> {
        self.errors.borrow().clone()
    }

    pub fn count(&self) -> usize {
        self.errors.borrow().len()
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn report_error(&self, err: &ScriptError) {
        self.errors.borrow_mut().push(err.clone());
    }
}
