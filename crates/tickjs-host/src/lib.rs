/// Embedded QuickJS host with timers
///
/// Scripts get `setTimeout`/`setInterval` and their cancel counterparts. A [`DriverLoop`]
/// interleaves the engine's job queue with an [`EventSubstrate`] that reports expired timers,
/// until neither has work left.
pub mod binding;
pub mod config;
pub mod console;
pub mod diagnostics;
pub mod driver;
pub mod engine;
pub mod error;
pub mod host;
pub mod loader;
pub mod substrate;
pub mod timer;

pub use binding::{SharedTimers, TimerToken};
pub use config::{ConfigLoadError, EvalMode, IdleStrategy, RuntimeConfig};
pub use console::{CapturedOutput, ScriptOutput, StdioOutput, Stream};
pub use diagnostics::{
    ConsoleDiagnostics, Diagnostics, ErrorOrigin, RecordingDiagnostics, ScriptError,
};
pub use driver::{CycleOutcome, DriveSummary, DriverLoop};
pub use engine::{Engine, EntryRejection, JobOutcome};
pub use error::{HostError, TimerError};
pub use host::{Host, HostBuilder};
pub use loader::load_source;
pub use substrate::{Clock, EventSubstrate, ManualClock, MonotonicClock, TimerQueue};
pub use timer::{CloseReason, ReaperStats, TimerKey};
