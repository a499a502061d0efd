//! Timer handles: the handle table, the closures they own, and the single release path.

mod closure;
mod reaper;
mod registry;
mod slab;

pub use closure::ScriptClosure;
pub use reaper::{CloseReason, Reaper, ReaperStats};
pub use registry::{FireOutcome, Lifecycle, TimerHandle, TimerKind, TimerRegistry};
pub use slab::TimerKey;

/// Registry holding engine closures
pub type ScriptTimers = TimerRegistry<ScriptClosure>;
