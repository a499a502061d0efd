pub mod driver_config;
pub mod engine_config;
pub mod runtime_config;

pub use driver_config::{DriverConfig, IdleStrategy, TimerConfig};
pub use engine_config::{EngineConfig, EvalMode};
pub use runtime_config::{ConfigLoadError, LoggingConfig, RuntimeConfig};
