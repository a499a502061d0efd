use serde::{Deserialize, Serialize};

/// How the entry source is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvalMode {
    /// ES module (top-level `import`, strict mode)
    #[default]
    Module,
    /// Classic global script
    Script,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub eval_mode: EvalMode,

    /// Heap limit for the engine runtime in bytes (0 = unlimited)
    #[serde(default)]
    pub memory_limit_bytes: usize,

    /// Maximum native stack the engine may use in bytes (0 = engine default)
    #[serde(default)]
    pub max_stack_size_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            eval_mode: EvalMode::Module,
            memory_limit_bytes: 0,
            max_stack_size_bytes: 0,
        }
    }
}
