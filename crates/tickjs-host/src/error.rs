use std::path::PathBuf;

/// Errors raised by the timer registry and surfaced to scripts
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The callback passed to a schedule call is not callable
    #[error("timer callback must be a function")]
    NotCallable,

    /// Delay or period argument rejected at the binding boundary
    #[error("invalid timer delay: {0}")]
    InvalidDelay(String),

    /// The identity does not resolve to a live handle (unknown, stale or already closed)
    #[error("invalid timer handle")]
    InvalidHandle,

    /// No handle could be allocated
    #[error("timer capacity exhausted ({0} live timers)")]
    CapacityExhausted(usize),
}

impl TimerError {
    /// Whether this error must stop the driver rather than only fail the calling script
    pub fn is_fatal(&self) -> bool {
        matches!(self, TimerError::CapacityExhausted(_))
    }
}

/// Errors that end a host run
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("script not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("unable to read {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create script engine: {0}")]
    EngineCreation(#[source] rquickjs::Error),

    /// Uncaught exception during the initial evaluation; the exception has already been reported
    #[error("uncaught exception while evaluating {origin}")]
    Evaluation { origin: String },

    #[error("unrecoverable resource failure: {0}")]
    ResourceExhausted(#[source] TimerError),

    #[error("script engine error: {0}")]
    Engine(#[from] rquickjs::Error),
}

pub type Result<T, E = HostError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_capacity_is_fatal() {
        assert!(TimerError::CapacityExhausted(4).is_fatal());
        assert!(!TimerError::InvalidHandle.is_fatal());
        assert!(!TimerError::NotCallable.is_fatal());
        assert!(!TimerError::InvalidDelay("-1".to_string()).is_fatal());
    }

    #[test]
    fn test_source_errors_name_the_path() {
        let err = HostError::SourceNotFound {
            path: PathBuf::from("missing.js"),
        };
        assert_eq!(err.to_string(), "script not found: missing.js");
    }
}
