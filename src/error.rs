//! Error types for frameboost

use thiserror::Error;

/// Result type alias for frameboost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for frameboost
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (cache compression)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame buffer allocation failure. Fatal to the pipeline.
    #[error("Allocation failed: {size} bytes")]
    Allocation { size: usize },

    /// Transient motion estimation failure; the frame pair is skipped.
    #[error("Estimation error: {0}")]
    Estimation(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Scheduler rejected a job past the retry ceiling. Fatal.
    #[error("Scheduler overloaded after {retries} retries")]
    SchedulerOverload { retries: u32 },

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Library initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

impl Error {
    /// Create an estimation error
    pub fn estimation<S: Into<String>>(msg: S) -> Self {
        Error::Estimation(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create an invalid state error
    pub fn invalid_state<S: Into<String>>(msg: S) -> Self {
        Error::InvalidState(msg.into())
    }

    /// True for conditions that must stop the driver (resource exhaustion,
    /// unbounded scheduler overload), false for per-pair skips.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Allocation { .. } | Error::SchedulerOverload { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Allocation { size: 1024 }.is_fatal());
        assert!(Error::SchedulerOverload { retries: 8 }.is_fatal());
        assert!(!Error::estimation("dims").is_fatal());
        assert!(!Error::invalid_input("len").is_fatal());
    }

    #[test]
    fn test_display() {
        let e = Error::Allocation { size: 64 };
        assert_eq!(e.to_string(), "Allocation failed: 64 bytes");
    }
}
