//! # Behavior Errors
//!
//! Only the persistence and configuration paths return errors. Simulation
//! never fails: missing animations, bad stage targets and brain conflicts are
//! logged and skipped.

use thiserror::Error;

/// Behavior error types.
#[derive(Error, Debug)]
pub enum BehaviorError {
    // ========================================================================
    // Stream Errors
    // ========================================================================

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected end of stream while reading {0}")]
    UnexpectedEof(&'static str),

    #[error("Invalid value {value} for {field}")]
    InvalidTag { field: &'static str, value: u32 },

    #[error("Invalid UTF-8 string in stream")]
    InvalidString,

    #[error("Replication record error: {0}")]
    Record(String),

    // ========================================================================
    // Structure Errors
    // ========================================================================

    #[error("Stage {index} out of range (count {count})")]
    StageOutOfRange { index: i64, count: usize },

    // ========================================================================
    // Configuration Errors
    // ========================================================================

    #[error("Config error: {0}")]
    Config(String),
}

impl BehaviorError {
    /// Truncated streams can be retried once more data arrives.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BehaviorError::UnexpectedEof(_))
    }

    /// Get error code for logging and network transmission.
    pub fn code(&self) -> u16 {
        match self {
            BehaviorError::Io(_) => 1000,
            BehaviorError::UnexpectedEof(_) => 1001,
            BehaviorError::InvalidTag { .. } => 1002,
            BehaviorError::InvalidString => 1003,
            BehaviorError::Record(_) => 1004,
            BehaviorError::StageOutOfRange { .. } => 2000,
            BehaviorError::Config(_) => 3000,
        }
    }
}

impl From<bincode::Error> for BehaviorError {
    fn from(e: bincode::Error) -> Self {
        BehaviorError::Record(e.to_string())
    }
}

/// Result type for behavior operations.
pub type BehaviorResult<T> = Result<T, BehaviorError>;
