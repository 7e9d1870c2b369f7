use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when using the output manager
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WlOutputError {
    /// No live output has this identifier
    #[error("no output with identifier '{0}'")]
    OutputMissing(String),
    /// The output is known but its head is currently detached
    #[error("output '{0}' is not attached")]
    OutputUnavailable(String),
    /// The compositor rejected the configuration
    #[error("compositor rejected the configuration")]
    TransactionFailed,
    /// A newer configuration superseded this one; the caller may retry
    #[error("configuration cancelled (serial outdated)")]
    TransactionCancelled,
    /// A live output has no entry in the calculation being applied
    #[error("calculation has no target state for output '{0}'")]
    CalculationInconsistency(String),
    #[error("failed to load configuration from {}: {reason}", path.display())]
    ConfigurationLoad { path: PathBuf, reason: String },
    #[error("failed to save configuration to {}: {reason}", path.display())]
    ConfigurationSave { path: PathBuf, reason: String },
    /// Failed to establish the Wayland connection
    #[error("wayland connection error: {0}")]
    Connection(String),
    #[error("wayland event queue error: {0}")]
    EventQueue(String),
    /// The compositor does not advertise the output management global
    #[error("output management protocol unavailable")]
    ManagerUnavailable,
    /// No `done` event has been received yet
    #[error("no configuration serial available")]
    NoSerial,
    /// The manager thread has stopped
    #[error("output manager disconnected")]
    Disconnected,
    #[error("invalid value: {0}")]
    InvalidValue(String),
}
