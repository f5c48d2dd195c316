use thiserror::Error;

/// Unified error type for all netshell operations.
///
/// Carries enough context (interface, offending value, underlying reason) for
/// the message to be actionable on its own. Mutating operations return
/// `Ok(bool)` for "did the post-condition verify"; an `Err` always means the
/// operation could not even be attempted (invalid input, missing
/// precondition, collaborator failure).
#[derive(Error, Debug)]
pub enum NetshellError {
    #[error("Interface '{name}' not found in the current snapshot. Verify it exists with 'ifconfig -a'.")]
    InterfaceNotFound { name: String },

    #[error("Invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("Invalid interface status '{value}': expected 'up' or 'down'")]
    InvalidStatus { value: String },

    #[error("Invalid encryption type '{value}' for network '{ssid}'")]
    InvalidEncryptionType { value: String, ssid: String },

    #[error("SSID '{ssid}' not visible in the last scan on '{interface}'")]
    SsidNotFound { ssid: String, interface: String },

    #[error("Failed to verify status change of '{interface}' to {desired_state}")]
    StatusChangeFailed {
        interface: String,
        desired_state: String,
    },

    #[error("{daemon} is not running on '{interface}' (no PID file at {pid_file})")]
    DaemonNotRunning {
        daemon: String,
        interface: String,
        pid_file: String,
    },

    #[error("{daemon} on '{interface}' is still running after stop escalation")]
    DaemonStillRunning { daemon: String, interface: String },

    #[error("Cannot derive a pre-shared key for '{ssid}': {reason}")]
    CannotGenerateKey { ssid: String, reason: String },

    #[error("Failed to execute '{command}': {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {reason}")]
    ParseError { what: String, reason: String },
}

pub type Result<T> = std::result::Result<T, NetshellError>;

impl NetshellError {
    /// Create an IO error with context about the operation that failed.
    pub fn io_error(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}
