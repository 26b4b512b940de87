//! Error types for apctl

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApError {
    /// Missing privilege or missing external tool
    #[error("Precondition failed: {0}")]
    Precondition(String),
    /// WAN or wireless interface could not be determined
    #[error("Interface resolution failed: {0}")]
    Resolution(String),
    /// Bad invocation
    #[error("Usage: {0}")]
    Usage(String),
    /// AP daemon failed its liveness check
    #[error("Startup failed: {0}")]
    Startup(String),
    /// Unrecognized topology selector
    #[error("Unknown method '{0}' (expected nat, proxy_arp or bridge)")]
    Method(String),
    /// A configuration step failed
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// Command execution failed
    #[error("{}", format_command_failure(.cmd, .code, .stderr))]
    CommandFailed {
        cmd: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Parse error: {0}")]
    Parse(String),
    /// Another session holds the lock
    #[error("An access point session is already running (pid {pid})")]
    AlreadyRunning { pid: i32 },
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

fn format_command_failure(cmd: &str, code: &Option<i32>, stderr: &str) -> String {
    match code {
        Some(code) => format!("Command '{}' failed with code {}: {}", cmd, code, stderr.trim()),
        None => format!("Command '{}' failed: {}", cmd, stderr.trim()),
    }
}

impl ApError {
    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ApError::Usage(_) => 2,
            ApError::Precondition(_) => 3,
            ApError::Resolution(_) => 4,
            ApError::Method(_) => 5,
            ApError::Startup(_) => 6,
            ApError::Configuration(_)
            | ApError::CommandFailed { .. }
            | ApError::InvalidParameter(_)
            | ApError::Parse(_) => 7,
            ApError::AlreadyRunning { .. } => 8,
            ApError::Timeout(_) | ApError::Io(_) => 1,
        }
    }
}

impl From<serde_json::Error> for ApError {
    fn from(error: serde_json::Error) -> Self {
        ApError::Parse(error.to_string())
    }
}

pub type ApResult<T> = Result<T, ApError>;

/// Tags a failed setup step so it surfaces as a single configuration error.
pub trait StepContext<T> {
    fn step(self, what: &str) -> ApResult<T>;
}

impl<T> StepContext<T> for ApResult<T> {
    fn step(self, what: &str) -> ApResult<T> {
        self.map_err(|e| match e {
            ApError::Configuration(_) => e,
            other => ApError::Configuration(format!("{}: {}", what, other)),
        })
    }
}
