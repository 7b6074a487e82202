use std::{error::Error, fmt::Display};
use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a dcsandbox-related operation.
pub type DcsandboxResult<T> = Result<T, DcsandboxError>;

/// An error that occurred while orchestrating sandboxes.
///
/// Every variant maps to a stable, externally observable error code via
/// [`DcsandboxError::code`]. Messages are free to change; codes are not.
#[derive(Debug, Error)]
pub enum DcsandboxError {
    /// An invalid memory size string was supplied.
    #[error("invalid memory size: {0:?} (expected e.g. 512M, 2G)")]
    InvalidMemory(String),

    /// A CPU count outside the accepted range was supplied.
    #[error("invalid cpu count: {0} (expected {1} to {2})")]
    InvalidCpu(f64, f64, f64),

    /// A sandbox timeout outside the accepted range was supplied.
    #[error("invalid timeout: {0} minutes (expected {1} to {2})")]
    InvalidTimeout(u64, u64, u64),

    /// A sandbox name failed validation.
    #[error("invalid sandbox name: {0}")]
    InvalidName(String),

    /// A sandbox with the same name already exists.
    #[error("a sandbox named '{0}' already exists")]
    DuplicateName(String),

    /// A persisted record could not be decoded.
    #[error("malformed sandbox record at {path}: {message}")]
    MalformedRecord {
        /// Path of the offending record file.
        path: String,
        /// Decode failure detail.
        message: String,
    },

    /// No sandbox with the given id exists.
    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    /// No template with the given name exists.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// The requested operation is not valid in the sandbox's current state.
    #[error("sandbox '{id}' is {status}; cannot {operation}")]
    InvalidState {
        /// The sandbox id.
        id: String,
        /// The status the sandbox was observed in.
        status: String,
        /// The operation that was rejected.
        operation: String,
    },

    /// A container runtime call failed.
    #[error("container runtime error during {operation}: {message}")]
    Runtime {
        /// The runtime operation that failed.
        operation: String,
        /// The runtime's failure detail.
        message: String,
    },

    /// The image build failed.
    #[error("image build failed: {0}")]
    BuildFailed(String),

    /// A git clone failed.
    #[error("failed to clone {url}: {message}")]
    CloneFailed {
        /// The repository URL.
        url: String,
        /// The git failure detail.
        message: String,
    },

    /// No free port remains in the MCP port range.
    #[error("mcp port range [{0}, {1}] is exhausted")]
    PortExhausted(u16, u16),

    /// The sandbox workspace could not be materialized.
    #[error("workspace setup failed: {0}")]
    WorkspaceSetup(String),

    /// The sandbox has no container to operate on.
    #[error("sandbox '{0}' has no container")]
    NoContainer(String),

    /// A configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// An IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON serialization error.
    #[error("json error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// A YAML deserialization error.
    #[error("yaml error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DcsandboxError {
    /// Creates a new `Custom` error from any error type.
    pub fn custom(error: impl Into<anyhow::Error>) -> DcsandboxError {
        DcsandboxError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DcsandboxError::InvalidMemory(_) => "VALIDATION_MEMORY",
            DcsandboxError::InvalidCpu(..) => "VALIDATION_CPU",
            DcsandboxError::InvalidTimeout(..) => "VALIDATION_TIMEOUT",
            DcsandboxError::InvalidName(_) => "VALIDATION_NAME",
            DcsandboxError::DuplicateName(_) => "DUPLICATE_NAME",
            DcsandboxError::MalformedRecord { .. } => "VALIDATION_RECORD",
            DcsandboxError::SandboxNotFound(_) => "NOT_FOUND",
            DcsandboxError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            DcsandboxError::InvalidState { .. } => "INVALID_STATE",
            DcsandboxError::Runtime { .. } => "RUNTIME_ERROR",
            DcsandboxError::BuildFailed(_) => "BUILD_FAILED",
            DcsandboxError::CloneFailed { .. } => "CLONE_FAILED",
            DcsandboxError::PortExhausted(..) => "PORT_EXHAUSTED",
            DcsandboxError::WorkspaceSetup(_) => "WORKSPACE_SETUP_FAILED",
            DcsandboxError::NoContainer(_) => "NO_CONTAINER",
            DcsandboxError::Config(_) => "CONFIG_ERROR",
            DcsandboxError::Io(_) => "IO_ERROR",
            DcsandboxError::SerdeJson(_) => "IO_ERROR",
            DcsandboxError::SerdeYaml(_) => "CONFIG_ERROR",
            DcsandboxError::Custom(_) => "INTERNAL",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `DcsandboxResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> DcsandboxResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            DcsandboxError::InvalidMemory("1KB".into()).code(),
            "VALIDATION_MEMORY"
        );
        assert_eq!(
            DcsandboxError::SandboxNotFound("abc".into()).code(),
            "NOT_FOUND"
        );
        assert_eq!(DcsandboxError::PortExhausted(50000, 60000).code(), "PORT_EXHAUSTED");
        assert_eq!(
            DcsandboxError::InvalidState {
                id: "abc".into(),
                status: "running".into(),
                operation: "start".into(),
            }
            .code(),
            "INVALID_STATE"
        );
    }
}
