//! Error types for svmkit
//!
//! Errors are structured with fields to aid debugging against remote hosts.
//! Each variant carries the context needed to act on it: the host a command
//! ran on, the resource whose inputs were rejected, the cycle that was closed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for svmkit operations
#[derive(Debug, Error)]
pub enum Error {
    /// The remote host could not be reached or rejected authentication
    #[error("connection error [{host}] after {attempts} attempt(s): {message}")]
    Connection {
        /// Host the connection was attempted against
        host: String,
        /// Description of what failed
        message: String,
        /// Number of dial attempts made before giving up
        attempts: u32,
    },

    /// A remote command exited with a non-zero status
    #[error("execution error [{host}] `{command}` exited with {exit_status}: {stderr}")]
    Execution {
        /// Host the command ran on
        host: String,
        /// Short name of the command or script
        command: String,
        /// Exit status (-1 when the command timed out or was killed)
        exit_status: i32,
        /// Captured standard error
        stderr: String,
    },

    /// Resource inputs are invalid; raised before any remote call
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Resource (node id or type) with invalid inputs
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "flags.rpcPort")
        field: Option<String>,
    },

    /// A graph declaration would introduce a dependency cycle
    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle {
        /// Node ids along the cycle, first and last are the same node
        path: Vec<String>,
    },

    /// Key material could not be generated or parsed
    #[error("key generation error: {message}")]
    Generation {
        /// Description of what failed
        message: String,
    },

    /// The genesis ledger could not be constructed
    #[error("genesis construction error: {message}")]
    GenesisConstruction {
        /// Description of what failed, including remote stderr when present
        message: String,
    },

    /// A node was skipped because something it depends on failed
    #[error("{node} not applied: dependency {dependency} failed")]
    DependencyFailed {
        /// The node that was skipped
        node: String,
        /// The dependency that failed
        dependency: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "evaluator", "state")
        context: String,
    },
}

impl Error {
    /// Create a connection error
    pub fn connection(host: impl Into<String>, msg: impl Into<String>, attempts: u32) -> Self {
        Self::Connection {
            host: host.into(),
            message: msg.into(),
            attempts,
        }
    }

    /// Create an execution error from a failed remote command
    pub fn execution(
        host: impl Into<String>,
        command: impl Into<String>,
        exit_status: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Execution {
            host: host.into(),
            command: command.into(),
            exit_status,
            stderr: stderr.into(),
        }
    }

    /// Create a validation error with the given message
    ///
    /// For simple validation errors without resource context.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a cycle error from the offending path
    pub fn cycle(path: Vec<String>) -> Self {
        Self::Cycle { path }
    }

    /// Create a key generation error
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation {
            message: msg.into(),
        }
    }

    /// Create a genesis construction error
    pub fn genesis(msg: impl Into<String>) -> Self {
        Self::GenesisConstruction {
            message: msg.into(),
        }
    }

    /// Create a dependency-failed error
    pub fn dependency_failed(node: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::DependencyFailed {
            node: node.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only connection failures are transient. Remote command failures are
    /// surfaced with their stderr and never retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Get the host if this error is associated with a remote machine
    pub fn host(&self) -> Option<&str> {
        match self {
            Error::Connection { host, .. } | Error::Execution { host, .. } => Some(host),
            _ => None,
        }
    }

    /// Get the captured remote stderr, if any
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::Execution { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::serialization_for_kind("yaml", e.to_string())
    }
}

impl From<minijinja::Error> for Error {
    fn from(e: minijinja::Error) -> Self {
        Error::internal_with_context("template", e.to_string())
    }
}
