//! Error types for the chorus runtime
//!
//! Domain errors use thiserror and fold into a single top-level
//! [`InterpreterError`] at the public surface.

use thiserror::Error;

use crate::event::EventData;

/// Top-level runtime error
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// An event was sent to a service that was never started and has
    /// event deferral disabled.
    #[error("service '{id}' received event '{event}' before being started")]
    NotStarted {
        /// Interpreter id
        id: String,
        /// Name of the rejected event
        event: String,
    },

    /// An auto-forward target id has no corresponding child. This is a
    /// supervision bug in the host machine, not a recoverable condition.
    #[error("service '{id}' cannot forward event '{event}' to missing child '{child}'")]
    ForwardTargetMissing {
        /// Interpreter id
        id: String,
        /// The missing child id
        child: String,
        /// Name of the event being forwarded
        event: String,
    },

    /// A send action addressed a target that is neither a child nor a
    /// registered session.
    #[error("service '{id}' cannot send event '{event}' to unknown target '{target}'")]
    UnknownSendTarget {
        /// Interpreter id
        id: String,
        /// The unresolved target
        target: String,
        /// Name of the event
        event: String,
    },

    /// A user-supplied action implementation failed. The failure has
    /// already been forwarded to the parent actor before this surfaces.
    #[error("action '{action}' in service '{id}' failed")]
    ActionFailed {
        /// Interpreter id
        id: String,
        /// The failing action type
        action: String,
        /// The underlying execution failure
        #[source]
        source: ExecError,
    },

    /// A platform error event arrived, the current state has no handler
    /// for it, and no error listeners are registered.
    #[error("unhandled platform error in service '{id}': {event}")]
    UnhandledError {
        /// Interpreter id
        id: String,
        /// Name of the error event
        event: String,
        /// Error payload carried by the event
        data: EventData,
    },

    /// Session registration failed
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Failure produced by user-supplied executable code: custom action
/// implementations, invoke service factories, callback bodies.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecError {
    /// Human-readable failure description
    pub message: String,
}

impl ExecError {
    /// Create an execution failure from any displayable message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for ExecError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ExecError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

/// Process-registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A session id was registered twice without being freed in between
    #[error("session '{0}' is already registered")]
    Collision(String),
}

/// Result type using InterpreterError
pub type Result<T> = std::result::Result<T, InterpreterError>;
