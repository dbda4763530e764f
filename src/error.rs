//! Error taxonomy shared by handlers and executors.
//!
//! Infrastructure failures (`QueryError`, `TaskError`) travel through the
//! failure branch of a continuation. Business failures (`ServerError`) carry a
//! private diagnostic that is only ever logged and a public message that is
//! safe to render.

use hyper::StatusCode;
use thiserror::Error;

/// Public message used whenever an infrastructure failure reaches the client.
pub const GENERIC_PUBLIC_MESSAGE: &str = "Something went wrong, please try again later.";

/// Failures of a `RunQuery` step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("connection acquisition failed: {0}")]
    Acquire(String),

    #[error("statement execution failed: {0}")]
    Execute(String),

    #[error("failed to parse rows: {0}")]
    Parse(String),
}

/// Failures of an `AwaitAsync` step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task cancelled before completion")]
    Cancelled,

    /// A test stub produced a value of the wrong type.
    #[error("stub value mismatch: {0}")]
    Stub(String),
}

/// A failure with a private diagnostic and a public, renderable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{private_message}")]
pub struct ServerError {
    pub private_message: String,
    pub public_message: String,
    pub status: StatusCode,
}

impl ServerError {
    /// An internal server error.
    pub fn new(private_message: impl Into<String>, public_message: impl Into<String>) -> Self {
        Self {
            private_message: private_message.into(),
            public_message: public_message.into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(private_message: impl Into<String>, public_message: impl Into<String>) -> Self {
        Self::new(private_message, public_message).with_status(StatusCode::BAD_REQUEST)
    }

    pub fn not_found(public_message: impl Into<String>) -> Self {
        let public_message = public_message.into();
        Self::new(format!("not found: {public_message}"), public_message)
            .with_status(StatusCode::NOT_FOUND)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl From<QueryError> for ServerError {
    fn from(error: QueryError) -> Self {
        ServerError::new(error.to_string(), GENERIC_PUBLIC_MESSAGE)
    }
}

impl From<TaskError> for ServerError {
    fn from(error: TaskError) -> Self {
        ServerError::new(error.to_string(), GENERIC_PUBLIC_MESSAGE)
    }
}

/// Result type for handler construction.
pub type Result<T, E = ServerError> = std::result::Result<T, E>;
