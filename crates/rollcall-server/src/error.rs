//! Server error types.

use std::fmt;

use rollcall_core::{PolicyError, PublishError, StoreError};

/// Errors that can occur in the server.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error
    Config(String),

    /// Transport/network error
    Transport(String),

    /// Database error
    Database(sqlx::Error),

    /// Record store error
    Store(StoreError),

    /// Token publish error
    Publish(PublishError),

    /// Internal error
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Database(err) => write!(f, "database error: {err}"),
            Self::Store(err) => write!(f, "store error: {err}"),
            Self::Publish(err) => write!(f, "publish error: {err}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Publish(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<PublishError> for ServerError {
    fn from(err: PublishError) -> Self {
        Self::Publish(err)
    }
}

impl From<PolicyError> for ServerError {
    fn from(err: PolicyError) -> Self {
        Self::Config(err.to_string())
    }
}
