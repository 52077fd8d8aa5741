//! Error types for bootstrap orchestration
//!
//! This module provides error types for the per-role bootstrap sequences:
//! readiness timeouts, engine/SQL failures, secure-channel window management,
//! and transfer failures.

use thiserror::Error;

/// Error types for bootstrap operations
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// A readiness predicate never became true within its ceiling
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Operation cancelled before completion
    #[error("Operation was cancelled: {0}")]
    Cancelled(String),

    /// Configuration errors (missing fields, unparseable file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// SQL execution errors from the database engine
    #[error("Engine SQL error: {0}")]
    Sql(String),

    /// Secure channel window errors (open, probe, restore)
    #[error("Secure channel error: {0}")]
    Channel(String),

    /// Backup artifact transfer errors
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Name resolution errors
    #[error("Name resolution error: {0}")]
    Resolve(String),

    /// A destructive operation's precondition did not hold
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic bootstrap errors
    #[error("Bootstrap error: {0}")]
    Generic(String),
}

impl BootstrapError {
    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Timeout(msg.into())
    }

    /// Create a new cancellation error
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Cancelled(msg.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Config(msg.into())
    }

    /// Create a new SQL error
    pub fn sql<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Sql(msg.into())
    }

    /// Create a new secure channel error
    pub fn channel<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Channel(msg.into())
    }

    /// Create a new transfer error
    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Transfer(msg.into())
    }

    /// Create a new name resolution error
    pub fn resolve<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Resolve(msg.into())
    }

    /// Create a new precondition error
    pub fn precondition<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Precondition(msg.into())
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        BootstrapError::Generic(msg.into())
    }

    /// Check if the error is a readiness timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, BootstrapError::Timeout(_))
    }

    /// Check if the error is due to cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BootstrapError::Cancelled(_))
    }

    /// Check if the error aborts the current role's whole sequence
    ///
    /// Every error except cancellation is fatal: there are no retries across
    /// state-machine states, only the bounded poll inside a readiness wait.
    pub fn is_fatal(&self) -> bool {
        !self.is_cancelled()
    }
}

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;
