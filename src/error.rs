//! Error types for handle resolution and resource dispatch.
//!
//! Three classes of failure cross the boundary:
//!
//! - **Invalid state**: the handle is unknown, already released, names a
//!   resource of a different kind, or was released while a call was in flight.
//! - **Resource failures**: bad parameters, authentication failures, arithmetic
//!   domain errors, socket and TLS failures. These come from the resource
//!   operation itself and are passed through unchanged.
//! - **I/O**: raw `std::io::Error` from the operating system.
//!
//! The registry never produces resource failures, and resources never produce
//! invalid-state errors on their own behalf.

use thiserror::Error;

use crate::registry::{Handle, ResourceKind};

/// Result type alias for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Error type for bridge operations.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Handle was never issued or has already been released.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    /// Handle resolves to a live resource of another kind.
    #[error("handle {handle} refers to a {found} resource, expected {expected}")]
    WrongKind {
        /// Handle that was resolved.
        handle: Handle,
        /// Kind the caller asked for.
        expected: ResourceKind,
        /// Kind actually stored under the handle.
        found: ResourceKind,
    },

    /// Resource was destroyed by a concurrent release during the call.
    #[error("{0} resource has been released")]
    Released(ResourceKind),

    /// Resource used before a mandatory setup step.
    #[error("not initialized: {0}")]
    NotInitialized(String),

    /// Argument rejected by the resource.
    #[error("bad parameter: {0}")]
    BadParameter(String),

    /// Integrity or authentication check failed.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Arithmetic domain error (negative result, division by zero, ...).
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// Socket-level failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// TLS-level failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Operating system I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Check if this error means the handle could not be used at all.
    ///
    /// These are the failures the host reports as an illegal-state condition,
    /// separately from anything the resource itself raised.
    pub fn is_invalid_state(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidHandle(_) | BridgeError::WrongKind { .. } | BridgeError::Released(_)
        )
    }

    /// Check if this is a bad-parameter error.
    pub fn is_bad_parameter(&self) -> bool {
        matches!(self, BridgeError::BadParameter(_))
    }

    /// Check if this is an authentication failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, BridgeError::Authentication(_))
    }

    /// Check if this is an arithmetic error.
    pub fn is_arithmetic(&self) -> bool {
        matches!(self, BridgeError::Arithmetic(_))
    }

    pub(crate) fn bad_parameter(msg: impl Into<String>) -> Self {
        BridgeError::BadParameter(msg.into())
    }

    pub(crate) fn socket(err: impl std::fmt::Display) -> Self {
        BridgeError::Socket(err.to_string())
    }

    pub(crate) fn tls(err: impl std::fmt::Display) -> Self {
        BridgeError::Tls(err.to_string())
    }
}
