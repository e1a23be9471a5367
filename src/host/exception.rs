//! Host exceptions.
//!
//! Every [`BridgeError`] surfaces to the host as exactly one exception. The
//! invalid-state family collapses into [`ExceptionKind::IllegalState`] so the
//! host can tell a bad handle apart from a failure inside the resource.

use std::fmt;

use crate::error::BridgeError;

/// Exception class raised on the host side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    IllegalState,
    BadParameter,
    Authentication,
    Arithmetic,
    Socket,
    Tls,
    Io,
}

impl ExceptionKind {
    /// Host class name for this kind.
    pub fn class_name(&self) -> &'static str {
        match self {
            ExceptionKind::IllegalState => "IllegalStateError",
            ExceptionKind::BadParameter => "BadParameterError",
            ExceptionKind::Authentication => "AuthenticationError",
            ExceptionKind::Arithmetic => "ArithmeticError",
            ExceptionKind::Socket => "SocketError",
            ExceptionKind::Tls => "TlsError",
            ExceptionKind::Io => "IoError",
        }
    }
}

/// Exception to raise in the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    pub kind: ExceptionKind,
    pub message: String,
}

impl HostException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&BridgeError> for HostException {
    fn from(err: &BridgeError) -> Self {
        let kind = match err {
            BridgeError::InvalidHandle(_)
            | BridgeError::WrongKind { .. }
            | BridgeError::Released(_)
            | BridgeError::NotInitialized(_) => ExceptionKind::IllegalState,
            BridgeError::BadParameter(_) => ExceptionKind::BadParameter,
            BridgeError::Authentication(_) => ExceptionKind::Authentication,
            BridgeError::Arithmetic(_) => ExceptionKind::Arithmetic,
            BridgeError::Socket(_) => ExceptionKind::Socket,
            BridgeError::Tls(_) => ExceptionKind::Tls,
            BridgeError::Io(_) => ExceptionKind::Io,
        };
        HostException::new(kind, err.to_string())
    }
}

impl From<BridgeError> for HostException {
    fn from(err: BridgeError) -> Self {
        HostException::from(&err)
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.class_name(), self.message)
    }
}

impl std::error::Error for HostException {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ResourceKind;

    #[test]
    fn test_invalid_state_family() {
        for err in [
            BridgeError::InvalidHandle(999),
            BridgeError::WrongKind {
                handle: 100,
                expected: ResourceKind::Cipher,
                found: ResourceKind::Hmac,
            },
            BridgeError::Released(ResourceKind::Socket),
        ] {
            assert_eq!(HostException::from(err).kind, ExceptionKind::IllegalState);
        }
    }

    #[test]
    fn test_resource_failures_pass_through() {
        let exc = HostException::from(BridgeError::Arithmetic("division by zero".into()));
        assert_eq!(exc.kind, ExceptionKind::Arithmetic);
        assert_eq!(exc.message, "arithmetic error: division by zero");
        assert_eq!(
            exc.to_string(),
            "ArithmeticError: arithmetic error: division by zero"
        );
    }
}
