//! The native object capability.
//!
//! Anything that can be stored behind a handle implements [`NativeObject`].
//! The registry only ever calls [`NativeObject::destroy`] and
//! [`NativeObject::kind`]; it never looks at resource-specific state.
//!
//! Concrete resources additionally implement [`Resource`], which ties a Rust
//! type to its [`ResourceKind`] tag. The tag is checked before the `Any`
//! downcast so that a handle of the wrong kind becomes a reportable error.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use super::Handle;
use crate::error::{BridgeError, BridgeResult};

/// Kind tag carried by every registered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Block cipher engine.
    Cipher,
    /// Block cipher mode of operation.
    CipherMode,
    /// Message authentication state.
    Hmac,
    /// Arbitrary-precision integer.
    BigInteger,
    /// Key pair generator.
    KeyPairGenerator,
    /// Berkeley socket.
    Socket,
    /// TLS certificate and trust material.
    TlsCredentials,
    /// TLS session.
    TlsSession,
    /// Anything not covered above (used by embedders and tests).
    Other,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Cipher => "cipher",
            ResourceKind::CipherMode => "cipher mode",
            ResourceKind::Hmac => "HMAC",
            ResourceKind::BigInteger => "big integer",
            ResourceKind::KeyPairGenerator => "key pair generator",
            ResourceKind::Socket => "socket",
            ResourceKind::TlsCredentials => "TLS credentials",
            ResourceKind::TlsSession => "TLS session",
            ResourceKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Upcast of a shared object to `Any`, implemented for every sized type.
pub trait AsAnyArc: Any + Send + Sync {
    /// Convert into an `Arc<dyn Any>` for downcasting.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAnyArc for T {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A native resource exposed across the boundary.
///
/// Implementors hold their mutable state behind their own lock; the registry
/// shares them by `Arc` so that a lookup stays memory-safe even if a release
/// races in.
pub trait NativeObject: AsAnyArc {
    /// Kind tag used for checked downcasts and diagnostics.
    fn kind(&self) -> ResourceKind;

    /// Release native sub-resources (descriptors, key material, sessions).
    ///
    /// Called by the registry exactly once, on the live to released
    /// transition. Operations that run afterwards must fail with
    /// [`BridgeError::Released`].
    fn destroy(&self);
}

/// A concrete resource type with a fixed kind.
pub trait Resource: NativeObject + Sized {
    /// Kind every instance of this type reports.
    const KIND: ResourceKind;
}

/// Recover the concrete type behind a resolved object.
pub(crate) fn downcast<T: Resource>(
    handle: Handle,
    object: Arc<dyn NativeObject>,
) -> BridgeResult<Arc<T>> {
    let found = object.kind();
    if found != T::KIND {
        log::warn!(
            "handle {} resolved to a {} resource where a {} was expected",
            handle,
            found,
            T::KIND
        );
        return Err(BridgeError::WrongKind {
            handle,
            expected: T::KIND,
            found,
        });
    }

    AsAnyArc::as_any_arc(object)
        .downcast::<T>()
        .map_err(|_| BridgeError::WrongKind {
            handle,
            expected: T::KIND,
            found,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    impl NativeObject for Alpha {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Other
        }
        fn destroy(&self) {}
    }

    impl Resource for Alpha {
        const KIND: ResourceKind = ResourceKind::Other;
    }

    impl NativeObject for Beta {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Other
        }
        fn destroy(&self) {}
    }

    impl Resource for Beta {
        const KIND: ResourceKind = ResourceKind::Other;
    }

    #[test]
    fn test_downcast_matching_type() {
        let obj: Arc<dyn NativeObject> = Arc::new(Alpha);
        assert!(downcast::<Alpha>(100, obj).is_ok());
    }

    #[test]
    fn test_downcast_same_tag_different_type() {
        // Tags agree but the Rust types do not; the Any check still catches it.
        let obj: Arc<dyn NativeObject> = Arc::new(Alpha);
        let err = downcast::<Beta>(7, obj).err().unwrap();
        assert!(err.is_invalid_state());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ResourceKind::BigInteger.to_string(), "big integer");
        assert_eq!(ResourceKind::TlsSession.to_string(), "TLS session");
    }
}
