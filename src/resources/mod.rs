//! Native resources reachable through handles.
//!
//! Each submodule owns one resource type and exposes free functions that
//! follow the same dispatch shape:
//!
//! ```text
//! resolve every handle argument ──► run the native operation ──► register
//!        (invalid-state errors)         (resource errors)         new results
//! ```
//!
//! | Module       | Kind               | Backend                   |
//! |--------------|--------------------|---------------------------|
//! | `random`     | (none)             | ring                      |
//! | `cipher`     | Cipher             | aes                       |
//! | `gcm`        | CipherMode         | ring aead                 |
//! | `hmac`       | Hmac               | ring hmac                 |
//! | `bigint`     | BigInteger         | num-bigint-dig            |
//! | `rsa_keygen` | KeyPairGenerator   | rsa                       |
//! | `socket`     | Socket             | socket2                   |
//! | `tls`        | TlsCredentials/Session | rustls                |

pub mod bigint;
pub mod cipher;
pub mod gcm;
pub mod hmac;
pub mod random;
pub mod rsa_keygen;
pub mod socket;
pub mod tls;

use parking_lot::Mutex;

use crate::error::{BridgeError, BridgeResult};
use crate::registry::ResourceKind;

/// Most bytes one socket or TLS read hands back; larger requests get a
/// partial read.
pub const MAX_READ_CHUNK: usize = 64 * 1024;

/// Zeroed buffer for a read of up to `max` bytes.
pub(crate) fn read_buffer(max: usize) -> BridgeResult<Vec<u8>> {
    if max == 0 {
        // An empty read would look the same as end of stream.
        return Err(BridgeError::bad_parameter("read size must be positive"));
    }
    Ok(vec![0u8; max.min(MAX_READ_CHUNK)])
}

/// Mutable state of a resource, emptied by `destroy`.
///
/// Operations that find the slot empty lost a race with a release and fail
/// with [`BridgeError::Released`].
pub(crate) struct Slot<S> {
    kind: ResourceKind,
    state: Mutex<Option<S>>,
}

impl<S> Slot<S> {
    pub(crate) fn new(kind: ResourceKind, state: S) -> Self {
        Self {
            kind,
            state: Mutex::new(Some(state)),
        }
    }

    /// Run `f` against the live state.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut S) -> BridgeResult<R>) -> BridgeResult<R> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(BridgeError::Released(self.kind))?;
        f(state)
    }

    /// Drop the state; later calls to [`Slot::with`] fail.
    pub(crate) fn clear(&self) -> Option<S> {
        self.state.lock().take()
    }
}
