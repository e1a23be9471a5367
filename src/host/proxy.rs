//! Host-side proxy objects.

use crate::registry::{self, Handle, NULL_HANDLE};

/// Host object owning one handle in the process-wide table.
///
/// `dispose` is the explicit release; `Drop` plays the part of the host
/// finalizer and releases again. The second release is a no-op.
#[derive(Debug)]
pub struct Proxy {
    handle: Handle,
}

impl Proxy {
    /// Wrap a handle returned by a resource constructor.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// A proxy that owns nothing.
    pub fn null() -> Self {
        Self {
            handle: NULL_HANDLE,
        }
    }

    /// Current handle, [`NULL_HANDLE`] after dispose.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Whether the proxy still holds a handle.
    pub fn is_disposed(&self) -> bool {
        self.handle == NULL_HANDLE
    }

    /// Release the handle and clear the field.
    pub fn dispose(&mut self) {
        if self.handle != NULL_HANDLE {
            registry::release(self.handle);
            self.handle = NULL_HANDLE;
        }
    }

    /// Release without clearing the field, as a finalizer racing `dispose`
    /// would.
    pub fn finalize(&self) {
        if self.handle != NULL_HANDLE {
            registry::release(self.handle);
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.finalize();
    }
}
