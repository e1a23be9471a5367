//! Handlebridge - Native Resources Behind Opaque Handles
//!
//! A managed host (a VM, an embedding runtime, a scripting layer) cannot hold
//! Rust objects directly. Handlebridge keeps cryptographic engines,
//! arbitrary-precision integers, sockets and TLS sessions on the native side
//! and gives the host a `u64` handle for each.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Host proxy    │  holds only a handle; dispose() / finalizer
//! └────────┬────────┘
//!          │ handle
//!          ▼
//! ┌─────────────────┐
//! │   resources::*  │  resolve handles, run the operation, register results
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   HandleTable   │  handle -> Arc<dyn NativeObject>, one mutex
//! └─────────────────┘
//! ```
//!
//! # Handle rules
//!
//! - Handles start at 100 and only ever increase; they are never reused.
//! - Releasing destroys the object exactly once; releasing again is a no-op.
//! - A released or unknown handle resolves to nothing, which operations
//!   report as an invalid-state error.
//!
//! # Example
//!
//! ```rust
//! use handlebridge::resources::hmac::{self, HmacDigest};
//!
//! let h = hmac::hmac_initialize(HmacDigest::Sha256).unwrap();
//! hmac::hmac_set_key(h, b"key").unwrap();
//! hmac::hmac_set_message(h, b"message").unwrap();
//! let tag = hmac::hmac_get_hmac(h).unwrap();
//! assert_eq!(tag.len(), 32);
//! hmac::hmac_dispose(h);
//!
//! // The handle is dead now.
//! assert!(hmac::hmac_get_hmac(h).unwrap_err().is_invalid_state());
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod registry;
pub mod resources;

pub use config::{BridgeConfig, ConfigError, ConfigResult};
pub use error::{BridgeError, BridgeResult};
pub use registry::{Handle, HandleTable, NativeObject, Resource, ResourceKind, NULL_HANDLE};
