//! Host boundary.
//!
//! The pieces a managed host needs around the registry: conversions for its
//! signed byte arrays and UTF-16 strings, the exception it raises for a
//! [`BridgeError`](crate::BridgeError), and the proxy object that owns a handle.

pub mod codec;
pub mod exception;
pub mod proxy;

pub use codec::{ByteArrayCodec, StringCodec};
pub use exception::{ExceptionKind, HostException};
pub use proxy::Proxy;
