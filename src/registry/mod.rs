//! Handle registry.
//!
//! Native objects live here and the host only ever sees integer handles.
//!
//! ```text
//! host proxy ──handle──► HandleTable ──Arc──► NativeObject (cipher, socket, ...)
//! ```
//!
//! Handles are issued from a monotonically increasing counter starting at
//! [`FIRST_HANDLE`] and are never reused. [`NULL_HANDLE`] is reserved for
//! "no object".

mod global;
mod object;
mod table;

pub use global::{global, lookup, lookup_as, register, release, stats};
pub use object::{AsAnyArc, NativeObject, Resource, ResourceKind};
pub use table::{Handle, HandleTable, RegistryEntry, TableStats, FIRST_HANDLE, NULL_HANDLE};
