//! Process-wide handle table.
//!
//! The host sees a single handle space for the whole process. The table is
//! built on first use and takes its first handle from the active
//! configuration, so `config::install` must run before any resource is
//! registered if a non-default base is wanted.

use std::sync::Arc;

use once_cell::sync::Lazy;

use super::object::{NativeObject, Resource};
use super::table::{Handle, HandleTable, TableStats};
use crate::config;
use crate::error::BridgeResult;

static TABLE: Lazy<HandleTable> = Lazy::new(|| {
    let first = config::current().registry.first_handle;
    log::debug!("global handle table starts at {}", first);
    HandleTable::with_first_handle(first)
});

/// The process-wide table.
pub fn global() -> &'static HandleTable {
    &TABLE
}

/// Register an object in the global table.
pub fn register<T: NativeObject>(object: T) -> Handle {
    TABLE.register(object)
}

/// Look up a handle in the global table.
pub fn lookup(handle: Handle) -> Option<Arc<dyn NativeObject>> {
    TABLE.lookup(handle)
}

/// Look up a handle in the global table and downcast it.
pub fn lookup_as<T: Resource>(handle: Handle) -> BridgeResult<Arc<T>> {
    TABLE.lookup_as(handle)
}

/// Release a handle in the global table.
pub fn release(handle: Handle) {
    TABLE.release(handle)
}

/// Occupancy of the global table.
pub fn stats() -> TableStats {
    TABLE.stats()
}
