//! Handle table.
//!
//! Maps integer handles to owned native objects. All three operations take the
//! same mutex, held only for the map access itself:
//!
//! - `register` assigns the next handle and stores a live entry.
//! - `lookup` returns a shared reference to a live entry's object.
//! - `release` flips the entry to released and destroys the object.
//!
//! Released entries are kept as tombstones and the counter never goes
//! backwards, so a stale handle can only ever resolve to "not found".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::object::{downcast, NativeObject, Resource, ResourceKind};
use crate::error::{BridgeError, BridgeResult};

/// Opaque handle handed to the host.
pub type Handle = u64;

/// Value the host uses for "no object"; never issued.
pub const NULL_HANDLE: Handle = 0;

/// First handle issued by a default table.
pub const FIRST_HANDLE: Handle = 100;

/// One slot in the table.
pub struct RegistryEntry {
    object: Option<Arc<dyn NativeObject>>,
    kind: ResourceKind,
    released: bool,
}

impl RegistryEntry {
    fn live(object: Arc<dyn NativeObject>) -> Self {
        Self {
            kind: object.kind(),
            object: Some(object),
            released: false,
        }
    }

    /// Kind of the object stored (or formerly stored) here.
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Whether the entry is a tombstone.
    pub fn is_released(&self) -> bool {
        self.released
    }
}

/// Snapshot of table occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    /// Entries still holding an object.
    pub live: usize,
    /// Tombstones.
    pub released: usize,
    /// Handle the next registration will receive.
    pub next_handle: Handle,
}

struct TableInner {
    entries: HashMap<Handle, RegistryEntry>,
    next: Handle,
}

/// Registry of native objects keyed by handle.
pub struct HandleTable {
    inner: Mutex<TableInner>,
}

impl HandleTable {
    /// Create a table issuing handles from [`FIRST_HANDLE`].
    pub fn new() -> Self {
        Self::with_first_handle(FIRST_HANDLE)
    }

    /// Create a table issuing handles from `first`.
    ///
    /// A first handle of zero is moved to one so that [`NULL_HANDLE`] is
    /// never issued.
    pub fn with_first_handle(first: Handle) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next: first.max(NULL_HANDLE + 1),
            }),
        }
    }

    /// Take ownership of `object` and return its new handle.
    pub fn register<T: NativeObject>(&self, object: T) -> Handle {
        self.register_shared(Arc::new(object))
    }

    /// Register an already boxed object.
    pub fn register_boxed(&self, object: Box<dyn NativeObject>) -> Handle {
        self.register_shared(Arc::from(object))
    }

    fn register_shared(&self, object: Arc<dyn NativeObject>) -> Handle {
        let kind = object.kind();
        let handle = {
            let mut inner = self.inner.lock();
            let handle = inner.next;
            inner.entries.insert(handle, RegistryEntry::live(object));
            inner.next += 1;
            handle
        };
        log::trace!("registered {} resource as handle {}", kind, handle);
        handle
    }

    /// Resolve a handle to its object.
    ///
    /// Returns `None` for handles never issued and for released handles. The
    /// returned reference is meant for the current call only; holding on to
    /// it past that may observe a destroyed resource.
    pub fn lookup(&self, handle: Handle) -> Option<Arc<dyn NativeObject>> {
        let found = {
            let inner = self.inner.lock();
            inner
                .entries
                .get(&handle)
                .filter(|entry| !entry.released)
                .and_then(|entry| entry.object.clone())
        };
        if found.is_none() {
            log::debug!("lookup of handle {} found nothing", handle);
        }
        found
    }

    /// Resolve a handle and recover its concrete type.
    pub fn lookup_as<T: Resource>(&self, handle: Handle) -> BridgeResult<Arc<T>> {
        let object = self
            .lookup(handle)
            .ok_or(BridgeError::InvalidHandle(handle))?;
        downcast::<T>(handle, object)
    }

    /// Release a handle, destroying its object on the first call.
    ///
    /// Unknown and already released handles are ignored.
    pub fn release(&self, handle: Handle) {
        let taken = {
            let mut inner = self.inner.lock();
            match inner.entries.get_mut(&handle) {
                Some(entry) if !entry.released => {
                    entry.released = true;
                    entry.object.take()
                }
                Some(_) => {
                    log::debug!("handle {} already released", handle);
                    None
                }
                None => {
                    log::debug!("release of unknown handle {}", handle);
                    None
                }
            }
        };

        // Only the thread that flipped the entry gets here with an object.
        if let Some(object) = taken {
            log::trace!("releasing {} resource at handle {}", object.kind(), handle);
            object.destroy();
        }
    }

    /// Whether `handle` currently resolves to an object.
    pub fn is_live(&self, handle: Handle) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&handle)
            .map_or(false, |entry| !entry.released)
    }

    /// Kind recorded for `handle`, including released handles.
    pub fn kind_of(&self, handle: Handle) -> Option<ResourceKind> {
        let inner = self.inner.lock();
        inner.entries.get(&handle).map(RegistryEntry::kind)
    }

    /// Handles that are still live, in ascending order.
    pub fn live_handles(&self) -> Vec<Handle> {
        let inner = self.inner.lock();
        let mut handles: Vec<Handle> = inner
            .entries
            .iter()
            .filter(|(_, entry)| !entry.released)
            .map(|(&handle, _)| handle)
            .collect();
        handles.sort_unstable();
        handles
    }

    /// Current occupancy.
    pub fn stats(&self) -> TableStats {
        let inner = self.inner.lock();
        let released = inner.entries.values().filter(|e| e.released).count();
        TableStats {
            live: inner.entries.len() - released,
            released,
            next_handle: inner.next,
        }
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    struct Counted {
        name: &'static str,
        destroyed: Arc<AtomicUsize>,
    }

    impl Counted {
        fn new(name: &'static str) -> (Self, Arc<AtomicUsize>) {
            let destroyed = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    destroyed: destroyed.clone(),
                },
                destroyed,
            )
        }
    }

    impl NativeObject for Counted {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Other
        }

        fn destroy(&self) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Resource for Counted {
        const KIND: ResourceKind = ResourceKind::Other;
    }

    struct Socketish;

    impl NativeObject for Socketish {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Socket
        }
        fn destroy(&self) {}
    }

    impl Resource for Socketish {
        const KIND: ResourceKind = ResourceKind::Socket;
    }

    fn name_of(table: &HandleTable, handle: Handle) -> Option<&'static str> {
        table.lookup_as::<Counted>(handle).ok().map(|c| c.name)
    }

    #[test]
    fn test_register_lookup_release_scenario() {
        let table = HandleTable::new();
        let (a, a_count) = Counted::new("A");
        let (b, _) = Counted::new("B");
        let (c, _) = Counted::new("C");

        assert_eq!(table.register(a), 100);
        assert_eq!(table.register(b), 101);
        assert_eq!(name_of(&table, 100), Some("A"));

        table.release(100);
        assert!(table.lookup(100).is_none());
        assert_eq!(name_of(&table, 101), Some("B"));

        table.release(100);
        assert_eq!(a_count.load(Ordering::SeqCst), 1);

        assert_eq!(table.register(c), 102);
    }

    #[test]
    fn test_lookup_unknown_handle() {
        let table = HandleTable::new();
        assert!(table.lookup(999).is_none());
        assert!(table.lookup(NULL_HANDLE).is_none());
        let err = table.lookup_as::<Counted>(999).err().unwrap();
        assert!(matches!(err, BridgeError::InvalidHandle(999)));
    }

    #[test]
    fn test_release_unknown_handle_is_noop() {
        let table = HandleTable::new();
        table.release(12345);
        assert_eq!(
            table.stats(),
            TableStats {
                live: 0,
                released: 0,
                next_handle: 100
            }
        );
    }

    #[test]
    fn test_wrong_kind_is_invalid_state() {
        let table = HandleTable::new();
        let handle = table.register(Socketish);
        let err = table.lookup_as::<Counted>(handle).err().unwrap();
        assert!(err.is_invalid_state());
        match err {
            BridgeError::WrongKind {
                expected, found, ..
            } => {
                assert_eq!(expected, ResourceKind::Other);
                assert_eq!(found, ResourceKind::Socket);
            }
            other => panic!("unexpected error: {other}"),
        }
        // The object is untouched by a failed downcast.
        assert!(table.lookup_as::<Socketish>(handle).is_ok());
    }

    #[test]
    fn test_no_reuse_after_release() {
        let table = HandleTable::new();
        let first = table.register(Counted::new("first").0);
        table.release(first);
        for _ in 0..1000 {
            let h = table.register(Counted::new("later").0);
            assert_ne!(h, first);
        }
        assert!(table.lookup(first).is_none());
    }

    #[test]
    fn test_tombstones_are_kept() {
        let table = HandleTable::new();
        let h = table.register(Socketish);
        table.release(h);
        assert!(!table.is_live(h));
        assert_eq!(table.kind_of(h), Some(ResourceKind::Socket));
        let stats = table.stats();
        assert_eq!(stats.live, 0);
        assert_eq!(stats.released, 1);
    }

    #[test]
    fn test_first_handle_zero_is_bumped() {
        let table = HandleTable::with_first_handle(0);
        assert_eq!(table.register(Socketish), 1);
    }

    #[test]
    fn test_live_handles_sorted() {
        let table = HandleTable::with_first_handle(10);
        for _ in 0..5 {
            table.register(Socketish);
        }
        table.release(12);
        assert_eq!(table.live_handles(), vec![10, 11, 13, 14]);
    }

    #[test]
    fn test_concurrent_register_unique() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..PER_THREAD)
                        .map(|_| table.register(Socketish))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for h in worker.join().unwrap() {
                assert!(all.insert(h), "duplicate handle {h}");
            }
        }

        let total = (THREADS * PER_THREAD) as u64;
        assert_eq!(all.len() as u64, total);
        // No gaps: exactly the range [100, 100 + total).
        assert_eq!(*all.iter().min().unwrap(), 100);
        assert_eq!(*all.iter().max().unwrap(), 100 + total - 1);
    }

    #[test]
    fn test_concurrent_release_destroys_once() {
        for _ in 0..50 {
            let table = Arc::new(HandleTable::new());
            let (obj, count) = Counted::new("shared");
            let handle = table.register(obj);
            let barrier = Arc::new(Barrier::new(2));

            let racers: Vec<_> = (0..2)
                .map(|_| {
                    let table = table.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        table.release(handle);
                    })
                })
                .collect();
            for racer in racers {
                racer.join().unwrap();
            }

            assert_eq!(count.load(Ordering::SeqCst), 1);
            assert!(table.lookup(handle).is_none());
        }
    }

    #[test]
    fn test_lookup_racing_release_sees_whole_states() {
        let table = Arc::new(HandleTable::new());
        let (obj, count) = Counted::new("raced");
        let handle = table.register(obj);

        let reader = {
            let table = table.clone();
            thread::spawn(move || {
                let mut seen_released = false;
                for _ in 0..10_000 {
                    match table.lookup_as::<Counted>(handle) {
                        Ok(found) => {
                            assert!(!seen_released, "handle came back to life");
                            assert_eq!(found.name, "raced");
                        }
                        Err(err) => {
                            assert!(matches!(err, BridgeError::InvalidHandle(_)));
                            seen_released = true;
                        }
                    }
                }
            })
        };

        table.release(handle);
        reader.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
