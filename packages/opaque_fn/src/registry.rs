//! Process-wide registry that hands out exactly one immutable descriptor per key.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::hash_map;
use std::sync::{LazyLock, RwLock};

use hash_hasher::HashedMap;
use tracing::debug;

use crate::ERR_POISONED_LOCK;

type Entry = &'static (dyn Any + Send + Sync);

// We use HashedMap which takes the raw value from Hash::hash() and uses it directly as the key.
// This is OK because TypeId already returns a hashed value as its raw value, no need to hash more.
type DescriptorRegistry = HashedMap<TypeId, Entry>;

// The authority on which record is canonical for each key. Entries are leaked on insertion and
// never removed, so every reference handed out stays valid for the lifetime of the process.
static GLOBAL_REGISTRY: LazyLock<RwLock<DescriptorRegistry>> =
    LazyLock::new(|| RwLock::new(DescriptorRegistry::default()));

thread_local! {
    // Cache of entries this thread has already obtained from the global registry, so that the
    // global lock is only taken once per key per thread.
    static LOCAL_REGISTRY: RefCell<DescriptorRegistry> = RefCell::new(DescriptorRegistry::default());
}

/// Returns the canonical record of type `D` registered under `key`, creating it with `build`
/// if this is the first request for that key in the process.
///
/// Every call with the same key returns a reference to the same record, on every thread.
/// The caller must use a key that identifies `D` uniquely, typically the `TypeId` of a type
/// that `D` is generic over.
pub(crate) fn canonical<D>(key: TypeId, build: impl FnOnce() -> D) -> &'static D
where
    D: Any + Send + Sync,
{
    // While thread-local storage is being torn down, the cache is no longer reachable and we
    // go straight to the global registry.
    let cached = LOCAL_REGISTRY
        .try_with(|local| local.borrow().get(&key).copied())
        .ok()
        .flatten();

    let entry = cached.unwrap_or_else(|| {
        let entry = get_or_register_global(key, build);

        // Failure only means thread-local storage is being destroyed, in which case
        // there is no cache left to fill.
        _ = LOCAL_REGISTRY.try_with(|local| {
            local.borrow_mut().insert(key, entry);
        });

        entry
    });

    entry
        .downcast_ref::<D>()
        .expect("every key identifies exactly one record type")
}

fn get_or_register_global<D>(key: TypeId, build: impl FnOnce() -> D) -> Entry
where
    D: Any + Send + Sync,
{
    if let Some(entry) = GLOBAL_REGISTRY
        .read()
        .expect(ERR_POISONED_LOCK)
        .get(&key)
        .copied()
    {
        return entry;
    }

    let mut global = GLOBAL_REGISTRY.write().expect(ERR_POISONED_LOCK);

    // Another thread may have registered the same key between our read and write locks.
    match global.entry(key) {
        hash_map::Entry::Occupied(entry) => *entry.get(),
        hash_map::Entry::Vacant(entry) => {
            let record: Entry = Box::leak(Box::new(build()));

            debug!(record_type = type_name::<D>(), "registered canonical record");

            *entry.insert(record)
        }
    }
}
