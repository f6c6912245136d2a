//! Device instance identifier
//!
//! The `+sip.instance` Contact parameter must stay the same across runs of
//! the same device. Where it is persisted is up to the embedder; the session
//! only sees the value, read once when it is constructed.

use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::Result;

/// Source of the session-stable instance UUID
pub trait InstanceIdStore: Send + Sync {
    /// Return the stored identifier, creating and persisting one if absent
    fn load_or_create(&self) -> Result<Uuid>;
}

/// Store that keeps the identifier for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryInstanceIdStore {
    id: Mutex<Option<Uuid>>,
}

impl MemoryInstanceIdStore {
    /// Create an empty store; the first load generates a random id
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with `id`
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id: Mutex::new(Some(id)),
        }
    }
}

impl InstanceIdStore for MemoryInstanceIdStore {
    fn load_or_create(&self) -> Result<Uuid> {
        let mut id = self.id.lock();
        Ok(*id.get_or_insert_with(Uuid::new_v4))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_is_stable() {
        let store = MemoryInstanceIdStore::new();
        let first = store.load_or_create().unwrap();
        assert_eq!(store.load_or_create().unwrap(), first);
    }

    #[test]
    fn test_memory_store_preloaded() {
        let id = Uuid::new_v4();
        let store = MemoryInstanceIdStore::with_id(id);
        assert_eq!(store.load_or_create().unwrap(), id);
    }
}
