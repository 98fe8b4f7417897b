use std::sync::Arc;

use dashmap::{DashMap, Entry};

pub use crate::decl::ServiceName;
use crate::supervisor::WorkerSlot;

pub mod error;

use self::error::{NameNotFound, NameTaken};

/// An explicit map from service names to supervised worker slots, backing the
/// named deployment shape.
///
/// A registry is created by the embedding application and shared via `Arc`;
/// there is no process-wide implicit registry. A named service registers
/// itself at `run`, is looked up by name on every call, and is removed when
/// it stops or when its restart budget is spent.
pub struct Registry<A, R> {
    entries: DashMap<ServiceName, Arc<WorkerSlot<A, R>>, ahash::RandomState>,
}

impl<A, R> Registry<A, R> {
    /// Construct a new empty [`Registry`].
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &self,
        name: ServiceName,
        slot: Arc<WorkerSlot<A, R>>,
    ) -> Result<(), NameTaken> {
        match self.entries.entry(name) {
            Entry::Occupied(entry) => Err(NameTaken {
                name: entry.key().clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(())
            }
        }
    }

    /// Remove the entry for `name` only while it still points at `slot`.
    /// Guards against a later registration under the same name being torn
    /// down by a stale supervisor.
    pub(crate) fn remove_slot(&self, name: &ServiceName, slot: &Arc<WorkerSlot<A, R>>) {
        self.entries
            .remove_if(name, |_, registered| Arc::ptr_eq(registered, slot));
    }

    pub(crate) fn lookup(&self, name: &ServiceName) -> Result<Arc<WorkerSlot<A, R>>, NameNotFound> {
        self.entries
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| NameNotFound { name: name.clone() })
    }

    /// Whether a service is currently registered under `name`.
    pub fn contains(&self, name: &ServiceName) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<A, R> Default for Registry<A, R> {
    fn default() -> Self {
        Self {
            entries: DashMap::default(),
        }
    }
}
