//! Stream table shared between the dispatch task and stream handles.
//!
//! Lock discipline: lookups and snapshots take the read lock, registration,
//! removal and teardown take the write lock. The lock is never held across
//! an `.await`, so a plain `std::sync::RwLock` is enough.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::stream::Stream;
use crate::types::StreamId;

pub(crate) struct StreamTable {
    streams: RwLock<HashMap<StreamId, Stream>>,
}

impl StreamTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Register `stream`, returning whatever was previously stored under its id.
    pub(crate) fn insert(&self, stream: Stream) -> Option<Stream> {
        self.write().insert(stream.id(), stream)
    }

    pub(crate) fn get(&self, id: StreamId) -> Option<Stream> {
        self.read().get(&id).cloned()
    }

    /// Remove `stream` only if it is still the entry registered under its id.
    /// A peer may reuse an id, and the newer stream must survive.
    pub(crate) fn remove_stream(&self, stream: &Stream) -> bool {
        let mut streams = self.write();
        match streams.get(&stream.id()) {
            Some(current) if current.same_as(stream) => {
                streams.remove(&stream.id());
                true
            }
            _ => false,
        }
    }

    /// Copy of the current entries; later changes to the table are not reflected.
    pub(crate) fn snapshot(&self) -> Vec<Stream> {
        self.read().values().cloned().collect()
    }

    /// Empty the table and hand back what it held.
    pub(crate) fn drain(&self) -> Vec<Stream> {
        self.write().drain().map(|(_, stream)| stream).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    // A panic while holding the lock leaves the map itself consistent, so
    // poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<StreamId, Stream>> {
        self.streams.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<StreamId, Stream>> {
        self.streams.write().unwrap_or_else(PoisonError::into_inner)
    }
}
