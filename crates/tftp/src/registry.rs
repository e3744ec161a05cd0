//! Registry of in-flight transfers
//!
//! Transfers are keyed by the peer's transfer ID (address and port) in two
//! disjoint namespaces, one per [`Direction`]. A peer may run one read and one
//! write at the same time but never two of the same kind.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TransferError;

/// Transfer ID: the peer's address and ephemeral port
pub type TransferId = SocketAddr;

/// Direction of a transfer, seen from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client reads a file from the server (RRQ)
    Get,
    /// Client writes a file to the server (WRQ)
    Put,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Put => write!(f, "put"),
        }
    }
}

struct Slots<T> {
    get: HashMap<TransferId, Arc<T>>,
    put: HashMap<TransferId, Arc<T>>,
    closed: bool,
}

impl<T> Slots<T> {
    fn map(&mut self, direction: Direction) -> &mut HashMap<TransferId, Arc<T>> {
        match direction {
            Direction::Get => &mut self.get,
            Direction::Put => &mut self.put,
        }
    }
}

/// Shared map of active transfers
///
/// Every operation takes the internal lock only for the map access itself;
/// callers never hold it across I/O.
pub struct JobRegistry<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> JobRegistry<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                get: HashMap::new(),
                put: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, Slots<T>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Find the job for `peer` in `direction`
    pub fn lookup(&self, direction: Direction, peer: TransferId) -> Option<Arc<T>> {
        self.slots().map(direction).get(&peer).cloned()
    }

    /// Register `job`, failing if the slot is taken or the registry is shut down
    pub fn create(&self, direction: Direction, peer: TransferId, job: Arc<T>) -> Result<(), TransferError> {
        let mut slots = self.slots();
        if slots.closed {
            return Err(TransferError::ShuttingDown);
        }

        match slots.map(direction).entry(peer) {
            Entry::Occupied(_) => Err(TransferError::AlreadyInProgress(peer)),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    /// Remove and return the job for `peer` in `direction`
    pub fn remove(&self, direction: Direction, peer: TransferId) -> Option<Arc<T>> {
        self.slots().map(direction).remove(&peer)
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.slots().map(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots();
        slots.get.is_empty() && slots.put.is_empty()
    }

    /// Empty both namespaces and refuse all further registrations
    pub fn drain(&self) -> Vec<Arc<T>> {
        let mut slots = self.slots();
        slots.closed = true;
        let mut jobs: Vec<Arc<T>> = slots.get.drain().map(|(_, job)| job).collect();
        jobs.extend(slots.put.drain().map(|(_, job)| job));
        jobs
    }
}

impl<T> Default for JobRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16) -> TransferId {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_create_lookup_remove() {
        let registry = JobRegistry::new();
        assert!(registry.lookup(Direction::Get, peer(1000)).is_none());

        registry.create(Direction::Get, peer(1000), Arc::new("job")).unwrap();
        assert_eq!(registry.lookup(Direction::Get, peer(1000)).as_deref(), Some(&"job"));
        assert_eq!(registry.len(Direction::Get), 1);

        assert!(registry.remove(Direction::Get, peer(1000)).is_some());
        assert!(registry.remove(Direction::Get, peer(1000)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_one_job_per_direction_and_peer() {
        let registry = JobRegistry::new();
        registry.create(Direction::Get, peer(1000), Arc::new(1)).unwrap();

        let err = registry.create(Direction::Get, peer(1000), Arc::new(2)).unwrap_err();
        assert!(matches!(err, TransferError::AlreadyInProgress(p) if p == peer(1000)));
        assert_eq!(registry.lookup(Direction::Get, peer(1000)).as_deref(), Some(&1));

        // Other direction and other ports are separate slots
        registry.create(Direction::Put, peer(1000), Arc::new(3)).unwrap();
        registry.create(Direction::Get, peer(1001), Arc::new(4)).unwrap();
        assert_eq!(registry.len(Direction::Get), 2);
        assert_eq!(registry.len(Direction::Put), 1);
    }

    #[test]
    fn test_drain_closes_registry() {
        let registry = JobRegistry::new();
        registry.create(Direction::Get, peer(1), Arc::new(1)).unwrap();
        registry.create(Direction::Put, peer(2), Arc::new(2)).unwrap();

        let mut drained: Vec<i32> = registry.drain().into_iter().map(|j| *j).collect();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(registry.is_empty());

        let err = registry.create(Direction::Get, peer(3), Arc::new(3)).unwrap_err();
        assert!(matches!(err, TransferError::ShuttingDown));
    }

    #[test]
    fn test_concurrent_creates_admit_one() {
        let registry = Arc::new(JobRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.create(Direction::Put, peer(9), Arc::new(i)).is_ok())
            })
            .collect();

        let admitted = handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.len(Direction::Put), 1);
    }
}
