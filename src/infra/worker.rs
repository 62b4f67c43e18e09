use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::debug;

use crate::error::{LaunchFailure, Result};

/// Worker ids handed out by default: `0..DEFAULT_WORKER_CAPACITY`.
pub const DEFAULT_WORKER_CAPACITY: u16 = 1000;

/// Hands out worker ids that are unique among live environments.
///
/// An id stays reserved for as long as its [`WorkerLease`] is alive, so two
/// simulators never end up listening on the same port.
#[derive(Debug, Clone)]
pub struct WorkerIdAllocator {
    inner: Arc<AllocatorInner>,
}

#[derive(Debug)]
struct AllocatorInner {
    capacity: u16,
    in_use: Mutex<BTreeSet<u16>>,
}

impl AllocatorInner {
    fn held(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.in_use.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WorkerIdAllocator {
    pub fn new(capacity: u16) -> Self {
        Self {
            inner: Arc::new(AllocatorInner {
                capacity,
                in_use: Mutex::new(BTreeSet::new()),
            }),
        }
    }

    /// The allocator shared by every factory in this process.
    pub fn global() -> &'static WorkerIdAllocator {
        static GLOBAL: OnceLock<WorkerIdAllocator> = OnceLock::new();
        GLOBAL.get_or_init(|| WorkerIdAllocator::new(DEFAULT_WORKER_CAPACITY))
    }

    pub fn capacity(&self) -> u16 {
        self.inner.capacity
    }

    /// Reserves the lowest free id.
    pub fn acquire(&self) -> Result<WorkerLease> {
        let mut held = self.inner.held();
        let id = (0..self.inner.capacity)
            .find(|id| !held.contains(id))
            .ok_or(LaunchFailure::WorkersExhausted {
                capacity: self.inner.capacity,
            })?;
        held.insert(id);
        debug!("worker id {} acquired", id);
        Ok(self.lease(id))
    }

    /// Reserves a caller-chosen id; fails if a live environment holds it.
    pub fn acquire_specific(&self, worker_id: u16) -> Result<WorkerLease> {
        if worker_id >= self.inner.capacity {
            return Err(LaunchFailure::WorkerOutOfRange {
                worker_id,
                capacity: self.inner.capacity,
            }
            .into());
        }
        let mut held = self.inner.held();
        if !held.insert(worker_id) {
            return Err(LaunchFailure::WorkerInUse { worker_id }.into());
        }
        debug!("worker id {} acquired", worker_id);
        Ok(self.lease(worker_id))
    }

    pub fn in_use(&self) -> usize {
        self.inner.held().len()
    }

    pub fn is_held(&self, worker_id: u16) -> bool {
        self.inner.held().contains(&worker_id)
    }

    fn lease(&self, id: u16) -> WorkerLease {
        WorkerLease {
            id,
            allocator: Arc::clone(&self.inner),
        }
    }
}

/// Reservation of one worker id; released on drop.
#[derive(Debug)]
pub struct WorkerLease {
    id: u16,
    allocator: Arc<AllocatorInner>,
}

impl WorkerLease {
    pub fn id(&self) -> u16 {
        self.id
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.allocator.held().remove(&self.id);
        debug!("worker id {} released", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvError;

    #[test]
    fn test_acquire_lowest_free() {
        let allocator = WorkerIdAllocator::new(4);
        let a = allocator.acquire().unwrap();
        let b = allocator.acquire().unwrap();
        assert_eq!((a.id(), b.id()), (0, 1));

        drop(a);
        let c = allocator.acquire().unwrap();
        assert_eq!(c.id(), 0);
        assert_eq!(allocator.in_use(), 2);
    }

    #[test]
    fn test_specific_id_collision() {
        let allocator = WorkerIdAllocator::new(10);
        let lease = allocator.acquire_specific(7).unwrap();
        assert!(matches!(
            allocator.acquire_specific(7),
            Err(EnvError::Launch(LaunchFailure::WorkerInUse { worker_id: 7 }))
        ));

        drop(lease);
        assert!(allocator.acquire_specific(7).is_ok());
    }

    #[test]
    fn test_exhaustion() {
        let allocator = WorkerIdAllocator::new(2);
        let _a = allocator.acquire().unwrap();
        let _b = allocator.acquire().unwrap();
        assert!(matches!(
            allocator.acquire(),
            Err(EnvError::Launch(LaunchFailure::WorkersExhausted { capacity: 2 }))
        ));
    }

    #[test]
    fn test_specific_id_out_of_range() {
        let allocator = WorkerIdAllocator::new(2);
        assert!(matches!(
            allocator.acquire_specific(5),
            Err(EnvError::Launch(LaunchFailure::WorkerOutOfRange {
                worker_id: 5,
                capacity: 2
            }))
        ));
        assert!(matches!(
            allocator.acquire_specific(2),
            Err(EnvError::Launch(LaunchFailure::WorkerOutOfRange { .. }))
        ));
        assert_eq!(allocator.in_use(), 0);
        assert_eq!(allocator.acquire_specific(1).unwrap().id(), 1);
    }

    #[test]
    fn test_concurrent_acquire_is_unique() {
        let allocator = WorkerIdAllocator::new(64);
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.acquire().unwrap())
            })
            .collect();
        let leases: Vec<WorkerLease> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let ids: BTreeSet<u16> = leases.iter().map(WorkerLease::id).collect();
        assert_eq!(ids.len(), 32);
        drop(leases);
        assert_eq!(allocator.in_use(), 0);
    }
}
