//! Process-scoped object id allocator.
//!
//! Fresh ids are handed out in ascending order from the configured range.
//! Released ids are recycled only once the range is exhausted, and only after
//! the caller has dispatched the object's delete notifications.

use crate::config::AllocatorConfig;
use crate::error::AllocatorError;
use crate::types::ObjectId;
use std::collections::{BTreeSet, VecDeque};
use tracing::{trace, warn};

#[derive(Debug)]
pub struct ObjectIdAllocator {
    next: u64,
    max: u64,
    exhausted: bool,
    in_use: BTreeSet<ObjectId>,
    released: VecDeque<ObjectId>,
}

impl ObjectIdAllocator {
    pub fn new(config: &AllocatorConfig) -> Self {
        Self {
            next: config.min_id,
            max: config.max_id,
            exhausted: false,
            in_use: BTreeSet::new(),
            released: VecDeque::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<ObjectId, AllocatorError> {
        let object_id = if !self.exhausted {
            let id = ObjectId(self.next);
            if self.next == self.max {
                self.exhausted = true;
            } else {
                self.next += 1;
            }
            id
        } else {
            self.released.pop_front().ok_or_else(|| {
                warn!("⚠️ Object id range exhausted");
                AllocatorError::Exhausted
            })?
        };

        self.in_use.insert(object_id);
        trace!("Allocated object id {}", object_id);
        Ok(object_id)
    }

    /// Returns an id to the pool. Ids this allocator did not hand out, or
    /// already released, are ignored.
    pub fn release(&mut self, object_id: ObjectId) {
        if self.in_use.remove(&object_id) {
            self.released.push_back(object_id);
            trace!("Released object id {}", object_id);
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(min_id: u64, max_id: u64) -> ObjectIdAllocator {
        ObjectIdAllocator::new(&AllocatorConfig { min_id, max_id })
    }

    #[test]
    fn test_unique_ids() {
        let mut allocator = allocator(100, 200);
        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_eq!(a, ObjectId(100));
        assert_eq!(b, ObjectId(101));
        assert_eq!(allocator.in_use(), 2);
    }

    #[test]
    fn test_recycles_only_after_exhaustion() {
        let mut allocator = allocator(1, 2);
        let first = allocator.allocate().unwrap();
        allocator.release(first);
        assert_eq!(allocator.allocate().unwrap(), ObjectId(2));
        assert_eq!(allocator.allocate().unwrap(), first);
        assert_eq!(allocator.allocate(), Err(AllocatorError::Exhausted));
    }

    #[test]
    fn test_double_release_is_ignored() {
        let mut allocator = allocator(1, 1);
        let id = allocator.allocate().unwrap();
        allocator.release(id);
        allocator.release(id);
        allocator.release(ObjectId(50));
        assert_eq!(allocator.allocate().unwrap(), id);
        assert_eq!(allocator.allocate(), Err(AllocatorError::Exhausted));
    }
}
