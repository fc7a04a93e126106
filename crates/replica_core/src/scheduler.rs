//! Per-tick scheduler.
//!
//! Objects with a recurring simulation register one task here when they are
//! created and deregister it when they are destroyed. The scheduler is owned
//! by the same process state as the registry, so it never outlives the objects
//! it steps, and a task is only run while the registry still vouches for the
//! object's authority.

use crate::error::SchedulerError;
use crate::types::ObjectId;
use crate::view::AuthorityHandle;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// A state field change produced by a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub object_id: ObjectId,
    pub field: &'static str,
    pub args: Vec<Value>,
}

/// Work run once per simulation tick on behalf of an authoritative object.
pub trait TickTask {
    fn object_id(&self) -> ObjectId;

    /// Advances by `dt` seconds, returning an update to publish, if any.
    fn tick(&mut self, authority: &AuthorityHandle, dt: f64) -> Option<FieldUpdate>;
}

#[derive(Debug)]
pub struct TickScheduler<T: TickTask> {
    tasks: BTreeMap<ObjectId, T>,
    ticks: u64,
}

impl<T: TickTask> TickScheduler<T> {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            ticks: 0,
        }
    }

    /// Registers a task. Each object may register exactly once.
    pub fn register(&mut self, task: T) -> Result<(), SchedulerError> {
        let object_id = task.object_id();
        if self.tasks.contains_key(&object_id) {
            return Err(SchedulerError::AlreadyRegistered(object_id));
        }
        self.tasks.insert(object_id, task);
        debug!("⏱️ Tick task registered for {}", object_id);
        Ok(())
    }

    /// Removes a task; nothing is published for it afterwards.
    pub fn deregister(&mut self, object_id: ObjectId) -> Option<T> {
        let task = self.tasks.remove(&object_id);
        if task.is_some() {
            debug!("⏱️ Tick task cancelled for {}", object_id);
        }
        task
    }

    pub fn get(&self, object_id: ObjectId) -> Option<&T> {
        self.tasks.get(&object_id)
    }

    pub fn get_mut(&mut self, object_id: ObjectId) -> Option<&mut T> {
        self.tasks.get_mut(&object_id)
    }

    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.tasks.contains_key(&object_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs every task once. `authorize` must vouch for each object's
    /// authoritative view; tasks it refuses are skipped.
    pub fn run(
        &mut self,
        dt: f64,
        authorize: impl Fn(ObjectId) -> Option<AuthorityHandle>,
    ) -> Vec<FieldUpdate> {
        self.ticks += 1;
        let mut updates = Vec::new();
        for (object_id, task) in self.tasks.iter_mut() {
            let Some(authority) = authorize(*object_id) else {
                trace!("Skipping tick for {} without authority", object_id);
                continue;
            };
            if let Some(update) = task.tick(&authority, dt) {
                updates.push(update);
            }
        }
        updates
    }
}

impl<T: TickTask> Default for TickScheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Counter {
        object_id: ObjectId,
        count: u32,
    }

    impl TickTask for Counter {
        fn object_id(&self) -> ObjectId {
            self.object_id
        }

        fn tick(&mut self, _authority: &AuthorityHandle, _dt: f64) -> Option<FieldUpdate> {
            self.count += 1;
            Some(FieldUpdate {
                object_id: self.object_id,
                field: "count",
                args: vec![self.count.into()],
            })
        }
    }

    fn counter(id: u64) -> Counter {
        Counter { object_id: ObjectId(id), count: 0 }
    }

    #[test]
    fn test_register_once() {
        let mut scheduler = TickScheduler::new();
        scheduler.register(counter(1)).unwrap();
        assert_eq!(
            scheduler.register(counter(1)),
            Err(SchedulerError::AlreadyRegistered(ObjectId(1)))
        );
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_run_skips_unauthorized() {
        let mut scheduler = TickScheduler::new();
        scheduler.register(counter(1)).unwrap();
        scheduler.register(counter(2)).unwrap();

        let updates = scheduler.run(0.05, |id| (id == ObjectId(2)).then(|| AuthorityHandle::new(id)));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].object_id, ObjectId(2));
        assert_eq!(scheduler.get(ObjectId(1)).unwrap().count, 0);
        assert_eq!(scheduler.ticks(), 1);
    }

    #[test]
    fn test_deregistered_task_never_runs() {
        let mut scheduler = TickScheduler::new();
        scheduler.register(counter(1)).unwrap();
        assert!(scheduler.deregister(ObjectId(1)).is_some());
        assert!(scheduler.deregister(ObjectId(1)).is_none());

        let updates = scheduler.run(0.05, |id| Some(AuthorityHandle::new(id)));
        assert!(updates.is_empty());
        assert!(scheduler.is_empty());
    }
}
