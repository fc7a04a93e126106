//! # Interest Manager
//!
//! Tracks, per watcher, which (parent, zone) locations it observes and raises
//! "entered"/"departed" notifications when the set of objects visible to a
//! watcher changes.
//!
//! An object is visible to a watcher iff at least one of the watcher's
//! interests matches the object's location. Notifications are delivered
//! synchronously into an [`InterestSink`] in the order the changes happen:
//! an object created and deleted in the same batch yields its "entered"
//! followed by its "departed", never a collapsed pair.

use crate::error::InterestError;
use crate::types::{InterestId, Location, ObjectId, ObjectType, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// A change in what a watcher can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestEvent {
    Entered {
        watcher: Watcher,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
    },
    Departed {
        watcher: Watcher,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
    },
}

impl InterestEvent {
    pub fn watcher(&self) -> Watcher {
        match self {
            InterestEvent::Entered { watcher, .. } | InterestEvent::Departed { watcher, .. } => *watcher,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        match self {
            InterestEvent::Entered { object_id, .. } | InterestEvent::Departed { object_id, .. } => *object_id,
        }
    }
}

/// Receiver of interest notifications.
pub trait InterestSink {
    fn deliver(&mut self, event: InterestEvent);
}

impl InterestSink for Vec<InterestEvent> {
    fn deliver(&mut self, event: InterestEvent) {
        self.push(event);
    }
}

#[derive(Debug, Clone, Copy)]
struct LiveObject {
    object_type: ObjectType,
    location: Location,
}

#[derive(Debug, Default)]
struct WatcherInterests {
    next_id: u32,
    interests: BTreeMap<InterestId, Location>,
}

impl WatcherInterests {
    /// Next free handle. Ids wrap around, skipping handles still in use.
    fn allocate_id(&mut self) -> InterestId {
        loop {
            let candidate = InterestId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.interests.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn matches(&self, location: Location) -> bool {
        self.interests.values().any(|l| *l == location)
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InterestStats {
    pub interests_added: u64,
    pub interests_removed: u64,
    pub entered_delivered: u64,
    pub departed_delivered: u64,
}

/// Index of live objects by location plus every watcher's interests.
#[derive(Debug, Default)]
pub struct InterestManager {
    objects: BTreeMap<ObjectId, LiveObject>,
    watchers: BTreeMap<Watcher, WatcherInterests>,
    stats: InterestStats,
}

impl InterestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an interest and delivers an "entered" notification for every
    /// live object that becomes visible, before the handle is returned.
    pub fn add_interest(
        &mut self,
        watcher: Watcher,
        location: Location,
        sink: &mut impl InterestSink,
    ) -> InterestId {
        let entry = self.watchers.entry(watcher).or_default();
        let already_visible = entry.matches(location);
        let interest_id = entry.allocate_id();
        entry.interests.insert(interest_id, location);
        self.stats.interests_added += 1;

        debug!("👁️ {} added {} on {}", watcher, interest_id, location);

        if !already_visible {
            let matching: Vec<(ObjectId, LiveObject)> = self
                .objects
                .iter()
                .filter(|(_, object)| object.location == location)
                .map(|(id, object)| (*id, *object))
                .collect();
            for (object_id, object) in matching {
                self.emit_entered(watcher, object_id, object, sink);
            }
        }

        interest_id
    }

    /// Removes one interest. Objects no longer matched by any remaining
    /// interest of the watcher receive a "departed" notification.
    pub fn remove_interest(
        &mut self,
        watcher: Watcher,
        interest_id: InterestId,
        sink: &mut impl InterestSink,
    ) -> Result<Location, InterestError> {
        let removed = self
            .watchers
            .get_mut(&watcher)
            .and_then(|entry| entry.interests.remove(&interest_id));

        let Some(location) = removed else {
            debug!("Ignoring removal of unknown {} for {}", interest_id, watcher);
            return Err(InterestError::InterestNotFound { watcher, interest_id });
        };
        self.stats.interests_removed += 1;

        let still_visible = self
            .watchers
            .get(&watcher)
            .map(|entry| entry.matches(location))
            .unwrap_or(false);

        if !still_visible {
            let matching: Vec<(ObjectId, LiveObject)> = self
                .objects
                .iter()
                .filter(|(_, object)| object.location == location)
                .map(|(id, object)| (*id, *object))
                .collect();
            for (object_id, object) in matching {
                self.emit_departed(watcher, object_id, object, sink);
            }
        }

        debug!("👁️ {} removed {} on {}", watcher, interest_id, location);
        Ok(location)
    }

    /// Removes every interest of a watcher, delivering "departed" for all
    /// objects it could see. Returns the removed handles.
    pub fn remove_watcher(&mut self, watcher: Watcher, sink: &mut impl InterestSink) -> Vec<InterestId> {
        let ids: Vec<InterestId> = self
            .watchers
            .get(&watcher)
            .map(|entry| entry.interests.keys().copied().collect())
            .unwrap_or_default();

        for interest_id in &ids {
            // Ids come from the watcher's own table, removal cannot miss.
            let _ = self.remove_interest(watcher, *interest_id, sink);
        }
        self.watchers.remove(&watcher);
        ids
    }

    /// Indexes a newly live object and notifies every matching watcher.
    /// An object that is already live is treated as a move.
    pub fn notify_object_arrived(
        &mut self,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
        sink: &mut impl InterestSink,
    ) {
        if self.objects.contains_key(&object_id) {
            self.notify_object_moved(object_id, location, sink);
            return;
        }

        let object = LiveObject { object_type, location };
        self.objects.insert(object_id, object);
        trace!("Object {} arrived at {}", object_id, location);

        for watcher in self.watchers_of(location) {
            self.emit_entered(watcher, object_id, object, sink);
        }
    }

    /// Drops an object from the index and notifies every watcher that could
    /// see it. Unknown objects are ignored.
    pub fn notify_object_departed(&mut self, object_id: ObjectId, sink: &mut impl InterestSink) {
        let Some(object) = self.objects.remove(&object_id) else {
            return;
        };
        trace!("Object {} departed from {}", object_id, object.location);

        for watcher in self.watchers_of(object.location) {
            self.emit_departed(watcher, object_id, object, sink);
        }
    }

    /// Moves a live object, delivering "departed" to watchers that lose sight
    /// of it and "entered" to watchers that gain it.
    pub fn notify_object_moved(
        &mut self,
        object_id: ObjectId,
        new_location: Location,
        sink: &mut impl InterestSink,
    ) {
        let Some(object) = self.objects.get(&object_id).copied() else {
            return;
        };
        if object.location == new_location {
            return;
        }

        let old_watchers = self.watchers_of(object.location);
        let new_watchers = self.watchers_of(new_location);
        let moved = LiveObject {
            object_type: object.object_type,
            location: new_location,
        };
        self.objects.insert(object_id, moved);

        for watcher in old_watchers.iter().filter(|w| !new_watchers.contains(w)) {
            self.emit_departed(*watcher, object_id, object, sink);
        }
        for watcher in new_watchers.iter().filter(|w| !old_watchers.contains(w)) {
            self.emit_entered(*watcher, object_id, moved, sink);
        }
    }

    /// Every watcher with at least one interest matching `location`.
    pub fn watchers_of(&self, location: Location) -> Vec<Watcher> {
        self.watchers
            .iter()
            .filter(|(_, entry)| entry.matches(location))
            .map(|(watcher, _)| *watcher)
            .collect()
    }

    pub fn interests_of(&self, watcher: Watcher) -> Vec<(InterestId, Location)> {
        self.watchers
            .get(&watcher)
            .map(|entry| entry.interests.iter().map(|(id, l)| (*id, *l)).collect())
            .unwrap_or_default()
    }

    pub fn is_visible(&self, watcher: Watcher, object_id: ObjectId) -> bool {
        match (self.objects.get(&object_id), self.watchers.get(&watcher)) {
            (Some(object), Some(entry)) => entry.matches(object.location),
            _ => false,
        }
    }

    pub fn is_live(&self, object_id: ObjectId) -> bool {
        self.objects.contains_key(&object_id)
    }

    pub fn location_of(&self, object_id: ObjectId) -> Option<Location> {
        self.objects.get(&object_id).map(|object| object.location)
    }

    pub fn stats(&self) -> &InterestStats {
        &self.stats
    }

    fn emit_entered(&mut self, watcher: Watcher, object_id: ObjectId, object: LiveObject, sink: &mut impl InterestSink) {
        self.stats.entered_delivered += 1;
        sink.deliver(InterestEvent::Entered {
            watcher,
            object_id,
            object_type: object.object_type,
            location: object.location,
        });
    }

    fn emit_departed(&mut self, watcher: Watcher, object_id: ObjectId, object: LiveObject, sink: &mut impl InterestSink) {
        self.stats.departed_delivered += 1;
        sink.deliver(InterestEvent::Departed {
            watcher,
            object_id,
            object_type: object.object_type,
            location: object.location,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelId, AVATAR_ZONE, LOGIN_ZONE, ROOT_ID, WORLD_ID};

    fn avatars() -> Location {
        Location::new(WORLD_ID, AVATAR_ZONE)
    }

    fn client(id: u64) -> Watcher {
        Watcher::Client(ChannelId(id))
    }

    #[test]
    fn test_add_interest_enumerates_live_objects_once() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.notify_object_arrived(ObjectId(1), ObjectType::DistributedAvatar, avatars(), &mut events);
        manager.notify_object_arrived(ObjectId(2), ObjectType::DistributedAvatar, avatars(), &mut events);
        assert!(events.is_empty());

        manager.add_interest(client(1), avatars(), &mut events);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, InterestEvent::Entered { .. })));

        // An overlapping interest does not re-announce visible objects
        events.clear();
        manager.add_interest(client(1), avatars(), &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn test_arrival_notifies_matching_watchers_only() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.add_interest(client(1), avatars(), &mut events);
        manager.add_interest(client(2), Location::new(ROOT_ID, LOGIN_ZONE), &mut events);

        manager.notify_object_arrived(ObjectId(5), ObjectType::DistributedAvatar, avatars(), &mut events);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].watcher(), client(1));
        assert!(manager.is_visible(client(1), ObjectId(5)));
        assert!(!manager.is_visible(client(2), ObjectId(5)));
    }

    #[test]
    fn test_create_then_delete_in_one_batch_keeps_order() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.add_interest(client(1), avatars(), &mut events);

        manager.notify_object_arrived(ObjectId(5), ObjectType::DistributedAvatar, avatars(), &mut events);
        manager.notify_object_departed(ObjectId(5), &mut events);

        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InterestEvent::Entered { object_id: ObjectId(5), .. }));
        assert!(matches!(events[1], InterestEvent::Departed { object_id: ObjectId(5), .. }));
    }

    #[test]
    fn test_remove_interest_is_independent() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.notify_object_arrived(ObjectId(5), ObjectType::DistributedAvatar, avatars(), &mut events);
        let first = manager.add_interest(client(1), avatars(), &mut events);
        let second = manager.add_interest(client(1), avatars(), &mut events);
        events.clear();

        manager.remove_interest(client(1), first, &mut events).unwrap();
        assert!(events.is_empty(), "still visible through the second interest");

        manager.remove_interest(client(1), second, &mut events).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], InterestEvent::Departed { .. }));
    }

    #[test]
    fn test_interest_ids_skip_live_handles_after_wrapping() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        let login = Location::new(ROOT_ID, LOGIN_ZONE);
        let first = manager.add_interest(client(1), login, &mut events);
        assert_eq!(first, InterestId(0));

        manager.watchers.get_mut(&client(1)).unwrap().next_id = u32::MAX;
        let last = manager.add_interest(client(1), avatars(), &mut events);
        assert_eq!(last, InterestId(u32::MAX));

        // Wrapping lands on the live handle 0, which must not be reused
        let wrapped = manager.add_interest(client(1), avatars(), &mut events);
        assert_eq!(wrapped, InterestId(1));

        let interests = manager.interests_of(client(1));
        assert_eq!(interests.len(), 3);
        assert!(interests.contains(&(first, login)));
    }

    #[test]
    fn test_remove_unknown_interest() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        let err = manager.remove_interest(client(1), InterestId(3), &mut events).unwrap_err();
        assert_eq!(err, InterestError::InterestNotFound { watcher: client(1), interest_id: InterestId(3) });
        assert!(events.is_empty());
    }

    #[test]
    fn test_remove_watcher_clears_everything() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.notify_object_arrived(ObjectId(5), ObjectType::DistributedAvatar, avatars(), &mut events);
        manager.add_interest(client(1), avatars(), &mut events);
        manager.add_interest(client(1), Location::new(ROOT_ID, LOGIN_ZONE), &mut events);
        events.clear();

        let removed = manager.remove_watcher(client(1), &mut events);
        assert_eq!(removed.len(), 2);
        assert_eq!(events.len(), 1);
        assert!(manager.interests_of(client(1)).is_empty());
        assert!(manager.watchers_of(avatars()).is_empty());
    }

    #[test]
    fn test_object_move_between_zones() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        let other = Location::new(WORLD_ID, 7);
        manager.add_interest(client(1), avatars(), &mut events);
        manager.add_interest(client(2), other, &mut events);
        manager.notify_object_arrived(ObjectId(5), ObjectType::DistributedAvatar, avatars(), &mut events);
        events.clear();

        manager.notify_object_moved(ObjectId(5), other, &mut events);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], InterestEvent::Departed { watcher, .. } if watcher == client(1)));
        assert!(matches!(events[1], InterestEvent::Entered { watcher, .. } if watcher == client(2)));
        assert_eq!(manager.location_of(ObjectId(5)), Some(other));
    }

    #[test]
    fn test_departed_unknown_object_is_ignored() {
        let mut manager = InterestManager::new();
        let mut events = Vec::new();
        manager.add_interest(client(1), avatars(), &mut events);
        manager.notify_object_departed(ObjectId(99), &mut events);
        assert!(events.is_empty());
        assert_eq!(manager.stats().interests_added, 1);
    }
}
