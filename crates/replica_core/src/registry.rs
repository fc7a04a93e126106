//! # Object Registry
//!
//! Process-local mapping from object identifier to the views active in this
//! process. Creating a view is the only way to make an object exist here, and
//! destroying an object tears down every view of it before the entry goes.
//!
//! The registry only owns the views. Side effects outside the registry
//! (interest index, tick tasks, id allocation) are returned to the caller as
//! [`TeardownAction`]s so they can be executed in order under the same lock.

use crate::error::RegistryError;
use crate::types::{ChannelId, Location, ObjectId, ObjectType};
use crate::view::{AuthorityHandle, Presenter, Role, Scope, TeardownAction, View, ViewKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of tearing down one view.
#[derive(Debug, Clone, PartialEq)]
pub struct TornDown {
    pub key: ViewKey,
    pub object_type: ObjectType,
    pub location: Location,
    pub actions: Vec<TeardownAction>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegistryStats {
    pub views_created: u64,
    pub views_destroyed: u64,
    pub duplicate_rejections: u64,
}

/// Views active in this process, keyed by (object, role, scope).
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    views: BTreeMap<ViewKey, View>,
    presenter: Option<Arc<dyn Presenter>>,
    stats: RegistryStats,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry whose client-scoped observer views forward
    /// presentation events to `presenter`.
    pub fn with_presenter(presenter: Arc<dyn Presenter>) -> Self {
        Self {
            presenter: Some(presenter),
            ..Self::default()
        }
    }

    /// Creates a view of `object_id` in the given role and scope.
    ///
    /// Fails with [`RegistryError::DuplicateObject`] if the same role already
    /// has a view in that scope, and with [`RegistryError::AuthoritativeExists`]
    /// if a second authoritative view is requested.
    pub fn create(
        &mut self,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
        role: Role,
        scope: Scope,
    ) -> Result<&mut View, RegistryError> {
        let key = ViewKey::new(object_id, role, scope);

        if self.views.contains_key(&key) {
            self.stats.duplicate_rejections += 1;
            error!("❌ Duplicate {:?} view for object {} in {:?}", role, object_id, scope);
            return Err(RegistryError::DuplicateObject { object_id, role });
        }

        if role.is_authoritative() && self.authority(object_id).is_some() {
            self.stats.duplicate_rejections += 1;
            error!("❌ Object {} already has an authoritative view", object_id);
            return Err(RegistryError::AuthoritativeExists { object_id });
        }

        let mut view = View::new(key, object_type, location);
        if let (Some(presenter), Scope::Channel(_)) = (&self.presenter, scope) {
            if !role.is_authoritative() {
                view.attach_presenter(presenter.clone());
            }
        }

        self.stats.views_created += 1;
        debug!("🎯 Created {:?} view of {} {} at {} for {:?}", role, object_type, object_id, location, scope);
        Ok(self.views.entry(key).or_insert(view))
    }

    /// Destroys every view of `object_id`, authoritative view last.
    ///
    /// Calling this for an object that is already gone is a no-op.
    pub fn destroy(&mut self, object_id: ObjectId) -> Vec<TornDown> {
        let mut keys = self.keys_of(object_id);
        // Observers go first so no projection outlives the canonical state.
        keys.sort_by_key(|key| key.role.is_authoritative());

        let torn_down: Vec<TornDown> = keys
            .into_iter()
            .filter_map(|key| self.destroy_view(key))
            .collect();

        if !torn_down.is_empty() {
            info!("🗑️ Destroyed object {} ({} views)", object_id, torn_down.len());
        }
        torn_down
    }

    /// Tears down and removes a single view.
    pub fn destroy_view(&mut self, key: ViewKey) -> Option<TornDown> {
        let mut view = self.views.remove(&key)?;
        let actions = view.teardown();
        self.stats.views_destroyed += 1;
        debug!("🗑️ Tore down {:?} view of {} for {:?}", key.role, key.object_id, key.scope);
        Some(TornDown {
            key,
            object_type: view.object_type(),
            location: view.location(),
            actions,
        })
    }

    /// Primary view of an object: the authoritative one when present.
    pub fn lookup(&self, object_id: ObjectId) -> Option<&View> {
        self.views_of(object_id).next()
    }

    pub fn get(&self, key: &ViewKey) -> Option<&View> {
        self.views.get(key)
    }

    pub fn get_mut(&mut self, key: &ViewKey) -> Option<&mut View> {
        self.views.get_mut(key)
    }

    pub fn contains(&self, key: &ViewKey) -> bool {
        self.views.contains_key(key)
    }

    /// All views of an object, in role order.
    pub fn views_of(&self, object_id: ObjectId) -> impl Iterator<Item = &View> {
        self.views.range(Self::object_range(object_id)).map(|(_, view)| view)
    }

    /// Keys of every view held for `scope`.
    pub fn keys_in_scope(&self, scope: Scope) -> Vec<ViewKey> {
        self.views
            .keys()
            .filter(|key| key.scope == scope)
            .copied()
            .collect()
    }

    /// Proof of authority over `object_id`, if this process is authoritative.
    pub fn authority(&self, object_id: ObjectId) -> Option<AuthorityHandle> {
        self.views_of(object_id)
            .find(|view| view.role().is_authoritative())
            .map(|view| AuthorityHandle::new(view.object_id()))
    }

    /// Applies a replicated field update to every receiving view of the
    /// object. Returns how many views took it.
    pub fn apply_update(&mut self, object_id: ObjectId, field: &str, args: &[Value]) -> usize {
        self.views
            .range_mut(Self::object_range(object_id))
            .filter(|(_, view)| !view.role().is_authoritative())
            .map(|(_, view)| view.apply_update(field, args))
            .filter(|applied| *applied)
            .count()
    }

    /// Moves every view of an object to a new location.
    pub fn relocate(&mut self, object_id: ObjectId, location: Location) {
        for (_, view) in self.views.range_mut(Self::object_range(object_id)) {
            view.set_location(location);
        }
    }

    /// Number of distinct objects with at least one view.
    pub fn object_count(&self) -> usize {
        let mut count = 0;
        let mut last = None;
        for key in self.views.keys() {
            if last != Some(key.object_id) {
                count += 1;
                last = Some(key.object_id);
            }
        }
        count
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    fn keys_of(&self, object_id: ObjectId) -> Vec<ViewKey> {
        self.views
            .range(Self::object_range(object_id))
            .map(|(key, _)| *key)
            .collect()
    }

    fn object_range(object_id: ObjectId) -> std::ops::RangeInclusive<ViewKey> {
        ViewKey::new(object_id, Role::Authoritative, Scope::Process)
            ..=ViewKey::new(object_id, Role::PlainObserver, Scope::Channel(ChannelId(u64::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{fields, Pose, AVATAR_ZONE, WORLD_ID};
    use crate::view::pose_args;

    fn avatar_location() -> Location {
        Location::new(WORLD_ID, AVATAR_ZONE)
    }

    #[test]
    fn test_create_and_lookup() {
        let mut registry = ObjectRegistry::new();
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::Authoritative, Scope::Process)
            .unwrap();
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(9)))
            .unwrap();

        let view = registry.lookup(ObjectId(1)).unwrap();
        assert_eq!(view.role(), Role::Authoritative);
        assert_eq!(registry.views_of(ObjectId(1)).count(), 2);
        assert_eq!(registry.object_count(), 1);
        assert!(registry.authority(ObjectId(1)).is_some());
        assert!(registry.lookup(ObjectId(2)).is_none());
    }

    #[test]
    fn test_duplicate_role_is_rejected() {
        let mut registry = ObjectRegistry::new();
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(9)))
            .unwrap();
        let err = registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(9)))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateObject { object_id: ObjectId(1), role: Role::PlainObserver });

        // Same role for a different channel is a separate projection
        assert!(registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(10)))
            .is_ok());
        assert_eq!(registry.stats().duplicate_rejections, 1);
    }

    #[test]
    fn test_single_authoritative_view() {
        let mut registry = ObjectRegistry::new();
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::Authoritative, Scope::Process)
            .unwrap();
        let err = registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::Authoritative, Scope::Channel(ChannelId(3)))
            .unwrap_err();
        assert_eq!(err, RegistryError::AuthoritativeExists { object_id: ObjectId(1) });
    }

    #[test]
    fn test_destroy_twice_is_noop() {
        let mut registry = ObjectRegistry::new();
        let view = registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::Authoritative, Scope::Process)
            .unwrap();
        view.record_teardown(TeardownAction::CancelTask);
        view.record_teardown(TeardownAction::UnregisterLocation);
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::OwnerObserver, Scope::Channel(ChannelId(4)))
            .unwrap();

        let torn_down = registry.destroy(ObjectId(1));
        assert_eq!(torn_down.len(), 2);
        assert_eq!(torn_down[0].key.role, Role::OwnerObserver);
        assert_eq!(torn_down[1].key.role, Role::Authoritative);
        assert_eq!(
            torn_down[1].actions,
            vec![TeardownAction::CancelTask, TeardownAction::UnregisterLocation]
        );

        assert!(registry.destroy(ObjectId(1)).is_empty());
        assert_eq!(registry.view_count(), 0);
        assert_eq!(registry.stats().views_destroyed, 2);
    }

    #[test]
    fn test_apply_update_skips_authoritative() {
        let mut registry = ObjectRegistry::new();
        for (role, scope) in [
            (Role::Authoritative, Scope::Process),
            (Role::OwnerObserver, Scope::Channel(ChannelId(1))),
            (Role::PlainObserver, Scope::Channel(ChannelId(2))),
        ] {
            registry
                .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), role, scope)
                .unwrap();
        }

        let pose = Pose::new(3.0, 4.0, 0.0, 45.0);
        let applied = registry.apply_update(ObjectId(1), fields::SET_XYZH, &pose_args(pose));
        assert_eq!(applied, 2);

        let owner = registry
            .get(&ViewKey::new(ObjectId(1), Role::OwnerObserver, Scope::Channel(ChannelId(1))))
            .unwrap();
        assert_eq!(owner.pose(), Some(pose));
    }

    #[test]
    fn test_keys_in_scope() {
        let mut registry = ObjectRegistry::new();
        registry
            .create(ObjectId(1), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(7)))
            .unwrap();
        registry
            .create(ObjectId(2), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(7)))
            .unwrap();
        registry
            .create(ObjectId(2), ObjectType::DistributedAvatar, avatar_location(), Role::PlainObserver, Scope::Channel(ChannelId(8)))
            .unwrap();
        assert_eq!(registry.keys_in_scope(Scope::Channel(ChannelId(7))).len(), 2);
    }
}
