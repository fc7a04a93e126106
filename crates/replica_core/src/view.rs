//! # Role-tagged views
//!
//! A [`View`] is one role-specific projection of a distributed object. Instead
//! of one type per role, every view carries a [`Role`] tag and the role's
//! [`Capabilities`]. Operations that only some roles may perform are gated by
//! proof handles that cannot be built outside this crate:
//!
//! - [`AuthorityHandle`] is issued by the object registry only for an object
//!   with a live authoritative view. Only its holder may mutate avatar state.
//! - [`OwnerHandle`] is issued by the session controller only to the current
//!   owner of an object. Only its holder may originate movement intents.
//!
//! Presentation (rendering, scene resources) is an injected [`Presenter`]
//! collaborator; the core never renders anything itself.

use crate::types::{fields, ChannelId, Location, ObjectId, ObjectType, Pose};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// The role a view plays for its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The single process holding the canonical, mutable state
    Authoritative,
    /// A server process observing the authoritative state
    AuthoritativeObserver,
    /// The controlling client's projection with owner-only operations
    OwnerObserver,
    /// Server-side relay reachable by unauthenticated clients
    UnauthenticatedRelay,
    /// Read-only projection for any interested watcher
    PlainObserver,
}

impl Role {
    pub fn capabilities(&self) -> Capabilities {
        match self {
            Role::Authoritative => Capabilities {
                mutate_state: true,
                originate_intents: false,
                relay_anonymous: false,
                receive_updates: false,
            },
            Role::AuthoritativeObserver => Capabilities {
                receive_updates: true,
                ..Capabilities::NONE
            },
            Role::OwnerObserver => Capabilities {
                originate_intents: true,
                receive_updates: true,
                ..Capabilities::NONE
            },
            Role::UnauthenticatedRelay => Capabilities {
                relay_anonymous: true,
                ..Capabilities::NONE
            },
            Role::PlainObserver => Capabilities {
                receive_updates: true,
                ..Capabilities::NONE
            },
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, Role::Authoritative)
    }
}

/// What a role is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// May change the canonical state of the object
    pub mutate_state: bool,
    /// May submit movement intents for the object
    pub originate_intents: bool,
    /// May accept requests from unauthenticated clients
    pub relay_anonymous: bool,
    /// Applies replicated state updates
    pub receive_updates: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        mutate_state: false,
        originate_intents: false,
        relay_anonymous: false,
        receive_updates: false,
    };
}

/// Who a view belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// This server process
    Process,
    /// A client connection's projection tracked on its behalf
    Channel(ChannelId),
}

/// Registry key of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewKey {
    pub object_id: ObjectId,
    pub role: Role,
    pub scope: Scope,
}

impl ViewKey {
    pub fn new(object_id: ObjectId, role: Role, scope: Scope) -> Self {
        Self { object_id, role, scope }
    }
}

/// Side effects a view's teardown must trigger outside the registry.
///
/// Recorded while the view is constructed, so a partially constructed view
/// only undoes what was actually set up. Ordered by execution priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TeardownAction {
    /// Stop the object's per-tick task
    CancelTask,
    /// Remove the object from the interest index (delivers "departed")
    UnregisterLocation,
    /// Return the object id to the allocator
    ReleaseId,
}

/// Events handed to a [`Presenter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PresentationEvent {
    Spawned { object_type: ObjectType, location: Location },
    PoseChanged(Pose),
    Released,
}

/// Presentation collaborator injected into observer views on client builds.
pub trait Presenter: Send + Sync + std::fmt::Debug {
    fn present(&self, object_id: ObjectId, role: Role, event: &PresentationEvent);
}

/// One role-specific projection of a distributed object.
#[derive(Debug)]
pub struct View {
    object_id: ObjectId,
    object_type: ObjectType,
    location: Location,
    role: Role,
    scope: Scope,
    pose: Option<Pose>,
    presenter: Option<Arc<dyn Presenter>>,
    teardown_actions: Vec<TeardownAction>,
    torn_down: bool,
}

impl View {
    pub(crate) fn new(key: ViewKey, object_type: ObjectType, location: Location) -> Self {
        Self {
            object_id: key.object_id,
            object_type,
            location,
            role: key.role,
            scope: key.scope,
            pose: None,
            presenter: None,
            teardown_actions: Vec::new(),
            torn_down: false,
        }
    }

    pub fn key(&self) -> ViewKey {
        ViewKey::new(self.object_id, self.role, self.scope)
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn location(&self) -> Location {
        self.location
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn capabilities(&self) -> Capabilities {
        self.role.capabilities()
    }

    /// Last replicated pose, if any update has reached this view.
    pub fn pose(&self) -> Option<Pose> {
        self.pose
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub(crate) fn attach_presenter(&mut self, presenter: Arc<dyn Presenter>) {
        presenter.present(
            self.object_id,
            self.role,
            &PresentationEvent::Spawned {
                object_type: self.object_type,
                location: self.location,
            },
        );
        self.presenter = Some(presenter);
    }

    pub(crate) fn record_teardown(&mut self, action: TeardownAction) {
        if !self.teardown_actions.contains(&action) {
            self.teardown_actions.push(action);
        }
    }

    pub(crate) fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    /// Applies a replicated field update. Views that do not receive updates
    /// ignore it; unknown fields are ignored.
    pub(crate) fn apply_update(&mut self, field: &str, args: &[Value]) -> bool {
        if !self.capabilities().receive_updates || self.torn_down {
            return false;
        }

        match field {
            fields::SET_XYZH => {
                let Some(pose) = pose_from_args(args) else {
                    debug!("Ignoring malformed {} for object {}", field, self.object_id);
                    return false;
                };
                self.pose = Some(pose);
                if let Some(presenter) = &self.presenter {
                    presenter.present(self.object_id, self.role, &PresentationEvent::PoseChanged(pose));
                }
                trace!("View {:?} of {} now at {:?}", self.role, self.object_id, pose);
                true
            }
            _ => false,
        }
    }

    /// Runs the role-specific teardown hook.
    ///
    /// Returns the external actions to execute, in priority order. A second
    /// call returns nothing.
    pub(crate) fn teardown(&mut self) -> Vec<TeardownAction> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;

        if let Some(presenter) = self.presenter.take() {
            presenter.present(self.object_id, self.role, &PresentationEvent::Released);
        }

        let mut actions = std::mem::take(&mut self.teardown_actions);
        actions.sort();
        actions
    }
}

/// Arguments of a `set_xyzh` update.
pub fn pose_args(pose: Pose) -> Vec<Value> {
    vec![pose.x.into(), pose.y.into(), pose.z.into(), pose.h.into()]
}

fn pose_from_args(args: &[Value]) -> Option<Pose> {
    match args {
        [x, y, z, h] => Some(Pose::new(x.as_f64()?, y.as_f64()?, z.as_f64()?, h.as_f64()?)),
        _ => None,
    }
}

/// Proof that the holder acts for the object's authoritative view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityHandle {
    object_id: ObjectId,
}

impl AuthorityHandle {
    pub(crate) fn new(object_id: ObjectId) -> Self {
        Self { object_id }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }
}

/// Proof that `channel` currently owns `object_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerHandle {
    object_id: ObjectId,
    channel: ChannelId,
}

impl OwnerHandle {
    pub(crate) fn new(object_id: ObjectId, channel: ChannelId) -> Self {
        Self { object_id, channel }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{WORLD_ID, AVATAR_ZONE};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingPresenter {
        events: Mutex<Vec<PresentationEvent>>,
    }

    impl Presenter for RecordingPresenter {
        fn present(&self, _object_id: ObjectId, _role: Role, event: &PresentationEvent) {
            self.events.lock().unwrap().push(*event);
        }
    }

    fn observer_view(role: Role) -> View {
        View::new(
            ViewKey::new(ObjectId(5), role, Scope::Channel(ChannelId(1))),
            ObjectType::DistributedAvatar,
            Location::new(WORLD_ID, AVATAR_ZONE),
        )
    }

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Authoritative.capabilities().mutate_state);
        assert!(!Role::OwnerObserver.capabilities().mutate_state);
        assert!(Role::OwnerObserver.capabilities().originate_intents);
        assert!(!Role::PlainObserver.capabilities().originate_intents);
        assert!(Role::UnauthenticatedRelay.capabilities().relay_anonymous);
        assert!(!Role::Authoritative.capabilities().receive_updates);
    }

    #[test]
    fn test_observer_applies_pose_update() {
        let mut view = observer_view(Role::PlainObserver);
        let pose = Pose::new(1.0, 2.0, 0.0, 90.0);
        assert!(view.apply_update(fields::SET_XYZH, &pose_args(pose)));
        assert_eq!(view.pose(), Some(pose));
    }

    #[test]
    fn test_authoritative_ignores_replicated_update() {
        let mut view = View::new(
            ViewKey::new(ObjectId(5), Role::Authoritative, Scope::Process),
            ObjectType::DistributedAvatar,
            Location::new(WORLD_ID, AVATAR_ZONE),
        );
        assert!(!view.apply_update(fields::SET_XYZH, &pose_args(Pose::default())));
        assert_eq!(view.pose(), None);
    }

    #[test]
    fn test_malformed_update_is_ignored() {
        let mut view = observer_view(Role::PlainObserver);
        assert!(!view.apply_update(fields::SET_XYZH, &[Value::from(1.0)]));
        assert_eq!(view.pose(), None);
    }

    #[test]
    fn test_teardown_is_idempotent_and_ordered() {
        let presenter = Arc::new(RecordingPresenter::default());
        let mut view = observer_view(Role::OwnerObserver);
        view.attach_presenter(presenter.clone());
        view.record_teardown(TeardownAction::ReleaseId);
        view.record_teardown(TeardownAction::CancelTask);
        view.record_teardown(TeardownAction::CancelTask);

        let actions = view.teardown();
        assert_eq!(actions, vec![TeardownAction::CancelTask, TeardownAction::ReleaseId]);
        assert!(view.teardown().is_empty());

        let events = presenter.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], PresentationEvent::Released);
    }

    #[test]
    fn test_partially_constructed_view_tears_down() {
        let mut view = observer_view(Role::PlainObserver);
        assert!(view.teardown().is_empty());
        assert!(view.is_torn_down());
    }
}
