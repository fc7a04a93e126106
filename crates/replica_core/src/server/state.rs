//! Process state guarded by the server lock.
//!
//! Every mutation of the registry, interest index, sessions and scheduler
//! happens here, under one lock, so that interest notifications and teardown
//! actions run in the order they were produced.

use crate::allocator::ObjectIdAllocator;
use crate::config::{CoreConfig, SimulationConfig};
use crate::error::{AuthenticationRejected, RegistryError, ServerError};
use crate::gateway::LoginGateway;
use crate::interest::{InterestEvent, InterestManager};
use crate::movement::MovementAuthority;
use crate::registry::ObjectRegistry;
use crate::router::{MessageRouter, OutboundMessage, Recipient};
use crate::scheduler::TickScheduler;
use crate::session::{Established, OwnerChange, SessionController};
use crate::types::{
    fields, ChannelId, InterestId, Location, ObjectId, ObjectType, Watcher, ANONYMOUS_CONTACT_ID,
    AVATAR_ZONE, CLIENT_STATE_ESTABLISHED, EJECT_AVATAR_UNAVAILABLE,
};
use crate::view::{pose_args, Presenter, Role, Scope, TeardownAction, ViewKey};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub(crate) struct ProcessState {
    pub(crate) registry: ObjectRegistry,
    pub(crate) interests: InterestManager,
    pub(crate) sessions: SessionController,
    pub(crate) scheduler: TickScheduler<MovementAuthority>,
    pub(crate) gateway: LoginGateway,
    pub(crate) allocator: ObjectIdAllocator,
    pub(crate) simulation: Arc<SimulationConfig>,
}

impl ProcessState {
    pub(crate) fn new(config: &CoreConfig, presenter: Option<Arc<dyn Presenter>>) -> Self {
        let registry = match presenter {
            Some(presenter) => ObjectRegistry::with_presenter(presenter),
            None => ObjectRegistry::new(),
        };
        Self {
            registry,
            interests: InterestManager::new(),
            sessions: SessionController::new(),
            scheduler: TickScheduler::new(),
            gateway: LoginGateway::new(),
            allocator: ObjectIdAllocator::new(&config.allocator),
            simulation: Arc::new(config.simulation.clone()),
        }
    }

    /// Creates a server-side object held by this process, announces it and
    /// notifies every watcher of its location.
    pub(crate) fn host_object(
        &mut self,
        router: &dyn MessageRouter,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
        role: Role,
    ) -> Result<(), ServerError> {
        let view = self.registry.create(object_id, object_type, location, role, Scope::Process)?;
        view.record_teardown(TeardownAction::UnregisterLocation);

        router.send(OutboundMessage::CreateObject {
            recipient: Recipient::StateServer,
            object_type,
            object_id,
            parent_id: location.parent_id,
            zone_id: location.zone_id,
        });

        let mut events = Vec::new();
        self.interests.notify_object_arrived(object_id, object_type, location, &mut events);
        self.dispatch(router, events);
        Ok(())
    }

    /// Registers an interest on behalf of a server-side object.
    pub(crate) fn add_process_interest(
        &mut self,
        router: &dyn MessageRouter,
        watcher: ObjectId,
        location: Location,
    ) -> InterestId {
        let mut events = Vec::new();
        let interest_id = self.interests.add_interest(Watcher::Process(watcher), location, &mut events);
        self.dispatch(router, events);
        interest_id
    }

    /// Registers an interest for a client. Entered objects are created on the
    /// channel before the router is told the interest is in place.
    pub(crate) fn add_client_interest(
        &mut self,
        router: &dyn MessageRouter,
        channel: ChannelId,
        location: Location,
    ) -> InterestId {
        let mut events = Vec::new();
        let interest_id = self.interests.add_interest(Watcher::Client(channel), location, &mut events);
        self.dispatch(router, events);
        router.send(OutboundMessage::AddInterest {
            channel,
            interest_id,
            parent_id: location.parent_id,
            zone_id: location.zone_id,
        });
        interest_id
    }

    /// Turns interest notifications into views and router messages.
    pub(crate) fn dispatch(&mut self, router: &dyn MessageRouter, events: Vec<InterestEvent>) {
        for event in events {
            match event {
                InterestEvent::Entered {
                    watcher: Watcher::Client(channel),
                    object_id,
                    object_type,
                    location,
                } => {
                    if !self.sessions.is_connected(channel) {
                        continue;
                    }
                    if let Err(e) = self.ensure_view(object_id, object_type, location, Role::PlainObserver, Scope::Channel(channel)) {
                        warn!("⚠️ Could not project {} for {}: {}", object_id, channel, e);
                        continue;
                    }
                    router.send(OutboundMessage::CreateObject {
                        recipient: Recipient::Channel(channel),
                        object_type,
                        object_id,
                        parent_id: location.parent_id,
                        zone_id: location.zone_id,
                    });
                }
                InterestEvent::Departed {
                    watcher: Watcher::Client(channel),
                    object_id,
                    ..
                } => {
                    self.registry
                        .destroy_view(ViewKey::new(object_id, Role::PlainObserver, Scope::Channel(channel)));
                    if self.sessions.is_connected(channel) {
                        router.send(OutboundMessage::DeleteObject {
                            recipient: Recipient::Channel(channel),
                            object_id,
                        });
                    }
                }
                InterestEvent::Entered {
                    watcher: Watcher::Process(watcher),
                    object_id,
                    object_type,
                    location,
                } => {
                    self.gateway.object_entered(watcher, object_id, object_type);
                    if let Err(e) =
                        self.ensure_view(object_id, object_type, location, Role::AuthoritativeObserver, Scope::Process)
                    {
                        warn!("⚠️ Could not observe {} for process:{}: {}", object_id, watcher, e);
                    }
                }
                InterestEvent::Departed {
                    watcher: Watcher::Process(_),
                    object_id,
                    location,
                    ..
                } => {
                    let still_watched = self
                        .interests
                        .watchers_of(location)
                        .into_iter()
                        .any(|w| matches!(w, Watcher::Process(_)) && self.interests.is_visible(w, object_id));
                    if !still_watched {
                        self.gateway.object_departed(object_id);
                        self.registry
                            .destroy_view(ViewKey::new(object_id, Role::AuthoritativeObserver, Scope::Process));
                    }
                }
            }
        }
    }

    /// Creates a view unless one already exists for that role and scope. A
    /// fresh observer of a simulated object starts at its canonical pose.
    fn ensure_view(
        &mut self,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
        role: Role,
        scope: Scope,
    ) -> Result<(), RegistryError> {
        let key = ViewKey::new(object_id, role, scope);
        if self.registry.contains(&key) {
            return Ok(());
        }
        let pose = self.scheduler.get(object_id).map(|avatar| avatar.pose());
        let view = self.registry.create(object_id, object_type, location, role, scope)?;
        if let Some(pose) = pose {
            view.apply_update(fields::SET_XYZH, &pose_args(pose));
        }
        Ok(())
    }

    /// Destroys every view of an object and runs the recorded teardown in
    /// order: cancel the tick task, send departures and the delete, then
    /// release the id. Returns false if the object was already gone.
    pub(crate) fn destroy_object(&mut self, router: &dyn MessageRouter, object_id: ObjectId) -> bool {
        let torn_down = self.registry.destroy(object_id);
        if torn_down.is_empty() {
            return false;
        }

        let authoritative = torn_down.iter().any(|t| t.key.role.is_authoritative());
        let mut events = Vec::new();
        let mut release = false;
        for action in torn_down.iter().flat_map(|t| t.actions.iter()) {
            match action {
                TeardownAction::CancelTask => {
                    self.scheduler.deregister(object_id);
                }
                TeardownAction::UnregisterLocation => {
                    self.interests.notify_object_departed(object_id, &mut events);
                }
                TeardownAction::ReleaseId => release = true,
            }
        }

        if let Some(owner) = self.sessions.clear_owner(object_id) {
            debug!("👑 {} lost ownership of deleted {}", owner, object_id);
        }

        self.dispatch(router, events);
        if authoritative {
            router.send(OutboundMessage::DeleteObject {
                recipient: Recipient::StateServer,
                object_id,
            });
        }
        if release {
            self.allocator.release(object_id);
        }
        true
    }

    /// Moves an object held here with authority, then tells watchers that
    /// gained or lost it.
    pub(crate) fn move_object(
        &mut self,
        router: &dyn MessageRouter,
        object_id: ObjectId,
        location: Location,
    ) -> Result<(), ServerError> {
        if self.registry.authority(object_id).is_none() {
            return Err(RegistryError::NotAuthoritative(object_id).into());
        }

        self.registry.relocate(object_id, location);
        let mut events = Vec::new();
        self.interests.notify_object_moved(object_id, location, &mut events);
        debug!("🚚 {} moved to {} ({} interest events)", object_id, location, events.len());
        self.dispatch(router, events);
        Ok(())
    }

    /// Checks that the relay, the login manager and a local world are all in
    /// place. Returns the world to spawn avatars into.
    pub(crate) fn login_readiness(&self) -> Result<ObjectId, AuthenticationRejected> {
        let relay_ready = self
            .registry
            .get(&ViewKey::new(ANONYMOUS_CONTACT_ID, Role::UnauthenticatedRelay, Scope::Process))
            .map(|view| view.capabilities().relay_anonymous)
            .unwrap_or(false);
        if !relay_ready {
            return Err(AuthenticationRejected::ServerNotReady);
        }

        let world = self.gateway.readiness()?;
        if self.registry.authority(world).is_none() {
            return Err(AuthenticationRejected::ServerNotReady);
        }
        Ok(world)
    }

    /// Promotes the channel and gives it an avatar: spawn, bind as session
    /// object, grant ownership, then register interest in the avatar zone.
    ///
    /// Any failure after promotion ejects the channel, so it never stays
    /// established without a session object.
    pub(crate) fn establish(
        &mut self,
        router: &dyn MessageRouter,
        channel: ChannelId,
        world: ObjectId,
    ) -> Result<ObjectId, ServerError> {
        let established = self.sessions.promote(channel)?;
        router.send(OutboundMessage::SetState {
            channel,
            state_code: CLIENT_STATE_ESTABLISHED,
        });
        router.send(OutboundMessage::Update {
            object_id: world,
            field: fields::CREATE_AVATAR.to_string(),
            args: vec![channel.0.into()],
        });

        let avatar = match self.spawn_avatar(router, world) {
            Ok(avatar) => avatar,
            Err(e) => {
                error!("❌ World {} could not spawn an avatar for {}: {}", world, channel, e);
                self.eject(router, channel, EJECT_AVATAR_UNAVAILABLE, format!("No avatar available: {e}"));
                return Err(e);
            }
        };
        if let Err(e) = self.attach_avatar(router, established, avatar) {
            error!("❌ Failed to hand avatar {} to {}: {}", avatar, channel, e);
            self.destroy_object(router, avatar);
            self.eject(router, channel, EJECT_AVATAR_UNAVAILABLE, format!("No avatar available: {e}"));
            return Err(e);
        }

        info!("🎮 {} logged in with avatar {}", channel, avatar);
        Ok(avatar)
    }

    /// The world's `create_avatar` handler: allocates an id, creates the
    /// authoritative avatar and starts its movement task.
    fn spawn_avatar(&mut self, router: &dyn MessageRouter, world: ObjectId) -> Result<ObjectId, ServerError> {
        let object_id = self.allocator.allocate()?;
        let location = Location::new(world, AVATAR_ZONE);

        let view = match self.registry.create(
            object_id,
            ObjectType::DistributedAvatar,
            location,
            Role::Authoritative,
            Scope::Process,
        ) {
            Ok(view) => view,
            Err(e) => {
                self.allocator.release(object_id);
                return Err(e.into());
            }
        };
        view.record_teardown(TeardownAction::CancelTask);
        view.record_teardown(TeardownAction::UnregisterLocation);
        view.record_teardown(TeardownAction::ReleaseId);

        let authority = MovementAuthority::new(object_id, self.simulation.spawn_pose, self.simulation.clone());
        if let Err(e) = self.scheduler.register(authority) {
            self.registry
                .destroy_view(ViewKey::new(object_id, Role::Authoritative, Scope::Process));
            self.allocator.release(object_id);
            return Err(e.into());
        }

        router.send(OutboundMessage::CreateObject {
            recipient: Recipient::StateServer,
            object_type: ObjectType::DistributedAvatar,
            object_id,
            parent_id: location.parent_id,
            zone_id: location.zone_id,
        });

        let mut events = Vec::new();
        self.interests
            .notify_object_arrived(object_id, ObjectType::DistributedAvatar, location, &mut events);
        self.dispatch(router, events);

        debug!("🧍 World {} spawned avatar {}", world, object_id);
        Ok(object_id)
    }

    fn attach_avatar(
        &mut self,
        router: &dyn MessageRouter,
        established: Established,
        avatar: ObjectId,
    ) -> Result<(), ServerError> {
        let channel = established.channel;
        self.sessions.bind_session_object(channel, avatar)?;
        router.send(OutboundMessage::AddSessionObject {
            object_id: avatar,
            channel,
        });

        self.grant_owner(router, avatar, channel)?;

        let location = self
            .interests
            .location_of(avatar)
            .ok_or(RegistryError::UnknownObject(avatar))?;
        self.add_client_interest(router, channel, location);
        Ok(())
    }

    /// Assigns exclusive ownership. The previous owner's view is revoked
    /// before the new owner's view exists.
    pub(crate) fn grant_owner(
        &mut self,
        router: &dyn MessageRouter,
        object_id: ObjectId,
        channel: ChannelId,
    ) -> Result<OwnerChange, ServerError> {
        let (object_type, location) = self
            .registry
            .lookup(object_id)
            .map(|view| (view.object_type(), view.location()))
            .ok_or(RegistryError::UnknownObject(object_id))?;

        let change = self.sessions.set_owner(object_id, channel)?;
        if let Some(previous) = change.revoked {
            self.registry
                .destroy_view(ViewKey::new(object_id, Role::OwnerObserver, Scope::Channel(previous)));
        }

        if let Err(e) = self.ensure_view(object_id, object_type, location, Role::OwnerObserver, Scope::Channel(channel)) {
            self.sessions.clear_owner(object_id);
            return Err(e.into());
        }

        router.send(OutboundMessage::SetOwner { object_id, channel });
        Ok(change)
    }

    pub(crate) fn eject(&mut self, router: &dyn MessageRouter, channel: ChannelId, code: u16, message: String) {
        warn!("⏏️ Ejecting {} with code {}: {}", channel, code, message);
        router.send(OutboundMessage::Eject { channel, code, message });
        self.disconnect_channel(router, channel);
    }

    /// Disconnect cleanup: revoke ownerships, destroy the session object,
    /// drop the channel's interests and finally every view held for it.
    pub(crate) fn disconnect_channel(&mut self, router: &dyn MessageRouter, channel: ChannelId) -> bool {
        let Some(plan) = self.sessions.on_disconnect(channel) else {
            return false;
        };

        for object_id in &plan.revoked {
            self.registry
                .destroy_view(ViewKey::new(*object_id, Role::OwnerObserver, Scope::Channel(channel)));
        }

        if let Some(session_object) = plan.session_object {
            self.destroy_object(router, session_object);
        }

        let mut events = Vec::new();
        self.interests.remove_watcher(Watcher::Client(channel), &mut events);
        self.dispatch(router, events);

        for key in self.registry.keys_in_scope(Scope::Channel(channel)) {
            self.registry.destroy_view(key);
        }
        true
    }
}
