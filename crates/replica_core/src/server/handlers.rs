//! Inbound operations.
//!
//! Client-originated requests (connect, login, movement intents, disconnect)
//! and router-originated notifications (remote objects entering or leaving a
//! watcher's view) all enter the process here.

use super::core::ObjectServer;
use crate::error::{ServerError, SessionError};
use crate::gateway::LoginDecision;
use crate::interest::InterestEvent;
use crate::movement::MotionPhase;
use crate::session::OwnerChange;
use crate::types::{
    ChannelId, ClientState, InterestId, Location, ObjectId, ObjectType, Watcher, ANONYMOUS_CONTACT_ID,
    EJECT_SESSION_OBJECT_DELETED, LOGIN_ZONE, ROOT_ID,
};
use crate::view::{Role, Scope};
use tracing::{debug, info, warn};

impl ObjectServer {
    /// Accepts a new anonymous client.
    ///
    /// The channel gets a plain observer view of the relay and an interest
    /// in the login zone, so the login manager is created on it before this
    /// returns.
    ///
    /// # Arguments
    ///
    /// * `channel` - Router-assigned channel of the new connection
    ///
    /// # Returns
    ///
    /// The handle of the login-zone interest, or
    /// `SessionError::ChannelExists` if the channel is already connected.
    pub async fn connect(&self, channel: ChannelId) -> Result<InterestId, ServerError> {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        state.sessions.connect(channel)?;

        if let Some(relay) = state.registry.lookup(ANONYMOUS_CONTACT_ID).map(|view| view.location()) {
            state.registry.create(
                ANONYMOUS_CONTACT_ID,
                ObjectType::AnonymousContact,
                relay,
                Role::PlainObserver,
                Scope::Channel(channel),
            )?;
        } else {
            debug!("No relay hosted yet, {} connects without one", channel);
        }

        Ok(state.add_client_interest(router, channel, Location::new(ROOT_ID, LOGIN_ZONE)))
    }

    /// Runs the login flow for an anonymous channel.
    ///
    /// The authenticator is awaited without holding the process lock. Any
    /// rejection ejects the channel and nothing is created for it. On
    /// promotion the channel is established, the world spawns an avatar, and
    /// the channel becomes its owner with an interest in the avatar zone.
    ///
    /// # Arguments
    ///
    /// * `channel` - An anonymous, connected channel
    /// * `username` / `password` - Credentials handed to the authenticator
    ///
    /// # Returns
    ///
    /// The new avatar's id. Errors:
    ///
    /// * `AuthenticationRejected` - bad credentials (eject 122) or the login
    ///   path is not ready (eject 999)
    /// * `AllocatorError` / `RegistryError` - no avatar could be created
    ///   (eject 154)
    /// * `SessionError` - unknown or already established channel (no eject)
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use replica_core::{ChannelId, ChannelRouter, ObjectServer};
    /// # use std::sync::Arc;
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let (router, _upstream) = ChannelRouter::new();
    /// let server = ObjectServer::builder(Arc::new(router)).build()?;
    /// server.bootstrap().await?;
    ///
    /// server.connect(ChannelId(7)).await?;
    /// let avatar = server.login(ChannelId(7), "guest", "guest").await?;
    /// assert_eq!(server.owner_of(avatar).await, Some(ChannelId(7)));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn login(&self, channel: ChannelId, username: &str, password: &str) -> Result<ObjectId, ServerError> {
        let router = self.router.as_ref();
        {
            let mut state = self.state.lock().await;
            match state.sessions.state(channel) {
                None => return Err(SessionError::UnknownChannel(channel).into()),
                Some(ClientState::Established) => {
                    warn!("⚠️ {} sent a second login", channel);
                    return Err(SessionError::AlreadyEstablished(channel).into());
                }
                Some(ClientState::Anonymous) => {}
            }
            if let Err(rejection) = state.login_readiness() {
                state.eject(router, channel, rejection.eject_code(), rejection.eject_message());
                return Err(rejection.into());
            }
        }

        info!("🔑 Login attempt from {} as '{}'", channel, username);
        let decision = self.authenticator.authenticate(username, password).await;

        let mut state = self.state.lock().await;
        if !state.sessions.is_connected(channel) {
            debug!("{} left while its login was checked", channel);
            return Err(SessionError::UnknownChannel(channel).into());
        }

        match decision {
            LoginDecision::Reject(rejection) => {
                state.eject(router, channel, rejection.eject_code(), rejection.eject_message());
                Err(rejection.into())
            }
            LoginDecision::Promote => {
                let world = match state.login_readiness() {
                    Ok(world) => world,
                    Err(rejection) => {
                        state.eject(router, channel, rejection.eject_code(), rejection.eject_message());
                        return Err(rejection.into());
                    }
                };
                state.establish(router, channel, world)
            }
        }
    }

    /// Forwards a movement intent from the channel's owned avatar.
    ///
    /// Channels without an owned session object get an error and nothing
    /// else. Out-of-range values eject the channel.
    ///
    /// # Arguments
    ///
    /// * `heading` - Turn intent in `[-1, 1]`
    /// * `speed` - Forward intent in `[-1, 1]`
    ///
    /// # Returns
    ///
    /// The avatar's motion phase after the intent, or `RulesViolation`
    /// (eject 152) when either value is out of range or not finite.
    pub async fn indicate_intent(&self, channel: ChannelId, heading: f64, speed: f64) -> Result<MotionPhase, ServerError> {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;

        let owner = match state.sessions.owner_handle(channel) {
            Ok(owner) => owner,
            Err(e) => {
                warn!("⚠️ Dropping intent from {}: {}", channel, e);
                return Err(e.into());
            }
        };

        let result = match state.scheduler.get_mut(owner.object_id()) {
            Some(avatar) => avatar.indicate_intent(&owner, heading, speed),
            None => return Err(SessionError::NoSessionObject(channel).into()),
        };

        match result {
            Ok(phase) => Ok(phase),
            Err(violation) => {
                state.eject(router, channel, violation.eject_code(), violation.eject_message());
                Err(violation.into())
            }
        }
    }

    /// Runs disconnect cleanup. Returns false for unknown channels.
    pub async fn disconnect(&self, channel: ChannelId) -> bool {
        let router = self.router.as_ref();
        self.state.lock().await.disconnect_channel(router, channel)
    }

    /// Gives `channel` exclusive ownership of an object held here.
    pub async fn set_owner(&self, object_id: ObjectId, channel: ChannelId) -> Result<OwnerChange, ServerError> {
        let router = self.router.as_ref();
        self.state.lock().await.grant_owner(router, object_id, channel)
    }

    /// Registers an extra interest for a client.
    pub async fn add_interest(&self, channel: ChannelId, location: Location) -> Result<InterestId, ServerError> {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        if !state.sessions.is_connected(channel) {
            return Err(SessionError::UnknownChannel(channel).into());
        }
        Ok(state.add_client_interest(router, channel, location))
    }

    /// Drops one client interest. Unknown handles are a no-op.
    pub async fn remove_interest(&self, channel: ChannelId, interest_id: InterestId) -> Option<Location> {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        let mut events = Vec::new();
        let location = state
            .interests
            .remove_interest(Watcher::Client(channel), interest_id, &mut events)
            .ok()?;
        state.dispatch(router, events);
        Some(location)
    }

    /// Destroys every view of an object held in this process. Deleting a
    /// client's session object ejects that client. Returns false if the
    /// object was already gone.
    pub async fn destroy_object(&self, object_id: ObjectId) -> bool {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;

        if state.registry.lookup(object_id).is_none() {
            return false;
        }
        if let Some(channel) = state.sessions.bound_channel(object_id) {
            state.eject(
                router,
                channel,
                EJECT_SESSION_OBJECT_DELETED,
                format!("Session object {object_id} was deleted"),
            );
            return true;
        }
        state.destroy_object(router, object_id)
    }

    /// Moves an object this process is authoritative for to a new location.
    ///
    /// Watchers whose interests stop matching get a departure, watchers whose
    /// interests start matching get the object created on them.
    ///
    /// # Returns
    ///
    /// `RegistryError::NotAuthoritative` if the object is not held here with
    /// authority. Moving to the current location is a no-op.
    pub async fn move_object(&self, object_id: ObjectId, location: Location) -> Result<(), ServerError> {
        let router = self.router.as_ref();
        self.state.lock().await.move_object(router, object_id, location)
    }

    /// Router notification: a remote object entered the view of a watcher
    /// hosted here.
    pub async fn interest_entered(
        &self,
        watcher: Watcher,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
    ) {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        debug!("📥 {} entered view of {} at {}", object_id, watcher, location);
        state.dispatch(
            router,
            vec![InterestEvent::Entered {
                watcher,
                object_id,
                object_type,
                location,
            }],
        );
    }

    /// Router notification: a remote object left the view of a watcher
    /// hosted here.
    pub async fn interest_departed(
        &self,
        watcher: Watcher,
        object_id: ObjectId,
        object_type: ObjectType,
        location: Location,
    ) {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        debug!("📤 {} left view of {}", object_id, watcher);
        state.dispatch(
            router,
            vec![InterestEvent::Departed {
                watcher,
                object_id,
                object_type,
                location,
            }],
        );
    }
}
