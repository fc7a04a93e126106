//! # Session & Ownership Controller
//!
//! Binds each client channel to at most one session object and tracks the
//! exclusive owner of every owned object.
//!
//! The controller only holds the bookkeeping. Tearing down views and tasks is
//! done by the caller from the plans this module returns, so that revocation
//! always happens before a new grant and disconnect cleanup runs in a fixed
//! order.

use crate::error::SessionError;
use crate::types::{ChannelId, ClientState, ObjectId};
use crate::view::OwnerHandle;
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::{debug, error, info};

/// Proof that a channel was promoted to the established state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Established {
    pub channel: ChannelId,
}

/// What changed when ownership was (re)assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerChange {
    pub object_id: ObjectId,
    /// Previous owner whose owner view must be revoked first
    pub revoked: Option<ChannelId>,
    pub granted: ChannelId,
}

/// Everything a disconnecting channel leaves behind, in cleanup order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPlan {
    pub channel: ChannelId,
    /// Objects whose ownership was revoked
    pub revoked: Vec<ObjectId>,
    /// Session object whose authoritative view must be destroyed
    pub session_object: Option<ObjectId>,
}

#[derive(Debug, Clone)]
struct ChannelRecord {
    state: ClientState,
    session_object: Option<ObjectId>,
    connected_at: SystemTime,
}

/// Per-channel session state and the object ownership table.
#[derive(Debug, Default)]
pub struct SessionController {
    channels: BTreeMap<ChannelId, ChannelRecord>,
    owners: BTreeMap<ObjectId, ChannelId>,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new anonymous channel.
    pub fn connect(&mut self, channel: ChannelId) -> Result<(), SessionError> {
        if self.channels.contains_key(&channel) {
            return Err(SessionError::ChannelExists(channel));
        }
        self.channels.insert(
            channel,
            ChannelRecord {
                state: ClientState::Anonymous,
                session_object: None,
                connected_at: SystemTime::now(),
            },
        );
        info!("🔗 {} connected (anonymous)", channel);
        Ok(())
    }

    /// Promotes an anonymous channel to the established state.
    pub fn promote(&mut self, channel: ChannelId) -> Result<Established, SessionError> {
        let record = self
            .channels
            .get_mut(&channel)
            .ok_or(SessionError::UnknownChannel(channel))?;

        if record.state == ClientState::Established {
            return Err(SessionError::AlreadyEstablished(channel));
        }
        record.state = ClientState::Established;
        info!("🔐 {} established", channel);
        Ok(Established { channel })
    }

    /// Binds the channel's one session object.
    pub fn bind_session_object(&mut self, channel: ChannelId, object_id: ObjectId) -> Result<(), SessionError> {
        let record = self
            .channels
            .get_mut(&channel)
            .ok_or(SessionError::UnknownChannel(channel))?;

        if record.state != ClientState::Established {
            return Err(SessionError::NotEstablished(channel));
        }
        if let Some(existing) = record.session_object {
            error!("❌ {} already bound to session object {}", channel, existing);
            return Err(SessionError::AlreadyBound { channel, object_id: existing });
        }
        record.session_object = Some(object_id);
        debug!("📎 {} bound to session object {}", channel, object_id);
        Ok(())
    }

    /// Makes `channel` the exclusive owner of `object_id`.
    ///
    /// The returned change names the previous owner, whose owner view the
    /// caller must revoke before granting the new one.
    pub fn set_owner(&mut self, object_id: ObjectId, channel: ChannelId) -> Result<OwnerChange, SessionError> {
        let record = self
            .channels
            .get(&channel)
            .ok_or(SessionError::UnknownChannel(channel))?;
        if record.state != ClientState::Established {
            return Err(SessionError::NotEstablished(channel));
        }

        let revoked = self.owners.insert(object_id, channel).filter(|previous| *previous != channel);
        if let Some(previous) = revoked {
            info!("👑 Ownership of {} moved from {} to {}", object_id, previous, channel);
        } else {
            info!("👑 {} now owns {}", channel, object_id);
        }
        Ok(OwnerChange {
            object_id,
            revoked,
            granted: channel,
        })
    }

    /// Drops ownership of an object, returning the former owner.
    pub fn clear_owner(&mut self, object_id: ObjectId) -> Option<ChannelId> {
        self.owners.remove(&object_id)
    }

    /// Removes the channel and returns what must be cleaned up, in order:
    /// revoked ownerships, then the session object. Unknown channels yield
    /// `None`.
    pub fn on_disconnect(&mut self, channel: ChannelId) -> Option<DisconnectPlan> {
        let record = self.channels.remove(&channel)?;

        let revoked: Vec<ObjectId> = self
            .owners
            .iter()
            .filter(|(_, owner)| **owner == channel)
            .map(|(object_id, _)| *object_id)
            .collect();
        for object_id in &revoked {
            self.owners.remove(object_id);
        }

        let connected_for = record.connected_at.elapsed().unwrap_or_default();
        info!(
            "❌ {} disconnected after {:.1}s (owned {} objects)",
            channel,
            connected_for.as_secs_f64(),
            revoked.len()
        );

        Some(DisconnectPlan {
            channel,
            revoked,
            session_object: record.session_object,
        })
    }

    /// Owner capability for the channel's session object.
    pub fn owner_handle(&self, channel: ChannelId) -> Result<OwnerHandle, SessionError> {
        let record = self
            .channels
            .get(&channel)
            .ok_or(SessionError::UnknownChannel(channel))?;
        let object_id = record.session_object.ok_or(SessionError::NoSessionObject(channel))?;

        match self.owners.get(&object_id) {
            Some(owner) if *owner == channel => Ok(OwnerHandle::new(object_id, channel)),
            _ => Err(SessionError::NoSessionObject(channel)),
        }
    }

    pub fn owner_of(&self, object_id: ObjectId) -> Option<ChannelId> {
        self.owners.get(&object_id).copied()
    }

    pub fn session_object(&self, channel: ChannelId) -> Option<ObjectId> {
        self.channels.get(&channel).and_then(|record| record.session_object)
    }

    /// The channel whose session object is `object_id`, if any.
    pub fn bound_channel(&self, object_id: ObjectId) -> Option<ChannelId> {
        self.channels
            .iter()
            .find(|(_, record)| record.session_object == Some(object_id))
            .map(|(channel, _)| *channel)
    }

    pub fn state(&self, channel: ChannelId) -> Option<ClientState> {
        self.channels.get(&channel).map(|record| record.state)
    }

    pub fn is_connected(&self, channel: ChannelId) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn channels(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn established(controller: &mut SessionController, channel: ChannelId) {
        controller.connect(channel).unwrap();
        controller.promote(channel).unwrap();
    }

    #[test]
    fn test_promote_flow() {
        let mut controller = SessionController::new();
        let channel = ChannelId(1);
        assert_eq!(controller.promote(channel), Err(SessionError::UnknownChannel(channel)));

        controller.connect(channel).unwrap();
        assert_eq!(controller.state(channel), Some(ClientState::Anonymous));
        assert_eq!(controller.promote(channel), Ok(Established { channel }));
        assert_eq!(controller.state(channel), Some(ClientState::Established));
        assert_eq!(controller.promote(channel), Err(SessionError::AlreadyEstablished(channel)));
    }

    #[test]
    fn test_duplicate_connect() {
        let mut controller = SessionController::new();
        controller.connect(ChannelId(1)).unwrap();
        assert_eq!(controller.connect(ChannelId(1)), Err(SessionError::ChannelExists(ChannelId(1))));
    }

    #[test]
    fn test_bind_session_object_once() {
        let mut controller = SessionController::new();
        let channel = ChannelId(1);
        controller.connect(channel).unwrap();
        assert_eq!(
            controller.bind_session_object(channel, ObjectId(5)),
            Err(SessionError::NotEstablished(channel))
        );

        controller.promote(channel).unwrap();
        controller.bind_session_object(channel, ObjectId(5)).unwrap();
        assert_eq!(
            controller.bind_session_object(channel, ObjectId(6)),
            Err(SessionError::AlreadyBound { channel, object_id: ObjectId(5) })
        );
        assert_eq!(controller.session_object(channel), Some(ObjectId(5)));
    }

    #[test]
    fn test_set_owner_is_exclusive() {
        let mut controller = SessionController::new();
        established(&mut controller, ChannelId(1));
        established(&mut controller, ChannelId(2));

        let first = controller.set_owner(ObjectId(5), ChannelId(1)).unwrap();
        assert_eq!(first.revoked, None);

        let second = controller.set_owner(ObjectId(5), ChannelId(2)).unwrap();
        assert_eq!(second.revoked, Some(ChannelId(1)));
        assert_eq!(controller.owner_of(ObjectId(5)), Some(ChannelId(2)));

        // Re-granting to the current owner revokes nobody
        let again = controller.set_owner(ObjectId(5), ChannelId(2)).unwrap();
        assert_eq!(again.revoked, None);
    }

    #[test]
    fn test_owner_handle_requires_ownership() {
        let mut controller = SessionController::new();
        let channel = ChannelId(1);
        established(&mut controller, channel);
        assert_eq!(controller.owner_handle(channel), Err(SessionError::NoSessionObject(channel)));

        controller.bind_session_object(channel, ObjectId(5)).unwrap();
        assert!(controller.owner_handle(channel).is_err());

        controller.set_owner(ObjectId(5), channel).unwrap();
        let handle = controller.owner_handle(channel).unwrap();
        assert_eq!(handle.object_id(), ObjectId(5));
        assert_eq!(handle.channel(), channel);
    }

    #[test]
    fn test_disconnect_plan() {
        let mut controller = SessionController::new();
        let channel = ChannelId(1);
        established(&mut controller, channel);
        controller.bind_session_object(channel, ObjectId(5)).unwrap();
        controller.set_owner(ObjectId(5), channel).unwrap();
        assert_eq!(controller.bound_channel(ObjectId(5)), Some(channel));

        let plan = controller.on_disconnect(channel).unwrap();
        assert_eq!(plan.revoked, vec![ObjectId(5)]);
        assert_eq!(plan.session_object, Some(ObjectId(5)));
        assert_eq!(controller.owner_of(ObjectId(5)), None);
        assert!(!controller.is_connected(channel));
        assert!(controller.on_disconnect(channel).is_none());
    }
}
