//! # Core Type Definitions
//!
//! Identifiers and small value types shared by every module of the replication
//! core: object and channel identifiers, object locations, watchers, client
//! states, protocol codes and the well-known object tree the process boots.
//!
//! ## Design Principles
//!
//! - **Type Safety**: Wrapper types prevent ID confusion (ObjectId vs ChannelId)
//! - **Serialization**: All types support JSON serialization for the router
//! - **Copy semantics**: Every identifier is a small `Copy` value

use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Process-wide unique identifier of a distributed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a client connection as assigned by the message router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Zone number inside a parent object.
pub type ZoneId = u32;

/// Handle returned by the interest manager for one registered interest.
///
/// Handles are scoped to their watcher: two watchers may hold the same
/// numeric handle for unrelated interests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterestId(pub u32);

impl std::fmt::Display for InterestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "interest:{}", self.0)
    }
}

/// Position of an object in the containment tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// The containing object
    pub parent_id: ObjectId,
    /// The zone inside the containing object
    pub zone_id: ZoneId,
}

impl Location {
    pub fn new(parent_id: ObjectId, zone_id: ZoneId) -> Self {
        Self { parent_id, zone_id }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.parent_id, self.zone_id)
    }
}

/// Something that can hold interests: a client connection or a server-side
/// object acting on behalf of its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Watcher {
    /// A client connection
    Client(ChannelId),
    /// A server-side object (e.g. the AnonymousContact relay)
    Process(ObjectId),
}

impl std::fmt::Display for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Watcher::Client(channel) => write!(f, "{channel}"),
            Watcher::Process(object_id) => write!(f, "process:{object_id}"),
        }
    }
}

// ============================================================================
// Object types
// ============================================================================

/// The distributed classes this core knows how to host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Root,
    AnonymousContact,
    LoginManager,
    DistributedWorld,
    DistributedAvatar,
}

impl ObjectType {
    /// Class name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Root => "Root",
            ObjectType::AnonymousContact => "AnonymousContact",
            ObjectType::LoginManager => "LoginManager",
            ObjectType::DistributedWorld => "DistributedWorld",
            ObjectType::DistributedAvatar => "DistributedAvatar",
        }
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Client state and protocol codes
// ============================================================================

/// Client agent state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientState {
    /// Connected, may only talk to the AnonymousContact relay
    Anonymous,
    /// Logged in and allowed to own objects
    Established,
}

impl ClientState {
    /// Numeric state code used by the router protocol.
    pub fn code(&self) -> u16 {
        match self {
            ClientState::Anonymous => CLIENT_STATE_ANONYMOUS,
            ClientState::Established => CLIENT_STATE_ESTABLISHED,
        }
    }
}

pub const CLIENT_STATE_ANONYMOUS: u16 = 1;
pub const CLIENT_STATE_ESTABLISHED: u16 = 2;

/// Eject code for failed credential checks.
pub const EJECT_BAD_CREDENTIALS: u16 = 122;
/// Eject code for out-of-range client input.
pub const EJECT_RULES_VIOLATION: u16 = 152;
/// The client's session object was deleted by the server
pub const EJECT_SESSION_OBJECT_DELETED: u16 = 153;
/// Eject code when a promoted login could not be given an avatar.
pub const EJECT_AVATAR_UNAVAILABLE: u16 = 154;
/// Eject code when the login path is not wired up yet.
pub const EJECT_SERVER_NOT_READY: u16 = 999;

// ============================================================================
// Well-known topology
// ============================================================================

/// Top-level container of the world and the services.
pub const ROOT_ID: ObjectId = ObjectId(10000);
/// The only object an anonymous client can contact.
pub const ANONYMOUS_CONTACT_ID: ObjectId = ObjectId(10001);
pub const LOGIN_MANAGER_ID: ObjectId = ObjectId(10002);
pub const WORLD_ID: ObjectId = ObjectId(10003);

/// Zone of the root holding the login services.
pub const LOGIN_ZONE: ZoneId = 1;
/// Zone of the root holding the world.
pub const WORLD_ZONE: ZoneId = 2;
/// Zone of the world holding every avatar.
pub const AVATAR_ZONE: ZoneId = 0;

/// Field names used with generic `update` messages.
pub mod fields {
    pub const SET_XYZH: &str = "set_xyzh";
    pub const CREATE_AVATAR: &str = "create_avatar";
}

// ============================================================================
// Pose
// ============================================================================

/// Position and heading of an object in the arena.
///
/// Heading is in degrees, always normalized to `[0, 360)` by the movement
/// authority.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub h: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, h: f64) -> Self {
        Self { x, y, z, h }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_formats() {
        assert_eq!(ObjectId(7).to_string(), "7");
        assert_eq!(ChannelId(3).to_string(), "channel:3");
        assert_eq!(Watcher::Process(ROOT_ID).to_string(), "process:10000");
        assert_eq!(Location::new(WORLD_ID, AVATAR_ZONE).to_string(), "(10003, 0)");
    }

    #[test]
    fn test_client_state_codes() {
        assert_eq!(ClientState::Anonymous.code(), 1);
        assert_eq!(ClientState::Established.code(), 2);
    }

    #[test]
    fn test_watcher_serialization() {
        let watcher = Watcher::Client(ChannelId(42));
        let json = serde_json::to_string(&watcher).unwrap();
        let back: Watcher = serde_json::from_str(&json).unwrap();
        assert_eq!(back, watcher);
    }
}
