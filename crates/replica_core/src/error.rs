//! Error types for the replication core.
//!
//! Invariant violations inside the registry and the session controller are
//! programming errors and are returned loudly; client input violations carry
//! the eject code the offending channel is disconnected with.

use crate::types::{
    ChannelId, InterestId, ObjectId, Watcher, EJECT_BAD_CREDENTIALS, EJECT_RULES_VIOLATION,
    EJECT_SERVER_NOT_READY,
};
use crate::view::Role;

/// Object registry invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    /// A view of the same role and scope already exists for this object
    #[error("Object {object_id} already has a {role:?} view in this scope")]
    DuplicateObject { object_id: ObjectId, role: Role },

    /// A second authoritative view was requested for an object
    #[error("Object {object_id} already has an authoritative view")]
    AuthoritativeExists { object_id: ObjectId },

    #[error("Object {0} has no view in this process")]
    UnknownObject(ObjectId),

    #[error("Object {0} is not authoritative in this process")]
    NotAuthoritative(ObjectId),
}

/// Session and ownership invariant violations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// One avatar per connection
    #[error("{channel} is already bound to session object {object_id}")]
    AlreadyBound { channel: ChannelId, object_id: ObjectId },

    #[error("{0} is not connected")]
    UnknownChannel(ChannelId),

    #[error("{0} is already connected")]
    ChannelExists(ChannelId),

    #[error("{0} has not been established")]
    NotEstablished(ChannelId),

    #[error("{0} is already established")]
    AlreadyEstablished(ChannelId),

    #[error("{0} has no session object")]
    NoSessionObject(ChannelId),
}

/// Out-of-range movement input from a client.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("Movement intent out of range (heading: {heading}, speed: {speed})")]
pub struct RulesViolation {
    pub heading: f64,
    pub speed: f64,
}

impl RulesViolation {
    pub fn eject_code(&self) -> u16 {
        EJECT_RULES_VIOLATION
    }

    pub fn eject_message(&self) -> String {
        "Movement intent out of range".to_string()
    }
}

/// Reasons a login is refused. Each cause maps to its own eject code so the
/// client can tell "try again" apart from "server not ready".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthenticationRejected {
    #[error("Bad credentials")]
    BadCredentials,

    #[error("Server isn't ready for authentication.")]
    ServerNotReady,

    /// Rejection with a code chosen by a pluggable authenticator
    #[error("{message}")]
    Custom { code: u16, message: String },
}

impl AuthenticationRejected {
    pub fn eject_code(&self) -> u16 {
        match self {
            AuthenticationRejected::BadCredentials => EJECT_BAD_CREDENTIALS,
            AuthenticationRejected::ServerNotReady => EJECT_SERVER_NOT_READY,
            AuthenticationRejected::Custom { code, .. } => *code,
        }
    }

    pub fn eject_message(&self) -> String {
        self.to_string()
    }
}

/// Interest manager lookups. `InterestNotFound` is a no-op for callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InterestError {
    #[error("{watcher} has no {interest_id}")]
    InterestNotFound { watcher: Watcher, interest_id: InterestId },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocatorError {
    #[error("Object id range exhausted")]
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Object {0} already has a tick task")]
    AlreadyRegistered(ObjectId),
}

/// Umbrella error returned by the process-level server operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    RulesViolation(#[from] RulesViolation),

    #[error(transparent)]
    AuthenticationRejected(#[from] AuthenticationRejected),

    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// Configuration rejected by `validate()`
    #[error("Invalid configuration: {0}")]
    Config(String),
}
