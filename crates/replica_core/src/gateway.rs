//! # Authentication Gateway
//!
//! Anonymous clients reach the login flow through the AnonymousContact relay.
//! The relay learns about the LoginManager through its interest in the login
//! zone, and the LoginManager learns about the World through its interest in
//! the world zone. Until both are known, logins are refused with the
//! "server not ready" eject.
//!
//! Credential checking sits behind the [`Authenticator`] seam. The stock
//! [`StaticAuthenticator`] accepts the accounts listed in [`LoginConfig`].

use crate::config::LoginConfig;
use crate::error::AuthenticationRejected;
use crate::types::{ObjectId, ObjectType};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Outcome of a credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginDecision {
    Promote,
    Reject(AuthenticationRejected),
}

/// Pluggable credential check. Called without holding the process lock.
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    async fn authenticate(&self, username: &str, password: &str) -> LoginDecision;
}

/// Accepts a fixed table of accounts.
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    accounts: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new(config: &LoginConfig) -> Self {
        let accounts = config
            .accounts
            .iter()
            .map(|account| (account.username.clone(), account.password.clone()))
            .collect();
        Self { accounts }
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }
}

impl Default for StaticAuthenticator {
    fn default() -> Self {
        Self::new(&LoginConfig::default())
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> LoginDecision {
        match self.accounts.get(username) {
            Some(expected) if expected == password => {
                debug!("🔑 Credentials accepted for '{}'", username);
                LoginDecision::Promote
            }
            _ => {
                warn!("🔒 Credentials rejected for '{}'", username);
                LoginDecision::Reject(AuthenticationRejected::BadCredentials)
            }
        }
    }
}

/// What the login path has learned through its process interests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoginGateway {
    login_manager: Option<ObjectId>,
    world: Option<ObjectId>,
}

impl LoginGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an object that entered the view of a server-side watcher.
    /// Returns true if the gateway learned something.
    pub fn object_entered(&mut self, watcher: ObjectId, object_id: ObjectId, object_type: ObjectType) -> bool {
        match object_type {
            ObjectType::LoginManager => {
                info!("📡 Relay {} learned login manager {}", watcher, object_id);
                self.login_manager = Some(object_id);
                true
            }
            ObjectType::DistributedWorld => {
                info!("🌍 Login manager {} learned world {}", watcher, object_id);
                self.world = Some(object_id);
                true
            }
            _ => false,
        }
    }

    /// Forgets an object that left the view of a server-side watcher.
    pub fn object_departed(&mut self, object_id: ObjectId) {
        if self.login_manager == Some(object_id) {
            warn!("📡 Login manager {} went away", object_id);
            self.login_manager = None;
        }
        if self.world == Some(object_id) {
            warn!("🌍 World {} went away", object_id);
            self.world = None;
        }
    }

    /// The world avatars are spawned into, once logins can be served.
    pub fn readiness(&self) -> Result<ObjectId, AuthenticationRejected> {
        match (self.login_manager, self.world) {
            (Some(_), Some(world)) => Ok(world),
            _ => Err(AuthenticationRejected::ServerNotReady),
        }
    }

    pub fn login_manager(&self) -> Option<ObjectId> {
        self.login_manager
    }

    pub fn world(&self) -> Option<ObjectId> {
        self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Account;
    use crate::types::{ANONYMOUS_CONTACT_ID, LOGIN_MANAGER_ID, WORLD_ID};

    #[tokio::test]
    async fn test_static_authenticator_default_guest() {
        let authenticator = StaticAuthenticator::default();
        assert_eq!(authenticator.authenticate("guest", "guest").await, LoginDecision::Promote);
        assert_eq!(
            authenticator.authenticate("guest", "nope").await,
            LoginDecision::Reject(AuthenticationRejected::BadCredentials)
        );
        assert_eq!(
            authenticator.authenticate("nobody", "guest").await,
            LoginDecision::Reject(AuthenticationRejected::BadCredentials)
        );
    }

    #[tokio::test]
    async fn test_static_authenticator_custom_accounts() {
        let config = LoginConfig {
            accounts: vec![Account {
                username: "ada".to_string(),
                password: "engine".to_string(),
            }],
        };
        let authenticator = StaticAuthenticator::new(&config);
        assert_eq!(authenticator.account_count(), 1);
        assert_eq!(authenticator.authenticate("ada", "engine").await, LoginDecision::Promote);
        assert!(matches!(authenticator.authenticate("guest", "guest").await, LoginDecision::Reject(_)));
    }

    #[test]
    fn test_readiness_requires_both_services() {
        let mut gateway = LoginGateway::new();
        assert_eq!(gateway.readiness(), Err(AuthenticationRejected::ServerNotReady));

        assert!(gateway.object_entered(ANONYMOUS_CONTACT_ID, LOGIN_MANAGER_ID, ObjectType::LoginManager));
        assert_eq!(gateway.readiness(), Err(AuthenticationRejected::ServerNotReady));

        assert!(gateway.object_entered(LOGIN_MANAGER_ID, WORLD_ID, ObjectType::DistributedWorld));
        assert_eq!(gateway.readiness(), Ok(WORLD_ID));

        gateway.object_departed(WORLD_ID);
        assert_eq!(gateway.readiness(), Err(AuthenticationRejected::ServerNotReady));
        assert_eq!(gateway.login_manager(), Some(LOGIN_MANAGER_ID));
    }

    #[test]
    fn test_unrelated_objects_are_ignored() {
        let mut gateway = LoginGateway::new();
        assert!(!gateway.object_entered(LOGIN_MANAGER_ID, ObjectId(100_000), ObjectType::DistributedAvatar));
        gateway.object_departed(ObjectId(100_000));
        assert_eq!(gateway, LoginGateway::new());
    }
}
