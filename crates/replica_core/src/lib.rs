//! # Replica Core
//!
//! Server-authoritative distributed object replication for a small
//! multiplayer arena.
//!
//! Every distributed object is hosted by exactly one authoritative process
//! and projected, per role, into observer views in other processes and
//! clients. Clients steer their avatar only by submitting bounded movement
//! intents; the authoritative movement simulation produces the canonical
//! state and replicates it to everyone interested.
//!
//! ## Components
//!
//! - [`registry`]: role-tagged views keyed by object, role and scope
//! - [`interest`]: per-watcher interests in (parent, zone) locations
//! - [`session`]: client lifecycle, session objects and exclusive ownership
//! - [`movement`]: the per-avatar movement authority
//! - [`scheduler`]: per-tick task scheduling tied to object lifetime
//! - [`gateway`]: login readiness and the pluggable authenticator
//! - [`server`]: the process-level [`ObjectServer`] tying it together
//!
//! All cross-process effects leave through a [`MessageRouter`]; the core
//! never touches the network.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use replica_core::{ChannelId, ChannelRouter, ObjectServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (router, _upstream) = ChannelRouter::new();
//!     let server = ObjectServer::builder(Arc::new(router)).build()?;
//!     server.bootstrap().await?;
//!
//!     let channel = ChannelId(1);
//!     server.connect(channel).await?;
//!     let avatar = server.login(channel, "guest", "guest").await?;
//!     server.indicate_intent(channel, 0.0, 1.0).await?;
//!     server.tick().await;
//!     println!("avatar {avatar} is at {:?}", server.avatar_state(avatar).await);
//!     Ok(())
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod gateway;
pub mod interest;
pub mod movement;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod types;
pub mod view;

pub use allocator::ObjectIdAllocator;
pub use config::{Account, AllocatorConfig, CoreConfig, LoginConfig, SimulationConfig};
pub use error::{
    AllocatorError, AuthenticationRejected, InterestError, RegistryError, RulesViolation, SchedulerError,
    ServerError, SessionError,
};
pub use gateway::{Authenticator, LoginDecision, LoginGateway, StaticAuthenticator};
pub use interest::{InterestEvent, InterestManager, InterestSink};
pub use movement::{AvatarState, MotionPhase, MovementAuthority};
pub use registry::{ObjectRegistry, TornDown};
pub use router::{ChannelRouter, MessageRouter, OutboundMessage, Recipient};
pub use scheduler::{FieldUpdate, TickScheduler, TickTask};
pub use server::{ObjectServer, ObjectServerBuilder, ServerStats, ViewInfo};
pub use session::{DisconnectPlan, Established, OwnerChange, SessionController};
pub use shutdown::ShutdownState;
pub use types::*;
pub use view::{
    AuthorityHandle, Capabilities, OwnerHandle, PresentationEvent, Presenter, Role, Scope, TeardownAction, View,
    ViewKey,
};
