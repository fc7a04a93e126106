//! Core object server.
//!
//! `ObjectServer` hosts the distributed objects of one process: it owns the
//! process state behind a single async lock, talks to the outside world only
//! through a [`MessageRouter`], and steps every authoritative simulation once
//! per tick.

use super::state::ProcessState;
use crate::config::CoreConfig;
use crate::error::ServerError;
use crate::gateway::{Authenticator, StaticAuthenticator};
use crate::movement::{AvatarState, MotionPhase};
use crate::router::{MessageRouter, OutboundMessage};
use crate::shutdown::ShutdownState;
use crate::types::{
    ChannelId, ClientState, InterestId, Location, ObjectId, ObjectType, Pose, Watcher, ANONYMOUS_CONTACT_ID,
    LOGIN_MANAGER_ID, LOGIN_ZONE, ROOT_ID, WORLD_ID, WORLD_ZONE,
};
use crate::view::{Presenter, Role, ViewKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, trace};

/// Snapshot of one view, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewInfo {
    pub key: ViewKey,
    pub object_type: ObjectType,
    pub location: Location,
    pub pose: Option<Pose>,
}

/// Process-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    pub objects: usize,
    pub views: usize,
    pub channels: usize,
    pub tick_tasks: usize,
    pub ticks: u64,
    pub ids_in_use: usize,
}

/// Assembles an [`ObjectServer`] from its collaborators.
#[derive(Debug)]
pub struct ObjectServerBuilder {
    config: CoreConfig,
    router: Arc<dyn MessageRouter>,
    authenticator: Option<Arc<dyn Authenticator>>,
    presenter: Option<Arc<dyn Presenter>>,
}

impl ObjectServerBuilder {
    pub fn config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Presentation hook for client-scoped views.
    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn build(self) -> Result<ObjectServer, ServerError> {
        self.config.validate()?;
        let state = ProcessState::new(&self.config, self.presenter);
        Ok(ObjectServer {
            state: Mutex::new(state),
            router: self.router,
            authenticator: self
                .authenticator
                .unwrap_or_else(|| Arc::new(StaticAuthenticator::default())),
            config: self.config,
        })
    }
}

/// The object host of one process.
#[derive(Debug)]
pub struct ObjectServer {
    pub(super) state: Mutex<ProcessState>,
    pub(super) router: Arc<dyn MessageRouter>,
    pub(super) authenticator: Arc<dyn Authenticator>,
    config: CoreConfig,
}

impl ObjectServer {
    pub fn builder(router: Arc<dyn MessageRouter>) -> ObjectServerBuilder {
        ObjectServerBuilder {
            config: CoreConfig::default(),
            router,
            authenticator: None,
            presenter: None,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Creates the fixed topology: Root, the AnonymousContact relay, the
    /// LoginManager and the World, with the relay watching the login zone and
    /// the login manager watching the world zone.
    pub async fn bootstrap(&self) -> Result<(), ServerError> {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;

        state.host_object(router, ROOT_ID, ObjectType::Root, Location::new(ObjectId(0), 0), Role::Authoritative)?;
        state.host_object(
            router,
            ANONYMOUS_CONTACT_ID,
            ObjectType::AnonymousContact,
            Location::new(ROOT_ID, 0),
            Role::UnauthenticatedRelay,
        )?;
        state.add_process_interest(router, ANONYMOUS_CONTACT_ID, Location::new(ROOT_ID, LOGIN_ZONE));

        state.host_object(
            router,
            LOGIN_MANAGER_ID,
            ObjectType::LoginManager,
            Location::new(ROOT_ID, LOGIN_ZONE),
            Role::Authoritative,
        )?;
        state.add_process_interest(router, LOGIN_MANAGER_ID, Location::new(ROOT_ID, WORLD_ZONE));

        state.host_object(
            router,
            WORLD_ID,
            ObjectType::DistributedWorld,
            Location::new(ROOT_ID, WORLD_ZONE),
            Role::Authoritative,
        )?;

        info!(
            "🌐 Topology ready: {} objects, logins {}",
            state.registry.object_count(),
            if state.login_readiness().is_ok() { "open" } else { "closed" }
        );
        Ok(())
    }

    /// Advances every simulation by one fixed step and publishes the
    /// resulting updates.
    ///
    /// The step is `1 / tick_rate_hz` seconds. Idle avatars publish nothing.
    ///
    /// # Returns
    ///
    /// How many `set_xyzh` updates were sent to the router.
    pub async fn tick(&self) -> usize {
        let dt = self.config.simulation.tick_delta();
        let mut guard = self.state.lock().await;
        let ProcessState {
            registry, scheduler, ..
        } = &mut *guard;

        let updates = scheduler.run(dt, |object_id| registry.authority(object_id));
        for update in &updates {
            let applied = registry.apply_update(update.object_id, update.field, &update.args);
            trace!("{} on {} reached {} local views", update.field, update.object_id, applied);
            self.router.send(OutboundMessage::Update {
                object_id: update.object_id,
                field: update.field.to_string(),
                args: update.args.clone(),
            });
        }
        updates.len()
    }

    /// Runs the fixed-rate simulation loop until shutdown is initiated, then
    /// disconnects every remaining channel.
    ///
    /// # Arguments
    ///
    /// * `shutdown` - Shared state; the loop exits once it is initiated and
    ///   marks it complete after cleanup
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use replica_core::{ChannelRouter, ObjectServer, ShutdownState};
    /// # use std::sync::Arc;
    /// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
    /// let (router, _upstream) = ChannelRouter::new();
    /// let server = Arc::new(ObjectServer::builder(Arc::new(router)).build()?);
    /// server.bootstrap().await?;
    ///
    /// let shutdown = ShutdownState::default();
    /// let handle = tokio::spawn({
    ///     let server = server.clone();
    ///     let shutdown = shutdown.clone();
    ///     async move { server.run(shutdown).await }
    /// });
    /// shutdown.initiate();
    /// handle.await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, shutdown: ShutdownState) {
        let rate = self.config.simulation.tick_rate_hz;
        let mut ticker = interval(Duration::from_secs_f64(self.config.simulation.tick_delta()));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("🕒 Simulation loop started at {} Hz", rate);

        let mut tick_count: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.initiated() => {
                    info!("🕒 Simulation loop stopping - shutdown initiated");
                    break;
                }
            }
            if shutdown.is_initiated() {
                break;
            }

            let published = self.tick().await;
            tick_count += 1;

            // One health line every ten seconds of simulated time
            if tick_count % (u64::from(rate) * 10) == 0 {
                let stats = self.stats().await;
                info!(
                    "💓 Tick {}: {} objects, {} channels, {} tick tasks, {} updates this tick",
                    tick_count, stats.objects, stats.channels, stats.tick_tasks, published
                );
            }
        }

        let disconnected = self.disconnect_all().await;
        info!("🔌 Disconnected {} channels during shutdown", disconnected);
        shutdown.complete();
    }

    /// Disconnects every channel, returning how many there were.
    pub async fn disconnect_all(&self) -> usize {
        let router = self.router.as_ref();
        let mut state = self.state.lock().await;
        let channels = state.sessions.channels();
        for channel in &channels {
            state.disconnect_channel(router, *channel);
        }
        channels.len()
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub async fn stats(&self) -> ServerStats {
        let state = self.state.lock().await;
        ServerStats {
            objects: state.registry.object_count(),
            views: state.registry.view_count(),
            channels: state.sessions.channel_count(),
            tick_tasks: state.scheduler.len(),
            ticks: state.scheduler.ticks(),
            ids_in_use: state.allocator.in_use(),
        }
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.registry.object_count()
    }

    /// Every view of an object held in this process, authoritative first.
    pub async fn views_of(&self, object_id: ObjectId) -> Vec<ViewInfo> {
        let state = self.state.lock().await;
        state
            .registry
            .views_of(object_id)
            .map(|view| ViewInfo {
                key: view.key(),
                object_type: view.object_type(),
                location: view.location(),
                pose: view.pose(),
            })
            .collect()
    }

    pub async fn view(&self, key: ViewKey) -> Option<ViewInfo> {
        let state = self.state.lock().await;
        state.registry.get(&key).map(|view| ViewInfo {
            key,
            object_type: view.object_type(),
            location: view.location(),
            pose: view.pose(),
        })
    }

    pub async fn owner_of(&self, object_id: ObjectId) -> Option<ChannelId> {
        self.state.lock().await.sessions.owner_of(object_id)
    }

    pub async fn session_object(&self, channel: ChannelId) -> Option<ObjectId> {
        self.state.lock().await.sessions.session_object(channel)
    }

    pub async fn client_state(&self, channel: ChannelId) -> Option<ClientState> {
        self.state.lock().await.sessions.state(channel)
    }

    pub async fn interests_of(&self, watcher: Watcher) -> Vec<(InterestId, Location)> {
        self.state.lock().await.interests.interests_of(watcher)
    }

    pub async fn avatar_state(&self, object_id: ObjectId) -> Option<AvatarState> {
        let state = self.state.lock().await;
        state.scheduler.get(object_id).map(|avatar| avatar.state())
    }

    pub async fn motion_phase(&self, object_id: ObjectId) -> Option<MotionPhase> {
        let state = self.state.lock().await;
        state.scheduler.get(object_id).map(|avatar| avatar.phase())
    }

    /// True once the login path can serve logins.
    pub async fn is_login_ready(&self) -> bool {
        self.state.lock().await.login_readiness().is_ok()
    }
}
