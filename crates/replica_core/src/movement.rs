//! # Avatar Movement Authority
//!
//! The authoritative per-tick simulation of one avatar. Clients never write
//! avatar state: they submit bounded intents through their owner handle, and
//! the authority integrates heading and position once per tick, clamps the
//! result to the arena, and hands back the canonical pose for replication.
//!
//! ## State machine
//!
//! `Idle` (no intent, or both intents zero) ⇄ `Moving` (any nonzero intent).
//! An idle avatar produces no update at all, so observers are not flooded with
//! identical poses.
//!
//! ## Integration
//!
//! ```text
//! h' = (h + (heading / divisor) · rotation_speed · Δt) mod 360
//! d  = (speed / divisor) · move_speed · Δt, along the local forward axis
//! x, y clamped to [-arena_bound, arena_bound]; z is not simulated
//! ```
//!
//! The forward axis at heading `h` is `(-sin h, cos h)`: heading 0 faces +y and
//! heading 270 faces +x.

use crate::config::SimulationConfig;
use crate::error::RulesViolation;
use crate::scheduler::{FieldUpdate, TickTask};
use crate::types::{fields, ObjectId, Pose};
use crate::view::{pose_args, AuthorityHandle, OwnerHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionPhase {
    Idle,
    Moving,
}

/// Canonical avatar state. Only [`MovementAuthority`] mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AvatarState {
    pub pose: Pose,
    pub heading_intent: f64,
    pub speed_intent: f64,
}

/// Checks that both intent components are finite and inside `[-1, 1]`.
pub fn validate_intent(heading: f64, speed: f64) -> Result<(), RulesViolation> {
    let in_range = |value: f64| (-1.0..=1.0).contains(&value);
    if in_range(heading) && in_range(speed) {
        Ok(())
    } else {
        Err(RulesViolation { heading, speed })
    }
}

/// Wraps a heading into `[0, 360)`.
pub fn normalize_heading(heading: f64) -> f64 {
    let wrapped = heading.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

#[derive(Debug)]
pub struct MovementAuthority {
    object_id: ObjectId,
    state: AvatarState,
    config: Arc<SimulationConfig>,
}

impl MovementAuthority {
    pub fn new(object_id: ObjectId, pose: Pose, config: Arc<SimulationConfig>) -> Self {
        Self {
            object_id,
            state: AvatarState {
                pose,
                ..AvatarState::default()
            },
            config,
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn state(&self) -> AvatarState {
        self.state
    }

    pub fn pose(&self) -> Pose {
        self.state.pose
    }

    pub fn phase(&self) -> MotionPhase {
        if self.state.heading_intent != 0.0 || self.state.speed_intent != 0.0 {
            MotionPhase::Moving
        } else {
            MotionPhase::Idle
        }
    }

    /// Accepts a movement intent from the avatar's owner.
    ///
    /// Out-of-range values are a rules violation: the state is left untouched
    /// and the caller must eject the channel. A handle for a different object
    /// is treated the same way.
    pub fn indicate_intent(
        &mut self,
        owner: &OwnerHandle,
        heading: f64,
        speed: f64,
    ) -> Result<MotionPhase, RulesViolation> {
        if owner.object_id() != self.object_id {
            error!(
                "❌ {} tried to steer {} with a handle for {}",
                owner.channel(),
                self.object_id,
                owner.object_id()
            );
            return Err(RulesViolation { heading, speed });
        }

        if let Err(violation) = validate_intent(heading, speed) {
            warn!("🚨 {} sent out-of-range intent for {}: {}", owner.channel(), self.object_id, violation);
            return Err(violation);
        }

        self.state.heading_intent = heading;
        self.state.speed_intent = speed;
        trace!("Avatar {} intent heading={} speed={}", self.object_id, heading, speed);
        Ok(self.phase())
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// Returns the new canonical pose, or `None` when idle.
    pub fn step(&mut self, authority: &AuthorityHandle, dt: f64) -> Option<Pose> {
        if authority.object_id() != self.object_id {
            error!("❌ Authority for {} used to step {}", authority.object_id(), self.object_id);
            return None;
        }
        if self.phase() == MotionPhase::Idle {
            return None;
        }

        let config = &self.config;
        let heading_rate = self.state.heading_intent / config.intent_divisor;
        let speed_rate = self.state.speed_intent / config.intent_divisor;

        let pose = &mut self.state.pose;
        pose.h = normalize_heading(pose.h + heading_rate * config.rotation_speed * dt);

        let distance = speed_rate * config.move_speed * dt;
        let radians = pose.h.to_radians();
        pose.x += -radians.sin() * distance;
        pose.y += radians.cos() * distance;

        let bound = config.arena_bound;
        pose.x = pose.x.clamp(-bound, bound);
        pose.y = pose.y.clamp(-bound, bound);

        Some(*pose)
    }
}

impl TickTask for MovementAuthority {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn tick(&mut self, authority: &AuthorityHandle, dt: f64) -> Option<FieldUpdate> {
        self.step(authority, dt).map(|pose| FieldUpdate {
            object_id: self.object_id,
            field: fields::SET_XYZH,
            args: pose_args(pose),
        })
    }
}
