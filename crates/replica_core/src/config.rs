//! Simulation, allocator and login configuration.
//!
//! These structures replace ambient module-level constants: every tunable the
//! movement authority, the id allocator and the stand-in authenticator use is
//! passed in explicitly at construction.

use crate::error::ServerError;
use crate::types::{Pose, ROOT_ID, WORLD_ID};
use serde::{Deserialize, Serialize};

fn default_tick_rate_hz() -> u32 {
    20
}
fn default_move_speed() -> f64 {
    3.0
}
fn default_rotation_speed() -> f64 {
    90.0
}
fn default_intent_divisor() -> f64 {
    10.0
}
fn default_arena_bound() -> f64 {
    10.0
}

/// Tunables for the avatar movement authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Fixed simulation rate; `Δt = 1 / tick_rate_hz`
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
    /// Arena units per second at full speed intent
    #[serde(default = "default_move_speed")]
    pub move_speed: f64,
    /// Degrees per second at full heading intent
    #[serde(default = "default_rotation_speed")]
    pub rotation_speed: f64,
    /// Intents are divided by this before integration
    #[serde(default = "default_intent_divisor")]
    pub intent_divisor: f64,
    /// x and y are clamped to `[-arena_bound, arena_bound]`
    #[serde(default = "default_arena_bound")]
    pub arena_bound: f64,
    /// Pose given to freshly spawned avatars
    #[serde(default)]
    pub spawn_pose: Pose,
}

impl SimulationConfig {
    /// Seconds per tick.
    pub fn tick_delta(&self) -> f64 {
        1.0 / self.tick_rate_hz as f64
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        if self.tick_rate_hz == 0 {
            return Err(ServerError::Config("simulation.tick_rate_hz must be greater than 0".to_string()));
        }
        if !(self.move_speed.is_finite() && self.move_speed > 0.0) {
            return Err(ServerError::Config("simulation.move_speed must be positive".to_string()));
        }
        if !(self.rotation_speed.is_finite() && self.rotation_speed > 0.0) {
            return Err(ServerError::Config("simulation.rotation_speed must be positive".to_string()));
        }
        if !(self.intent_divisor.is_finite() && self.intent_divisor > 0.0) {
            return Err(ServerError::Config("simulation.intent_divisor must be positive".to_string()));
        }
        if !(self.arena_bound.is_finite() && self.arena_bound > 0.0) {
            return Err(ServerError::Config("simulation.arena_bound must be positive".to_string()));
        }
        if self.spawn_pose.x.abs() > self.arena_bound || self.spawn_pose.y.abs() > self.arena_bound {
            return Err(ServerError::Config("simulation.spawn_pose must lie inside the arena".to_string()));
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
            move_speed: default_move_speed(),
            rotation_speed: default_rotation_speed(),
            intent_divisor: default_intent_divisor(),
            arena_bound: default_arena_bound(),
            spawn_pose: Pose::default(),
        }
    }
}

/// Range of object ids handed out to dynamically spawned objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub min_id: u64,
    pub max_id: u64,
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.min_id > self.max_id {
            return Err(ServerError::Config("allocator.min_id must not exceed allocator.max_id".to_string()));
        }
        // Id 0 is the root's parent
        if self.min_id == 0 {
            return Err(ServerError::Config("allocator range must not contain id 0".to_string()));
        }
        if self.min_id <= WORLD_ID.0 && self.max_id >= ROOT_ID.0 {
            return Err(ServerError::Config(format!(
                "allocator range {}..={} overlaps the well-known ids {}..={}",
                self.min_id, self.max_id, ROOT_ID, WORLD_ID
            )));
        }
        Ok(())
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_id: 100_000,
            max_id: 999_999,
        }
    }
}

/// One account known to the stand-in authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// Account table for the stand-in authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginConfig {
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            accounts: vec![Account {
                username: "guest".to_string(),
                password: "guest".to_string(),
            }],
        }
    }
}

/// Everything the object server needs at construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
}

impl CoreConfig {
    pub fn validate(&self) -> Result<(), ServerError> {
        self.simulation.validate()?;
        self.allocator.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_defaults() {
        let config = SimulationConfig::default();
        assert_eq!(config.tick_rate_hz, 20);
        assert_eq!(config.move_speed, 3.0);
        assert_eq!(config.rotation_speed, 90.0);
        assert_eq!(config.intent_divisor, 10.0);
        assert_eq!(config.arena_bound, 10.0);
        assert!((config.tick_delta() - 0.05).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_simulation_validation() {
        let mut config = SimulationConfig::default();
        config.tick_rate_hz = 0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.move_speed = -1.0;
        assert!(config.validate().is_err());

        let mut config = SimulationConfig::default();
        config.spawn_pose = Pose::new(11.0, 0.0, 0.0, 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allocator_validation() {
        assert!(AllocatorConfig::default().validate().is_ok());
        let config = AllocatorConfig { min_id: 10, max_id: 5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allocator_range_avoids_well_known_ids() {
        for (min_id, max_id) in [(0, 50), (10_003, 20_000), (9_000, 10_000), (1, 1_000_000), (10_001, 10_002)] {
            let config = AllocatorConfig { min_id, max_id };
            assert!(config.validate().is_err(), "{min_id}..={max_id} should be rejected");
        }
        assert!(AllocatorConfig { min_id: 1, max_id: 9_999 }.validate().is_ok());
        assert!(AllocatorConfig { min_id: 10_004, max_id: 20_000 }.validate().is_ok());
    }

    #[test]
    fn test_core_config_validates_sections() {
        assert!(CoreConfig::default().validate().is_ok());
        let config = CoreConfig {
            allocator: AllocatorConfig { min_id: 2, max_id: 1 },
            ..CoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }

    #[test]
    fn test_default_login_has_guest() {
        let config = LoginConfig::default();
        assert_eq!(config.accounts.len(), 1);
        assert_eq!(config.accounts[0].username, "guest");
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: SimulationConfig = serde_json::from_str(r#"{"tick_rate_hz": 60}"#).unwrap();
        assert_eq!(config.tick_rate_hz, 60);
        assert_eq!(config.arena_bound, 10.0);
    }
}
