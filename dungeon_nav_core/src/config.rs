//! Tunable numbers for level generation and agent behaviour.
//!
//! Everything is plain numeric configuration loaded from JSON. Missing fields
//! fall back to [`Default`], so a config file only needs the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Simulated seconds per tick.
    pub tick_seconds: f32,
    pub level: LevelConfig,
    pub agent: AgentConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 1.0 / 30.0,
            level: LevelConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// Level layout and node graph parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Side of the square cell grid.
    pub grid_dimension: usize,
    /// World units per cell.
    pub tile_size: f32,
    /// Requested walk length; generation may shorten it.
    pub target_path_length: usize,
    /// Hard cap on generation attempts.
    pub max_generation_attempts: usize,
    /// Distance between sampled node candidates.
    pub node_spacing: f32,
    /// Radius used for the touch and usability checks.
    pub node_check_radius: f32,
    /// Maximum length of a graph edge.
    pub connection_distance: f32,
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            grid_dimension: 20,
            tile_size: 10.0,
            target_path_length: 30,
            max_generation_attempts: 10_000,
            node_spacing: 2.5,
            node_check_radius: 1.0,
            connection_distance: 3.6,
        }
    }
}

/// Movement, path following, perception and behaviour timers for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Speed while following a path or moving directly to a target.
    pub move_speed: f32,
    pub wander_speed: f32,
    /// Degrees per second.
    pub rotation_speed: f32,
    pub body_radius: f32,

    /// Ticks between throttled replans.
    pub replan_interval_ticks: u32,
    /// A path-following body turns towards its current node on every
    /// `reorient_interval_ticks`-th tick (0 or 1 means every tick).
    pub reorient_interval_ticks: u32,
    /// Distance at which a path node counts as reached.
    pub arrival_epsilon: f32,
    /// Minimum approach towards the current node that counts as progress.
    pub stuck_threshold: f32,
    /// Seconds without progress before a forced replan.
    pub stuck_duration: f32,

    pub wander_time: f32,
    pub idle_time: f32,
    pub search_wait_time: f32,
    pub search_duration: f32,
    /// Pause between sweep turns while searching.
    pub search_pause: f32,
    /// Scripted sweep turns in degrees (counter-clockwise positive).
    pub search_sweep: [f32; 3],

    pub fov_degrees: f32,
    pub view_distance: f32,
    pub attack_fov_degrees: f32,
    pub attack_view_distance: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            move_speed: 12.0,
            wander_speed: 6.0,
            rotation_speed: 180.0,
            body_radius: 1.0,
            replan_interval_ticks: 50,
            reorient_interval_ticks: 2,
            arrival_epsilon: 0.1,
            stuck_threshold: 0.1,
            stuck_duration: 2.0,
            wander_time: 2.0,
            idle_time: 2.0,
            search_wait_time: 2.0,
            search_duration: 3.0,
            search_pause: 0.5,
            search_sweep: [-5.0, 50.0, -45.0],
            fov_degrees: 90.0,
            view_distance: 35.0,
            attack_fov_degrees: 45.0,
            attack_view_distance: 60.0,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects values the generator, builder or agents cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("tick_seconds", self.tick_seconds)?;

        let level = &self.level;
        if level.grid_dimension < crate::generator::MIN_GRID_SIZE {
            return Err(ConfigError::Invalid {
                field: "level.grid_dimension",
                reason: format!(
                    "must be at least {}, got {}",
                    crate::generator::MIN_GRID_SIZE,
                    level.grid_dimension
                ),
            });
        }
        if level.target_path_length < crate::generator::MIN_PATH_LENGTH {
            return Err(ConfigError::Invalid {
                field: "level.target_path_length",
                reason: format!(
                    "must be at least {}, got {}",
                    crate::generator::MIN_PATH_LENGTH,
                    level.target_path_length
                ),
            });
        }
        positive("level.tile_size", level.tile_size)?;
        positive("level.node_spacing", level.node_spacing)?;
        positive("level.node_check_radius", level.node_check_radius)?;
        positive("level.connection_distance", level.connection_distance)?;

        let agent = &self.agent;
        positive("agent.move_speed", agent.move_speed)?;
        positive("agent.wander_speed", agent.wander_speed)?;
        positive("agent.rotation_speed", agent.rotation_speed)?;
        positive("agent.body_radius", agent.body_radius)?;
        positive("agent.arrival_epsilon", agent.arrival_epsilon)?;
        positive("agent.stuck_threshold", agent.stuck_threshold)?;
        positive("agent.stuck_duration", agent.stuck_duration)?;
        positive("agent.search_duration", agent.search_duration)?;
        positive("agent.fov_degrees", agent.fov_degrees)?;
        positive("agent.view_distance", agent.view_distance)?;
        positive("agent.attack_fov_degrees", agent.attack_fov_degrees)?;
        positive("agent.attack_view_distance", agent.attack_view_distance)?;
        if agent.replan_interval_ticks == 0 {
            return Err(ConfigError::Invalid {
                field: "agent.replan_interval_ticks",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: format!("must be a positive number, got {value}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = SimConfig::default();
        let json = config.to_json_pretty().unwrap();
        let restored = SimConfig::from_json_str(&json).unwrap();
        assert_eq!(config, restored);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{
            "level": { "grid_dimension": 30, "node_spacing": 2.0 },
            "agent": { "replan_interval_ticks": 10 }
        }"#;
        let config = SimConfig::from_json_str(json).unwrap();
        assert_eq!(config.level.grid_dimension, 30);
        assert_eq!(config.level.node_spacing, 2.0);
        assert_eq!(config.level.tile_size, LevelConfig::default().tile_size);
        assert_eq!(config.agent.replan_interval_ticks, 10);
        assert_eq!(config.agent.stuck_duration, AgentConfig::default().stuck_duration);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = SimConfig::from_json_str(r#"{ "level": { "tile_size": -1.0 } }"#).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "level.tile_size",
                ..
            }
        ));

        let err = SimConfig::from_json_str(r#"{ "agent": { "replan_interval_ticks": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = SimConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
