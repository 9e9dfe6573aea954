//! Procedural dungeon generation and graph-based agent navigation.
//!
//! A [`level::Level`] is carved by the [`generator`], covered with a node
//! graph by [`graph::NodeGraphBuilder`] and then shared read-only by every
//! agent. Agents combine a [`behavior::BehaviorMachine`] with a
//! [`navigator::PathFollower`] that plans over the graph with
//! [`planner::PathPlanner`].

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod behavior;
pub mod config;
pub mod generator;
pub mod geometry;
pub mod graph;
pub mod level;
pub mod map;
pub mod navigator;
pub mod perception;
pub mod physics;
pub mod planner;

/// Unique identifier for agents.
pub type EntityId = usize;

/// Represents a 2D grid coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}
