//! Visibility graph over sampled waypoints.
//!
//! Nodes live in an arena addressed by [`NodeId`]; adjacency lists are kept
//! symmetric. A graph is built once per level and shared read-only by every
//! agent afterwards.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    geometry::Vec2,
    physics::{CollisionQuery, Layer, LayerFilter},
};

/// Handle of a node inside a [`NodeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// A sampled waypoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Vec2,
    /// `false` when the node overlaps obstacle geometry. Fixed at creation.
    pub usable: bool,
    pub check_radius: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("Node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("Node {0:?} is not usable and cannot have edges")]
    UnusableNode(NodeId),
    #[error("Node {0:?} cannot be connected to itself")]
    SelfLoop(NodeId),
}

/// Arena of nodes plus symmetric adjacency lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeGraph {
    nodes: Vec<Node>,
    adjacency: Vec<Vec<NodeId>>,
}

impl NodeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node and returns its id. Ids are assigned sequentially.
    pub fn add_node(&mut self, position: Vec2, usable: bool, check_radius: f32) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            position,
            usable,
            check_radius,
        });
        self.adjacency.push(Vec::new());
        id
    }

    /// Adds the undirected edge `a <-> b`. Adding an existing edge is a no-op.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<(), GraphError> {
        if a == b {
            return Err(GraphError::SelfLoop(a));
        }
        for id in [a, b] {
            let node = self.node(id).ok_or(GraphError::UnknownNode(id))?;
            if !node.usable {
                return Err(GraphError::UnusableNode(id));
            }
        }
        self.link(a, b);
        Ok(())
    }

    // Callers guarantee both ids exist, are usable and differ.
    fn link(&mut self, a: NodeId, b: NodeId) {
        if !self.adjacency[a.0].contains(&b) {
            self.adjacency[a.0].push(b);
            self.adjacency[b.0].push(a);
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Neighbours of `id`; empty for unknown ids.
    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        self.adjacency.get(id.0).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum::<usize>() / 2
    }

    pub fn usable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.usable).count()
    }
}

/// Axis-aligned rectangle the builder samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleArea {
    pub min: Vec2,
    pub width: f32,
    pub height: f32,
}

/// Samples a regular lattice of candidate nodes and joins mutually visible neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeGraphBuilder {
    pub spacing: f32,
    pub connection_distance: f32,
    pub check_radius: f32,
}

impl NodeGraphBuilder {
    pub fn new(spacing: f32, connection_distance: f32, check_radius: f32) -> Self {
        Self {
            spacing,
            connection_distance,
            check_radius,
        }
    }

    pub fn build<C>(&self, area: SampleArea, collisions: &C) -> NodeGraph
    where
        C: CollisionQuery + ?Sized,
    {
        let mut graph = self.sample(area, collisions);
        self.connect_visible(&mut graph, collisions);
        debug!(
            nodes = graph.len(),
            usable = graph.usable_count(),
            edges = graph.edge_count(),
            "node graph built"
        );
        graph
    }

    /// Lays out candidates spaced `spacing` apart, inset by half a spacing,
    /// keeping only those touching some geometry.
    fn sample<C>(&self, area: SampleArea, collisions: &C) -> NodeGraph
    where
        C: CollisionQuery + ?Sized,
    {
        let mut graph = NodeGraph::new();
        if self.spacing <= 0.0 {
            return graph;
        }

        let columns = (area.width / self.spacing).floor() as usize;
        let rows = (area.height / self.spacing).floor() as usize;
        let inset = self.spacing / 2.0;

        for x in 0..columns {
            for y in 0..rows {
                let position = Vec2::new(
                    area.min.x + inset + x as f32 * self.spacing,
                    area.min.y + inset + y as f32 * self.spacing,
                );
                if !collisions.touches(position, self.check_radius, LayerFilter::All) {
                    continue;
                }
                let usable = !collisions.touches(
                    position,
                    self.check_radius,
                    LayerFilter::Only(Layer::Obstacle),
                );
                graph.add_node(position, usable, self.check_radius);
            }
        }

        graph
    }

    fn connect_visible<C>(&self, graph: &mut NodeGraph, collisions: &C)
    where
        C: CollisionQuery + ?Sized,
    {
        let usable: Vec<(NodeId, Vec2)> = graph
            .nodes()
            .iter()
            .filter(|n| n.usable)
            .map(|n| (n.id, n.position))
            .collect();

        let mut edges = Vec::new();
        for (i, &(a, pos_a)) in usable.iter().enumerate() {
            for &(b, pos_b) in &usable[i + 1..] {
                if pos_a.distance(pos_b) > self.connection_distance {
                    continue;
                }
                if collisions.linecast(pos_a, pos_b, LayerFilter::Only(Layer::Obstacle)) {
                    continue;
                }
                edges.push((a, b));
            }
        }

        for (a, b) in edges {
            graph.link(a, b);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generator::Cell, map::Grid, physics::TileColliders};

    fn corridor_world() -> (TileColliders, SampleArea) {
        // A 3-wide corridor with a wall pillar in the middle of the top row.
        let mut grid: Grid<Cell> = Grid::new(7, 5);
        for y in 1..4 {
            for x in 1..6 {
                grid[(x, y)] = Cell::OpenRoom;
            }
        }
        grid[(3, 3)] = Cell::Wall;
        let tile = 10.0;
        let area = SampleArea {
            min: Vec2::new(-tile / 2.0, -tile / 2.0),
            width: 7.0 * tile,
            height: 5.0 * tile,
        };
        (TileColliders::from_layout(&grid, tile), area)
    }

    #[test]
    fn connect_is_symmetric_and_rejects_bad_edges() {
        let mut graph = NodeGraph::new();
        let a = graph.add_node(Vec2::new(0.0, 0.0), true, 1.0);
        let b = graph.add_node(Vec2::new(1.0, 0.0), true, 1.0);
        let blocked = graph.add_node(Vec2::new(2.0, 0.0), false, 1.0);

        graph.connect(a, b).unwrap();
        graph.connect(b, a).unwrap();
        assert_eq!(graph.neighbors(a), &[b]);
        assert_eq!(graph.neighbors(b), &[a]);
        assert_eq!(graph.edge_count(), 1);

        assert_eq!(graph.connect(a, a), Err(GraphError::SelfLoop(a)));
        assert_eq!(graph.connect(a, blocked), Err(GraphError::UnusableNode(blocked)));
        assert_eq!(
            graph.connect(a, NodeId(42)),
            Err(GraphError::UnknownNode(NodeId(42)))
        );
        assert!(graph.neighbors(NodeId(42)).is_empty());
    }

    #[test]
    fn builder_keeps_touching_nodes_and_flags_walls() {
        let (world, area) = corridor_world();
        let graph = NodeGraphBuilder::new(2.5, 3.6, 1.0).build(area, &world);

        assert!(!graph.is_empty());
        // Nothing is sampled outside carved space.
        for node in graph.nodes() {
            assert!(world.touches(node.position, node.check_radius, LayerFilter::All));
        }
        // Nodes on the pillar are kept but unusable and isolated.
        let pillar: Vec<&Node> = graph
            .nodes()
            .iter()
            .filter(|n| n.position.distance(Vec2::new(30.0, 30.0)) < 3.0)
            .collect();
        assert!(!pillar.is_empty());
        for node in pillar {
            assert!(!node.usable);
            assert!(graph.neighbors(node.id).is_empty());
        }
    }

    #[test]
    fn edges_respect_distance_visibility_and_symmetry() {
        let (world, area) = corridor_world();
        let builder = NodeGraphBuilder::new(2.5, 3.6, 1.0);
        let graph = builder.build(area, &world);
        assert!(graph.edge_count() > 0);

        for node in graph.nodes() {
            for &other in graph.neighbors(node.id) {
                let other_node = graph.node(other).unwrap();
                assert!(node.usable && other_node.usable);
                assert!(node.position.distance(other_node.position) <= builder.connection_distance);
                assert!(!world.linecast(
                    node.position,
                    other_node.position,
                    LayerFilter::Only(Layer::Obstacle)
                ));
                assert!(graph.neighbors(other).contains(&node.id));
            }
        }
    }

    #[test]
    fn builder_edges_are_valid_unique_connections() {
        let (world, area) = corridor_world();
        let graph = NodeGraphBuilder::new(2.5, 3.6, 1.0).build(area, &world);

        let mut revalidated = graph.clone();
        for node in graph.nodes() {
            let neighbors = graph.neighbors(node.id);
            for (i, &other) in neighbors.iter().enumerate() {
                assert!(!neighbors[i + 1..].contains(&other));
                assert_eq!(revalidated.connect(node.id, other), Ok(()));
            }
        }
        assert_eq!(revalidated, graph);
    }

    #[test]
    fn rebuilding_yields_identical_graph() {
        let (world, area) = corridor_world();
        let builder = NodeGraphBuilder::new(2.5, 3.6, 1.0);
        assert_eq!(builder.build(area, &world), builder.build(area, &world));
    }
}
