use std::{cmp::Ordering, collections::BinaryHeap};

use crate::{
    geometry::Vec2,
    graph::{NodeGraph, NodeId},
    physics::{CollisionQuery, Layer, LayerFilter},
};

/// Ordered waypoints from start to target inclusive. Empty means "no path".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path {
    nodes: Vec<NodeId>,
    cost: f32,
}

impl Path {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Sum of the Euclidean edge lengths along the path.
    pub fn cost(&self) -> f32 {
        self.cost
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.nodes.get(index).copied()
    }
}

/// Frontier entry (min-heap via reversed ordering). Equal distances fall back
/// to the lower node id so ties always resolve the same way.
#[derive(Clone, Copy, PartialEq)]
struct Frontier {
    distance: f32,
    node: NodeId,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .distance
            .total_cmp(&self.distance)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Read-only queries over a built [`NodeGraph`].
///
/// The planner holds no state of its own, so any number of agents can share
/// one graph and plan independently within the same tick.
#[derive(Debug, Clone, Copy)]
pub struct PathPlanner<'a> {
    graph: &'a NodeGraph,
}

impl<'a> PathPlanner<'a> {
    pub fn new(graph: &'a NodeGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &'a NodeGraph {
        self.graph
    }

    /// Nearest node to `point` by Euclidean distance, first one wins on ties.
    ///
    /// Returns `None` only for an empty graph.
    pub fn find_closest_node(&self, point: Vec2) -> Option<NodeId> {
        let mut best: Option<(NodeId, f32)> = None;
        for node in self.graph.nodes() {
            let distance = point.distance(node.position);
            if best.is_none_or(|(_, closest)| distance < closest) {
                best = Some((node.id, distance));
            }
        }
        best.map(|(id, _)| id)
    }

    /// Nearest node strictly in front of `point` (positive dot product with
    /// `forward`) and visible from it. Falls back to
    /// [`PathPlanner::find_closest_node`] when nothing qualifies.
    pub fn find_closest_node_in_front<C>(
        &self,
        point: Vec2,
        forward: Vec2,
        collisions: &C,
    ) -> Option<NodeId>
    where
        C: CollisionQuery + ?Sized,
    {
        let forward = forward.normalized();
        let mut best: Option<(NodeId, f32)> = None;

        for node in self.graph.nodes() {
            let to_node = (node.position - point).normalized();
            if forward.dot(to_node) <= 0.0 {
                continue;
            }
            let distance = point.distance(node.position);
            if best.is_some_and(|(_, closest)| distance >= closest) {
                continue;
            }
            if collisions.linecast(point, node.position, LayerFilter::Only(Layer::Obstacle)) {
                continue;
            }
            best = Some((node.id, distance));
        }

        best.map(|(id, _)| id)
            .or_else(|| self.find_closest_node(point))
    }

    /// Dijkstra over usable nodes with Euclidean edge weights, stopping as soon
    /// as `target` is settled.
    pub fn find_shortest_path(&self, start: NodeId, target: NodeId) -> Path {
        let count = self.graph.len();
        let (Some(_), Some(target_node)) = (self.graph.node(start), self.graph.node(target))
        else {
            return Path::empty();
        };
        if start == target {
            return Path {
                nodes: vec![start],
                cost: 0.0,
            };
        }
        if !target_node.usable {
            return Path::empty();
        }

        let mut distance = vec![f32::INFINITY; count];
        let mut previous: Vec<Option<NodeId>> = vec![None; count];
        let mut settled = vec![false; count];
        let mut frontier = BinaryHeap::new();

        distance[start.0] = 0.0;
        frontier.push(Frontier {
            distance: 0.0,
            node: start,
        });

        while let Some(Frontier { node: current, .. }) = frontier.pop() {
            if settled[current.0] {
                continue;
            }
            settled[current.0] = true;
            if current == target {
                break;
            }

            let current_pos = self.graph.nodes()[current.0].position;
            for &neighbor in self.graph.neighbors(current) {
                let neighbor_node = &self.graph.nodes()[neighbor.0];
                if !neighbor_node.usable || settled[neighbor.0] {
                    continue;
                }
                let candidate = distance[current.0] + current_pos.distance(neighbor_node.position);
                if candidate < distance[neighbor.0] {
                    distance[neighbor.0] = candidate;
                    previous[neighbor.0] = Some(current);
                    frontier.push(Frontier {
                        distance: candidate,
                        node: neighbor,
                    });
                }
            }
        }

        let mut nodes = vec![target];
        let mut cursor = target;
        while let Some(prev) = previous[cursor.0] {
            nodes.push(prev);
            cursor = prev;
        }
        nodes.reverse();

        if nodes.first() != Some(&start) {
            return Path::empty();
        }

        Path {
            nodes,
            cost: distance[target.0],
        }
    }
}
