use crate::KeyFrameId;
use itertools::Itertools;
use log::*;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SecondaryMap, SlotMap};
use std::collections::BTreeMap;

new_key_type! {
    pub struct VertexKey;
    pub struct EdgeKey;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Vertex {
    out_edges: Vec<EdgeKey>,
    in_edges: Vec<EdgeKey>,
}

/// A directed covisibility edge. The weight is the number of map points seen by both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub source: VertexKey,
    pub target: VertexKey,
    pub weight: u32,
}

/// The vertex and edge storage of the covisibility graph.
///
/// This is a multigraph: inserting an edge never replaces an existing one between the
/// same vertices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyFrameGraph {
    vertices: SlotMap<VertexKey, Vertex>,
    edges: SlotMap<EdgeKey, Edge>,
}

impl KeyFrameGraph {
    fn add_vertex(&mut self) -> VertexKey {
        self.vertices.insert(Vertex::default())
    }

    fn add_edge(&mut self, source: VertexKey, target: VertexKey, weight: u32) -> EdgeKey {
        let edge = self.edges.insert(Edge {
            source,
            target,
            weight,
        });
        self.vertices[source].out_edges.push(edge);
        self.vertices[target].in_edges.push(edge);
        edge
    }

    fn clear_out_edges(&mut self, source: VertexKey) {
        let out_edges = std::mem::take(&mut self.vertices[source].out_edges);
        for key in out_edges {
            if let Some(edge) = self.edges.remove(key) {
                self.vertices[edge.target].in_edges.retain(|&e| e != key);
            }
        }
    }

    fn out_edges(&self, vertex: VertexKey) -> impl Iterator<Item = &Edge> + '_ {
        self.vertices[vertex].out_edges.iter().map(move |&e| &self.edges[e])
    }

    fn in_edges(&self, vertex: VertexKey) -> impl Iterator<Item = &Edge> + '_ {
        self.vertices[vertex].in_edges.iter().map(move |&e| &self.edges[e])
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }
}

/// Weighted graph over keyframes, plus the tables translating between keyframe ids and
/// graph vertices.
#[derive(Debug, Clone, Default)]
pub struct CovisibilityGraph {
    pub(crate) graph: KeyFrameGraph,
    pub(crate) vertex_keyframe: SecondaryMap<VertexKey, KeyFrameId>,
    pub(crate) keyframe_vertex: BTreeMap<KeyFrameId, VertexKey>,
}

impl CovisibilityGraph {
    pub(crate) fn add_keyframe(&mut self, kf: KeyFrameId) -> VertexKey {
        let vertex = self.graph.add_vertex();
        self.vertex_keyframe.insert(vertex, kf);
        self.keyframe_vertex.insert(kf, vertex);
        vertex
    }

    pub fn contains(&self, kf: KeyFrameId) -> bool {
        self.keyframe_vertex.contains_key(&kf)
    }

    pub fn vertex(&self, kf: KeyFrameId) -> Option<VertexKey> {
        self.keyframe_vertex.get(&kf).copied()
    }

    pub fn keyframe(&self, vertex: VertexKey) -> Option<KeyFrameId> {
        self.vertex_keyframe.get(vertex).copied()
    }

    /// Inserts the edge `source -> target`. Returns `None` if either keyframe has no vertex.
    pub(crate) fn add_edge(
        &mut self,
        source: KeyFrameId,
        target: KeyFrameId,
        weight: u32,
    ) -> Option<EdgeKey> {
        let (s, t) = (self.vertex(source)?, self.vertex(target)?);
        trace!("covisibility edge {} -> {} with weight {}", source, target, weight);
        Some(self.graph.add_edge(s, t, weight))
    }

    pub(crate) fn clear_out_edges(&mut self, kf: KeyFrameId) {
        if let Some(vertex) = self.vertex(kf) {
            self.graph.clear_out_edges(vertex);
        }
    }

    /// Targets and weights of the edges leaving `kf`, in insertion order.
    pub fn out_edges(&self, kf: KeyFrameId) -> Option<Vec<(KeyFrameId, u32)>> {
        let vertex = self.vertex(kf)?;
        Some(
            self.graph
                .out_edges(vertex)
                .map(|edge| (self.vertex_keyframe[edge.target], edge.weight))
                .collect(),
        )
    }

    /// Sources of every edge entering `kf`.
    pub fn key_frames_come_into(&self, kf: KeyFrameId) -> Option<Vec<KeyFrameId>> {
        let vertex = self.vertex(kf)?;
        Some(
            self.graph
                .in_edges(vertex)
                .map(|edge| self.vertex_keyframe[edge.source])
                .collect(),
        )
    }

    /// Targets of the edges leaving `kf` by non-increasing weight.
    ///
    /// Edges of equal weight keep their insertion order. A negative `limit` returns every
    /// neighbor.
    pub fn ordered_related_key_frames_from(
        &self,
        kf: KeyFrameId,
        limit: isize,
    ) -> Option<Vec<KeyFrameId>> {
        let neighbors = self
            .out_edges(kf)?
            .into_iter()
            .sorted_by(|a, b| b.1.cmp(&a.1))
            .map(|(target, _)| target);
        Some(match usize::try_from(limit) {
            Ok(limit) => neighbors.take(limit).collect(),
            Err(_) => neighbors.collect(),
        })
    }

    /// The weight of the latest edge `a -> b`.
    pub fn weight(&self, a: KeyFrameId, b: KeyFrameId) -> Option<u32> {
        self.out_edges(a)?
            .into_iter()
            .rev()
            .find(|&(target, _)| target == b)
            .map(|(_, weight)| weight)
    }

    pub fn num_edges(&self) -> usize {
        self.graph.num_edges()
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(n: u64) -> CovisibilityGraph {
        let mut graph = CovisibilityGraph::default();
        for kf in 0..n {
            graph.add_keyframe(KeyFrameId(kf));
        }
        graph
    }

    #[test]
    fn ordered_neighbors() {
        let mut g = graph(5);
        let k = |i| KeyFrameId(i);
        g.add_edge(k(0), k(1), 3);
        g.add_edge(k(0), k(2), 9);
        g.add_edge(k(0), k(3), 3);
        g.add_edge(k(0), k(4), 5);
        assert_eq!(
            g.ordered_related_key_frames_from(k(0), -1).unwrap(),
            vec![k(2), k(4), k(1), k(3)]
        );
        assert_eq!(
            g.ordered_related_key_frames_from(k(0), 2).unwrap(),
            vec![k(2), k(4)]
        );
        assert_eq!(g.ordered_related_key_frames_from(k(0), 10).unwrap().len(), 4);
        assert!(g.ordered_related_key_frames_from(k(0), 0).unwrap().is_empty());
        assert!(g.ordered_related_key_frames_from(k(9), -1).is_none());
    }

    #[test]
    fn parallel_edges_and_clearing() {
        let mut g = graph(3);
        let k = |i| KeyFrameId(i);
        g.add_edge(k(0), k(1), 4);
        g.add_edge(k(0), k(1), 2);
        g.add_edge(k(2), k(1), 7);
        assert_eq!(g.num_edges(), 3);
        assert_eq!(g.weight(k(0), k(1)), Some(2));
        assert_eq!(g.key_frames_come_into(k(1)).unwrap(), vec![k(0), k(0), k(2)]);

        g.clear_out_edges(k(0));
        assert_eq!(g.num_edges(), 1);
        assert_eq!(g.weight(k(0), k(1)), None);
        assert_eq!(g.key_frames_come_into(k(1)).unwrap(), vec![k(2)]);
    }
}
