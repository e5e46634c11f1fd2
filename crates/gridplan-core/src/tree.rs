//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Euclidean spanning tree helpers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;

use petgraph::{algo::min_spanning_tree, data::Element, graph::UnGraph};

use crate::projection::PlanarPoint;

/// Undirected tree edge between two point indices, weighted by distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeEdge {
    pub a: usize,
    pub b: usize,
    pub length: f64,
}

/// Minimum spanning tree over the complete Euclidean graph of `points`.
///
/// Returns `points.len() - 1` edges for a non-empty input.
pub fn euclidean_mst(points: &[PlanarPoint]) -> Vec<TreeEdge> {
    if points.len() < 2 {
        return Vec::new();
    }
    let mut graph = UnGraph::<usize, f64>::with_capacity(
        points.len(),
        points.len() * (points.len() - 1) / 2,
    );
    let indices: Vec<_> = (0..points.len()).map(|i| graph.add_node(i)).collect();
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            graph.add_edge(indices[i], indices[j], points[i].distance(&points[j]));
        }
    }

    min_spanning_tree(&graph)
        .filter_map(|element| match element {
            Element::Edge {
                source,
                target,
                weight,
                ..
            } => Some(TreeEdge {
                a: source,
                b: target,
                length: weight,
            }),
            Element::Node { .. } => None,
        })
        .collect()
}

pub fn tree_length(edges: &[TreeEdge]) -> f64 {
    edges.iter().map(|e| e.length).sum()
}

/// A spanning tree oriented away from a root.
#[derive(Debug, Clone)]
pub struct RootedTree {
    /// Parent index and connecting edge length; `None` for roots.
    pub parent: Vec<Option<(usize, f64)>>,
    pub children: Vec<Vec<usize>>,
    /// Breadth-first order starting at the root(s).
    pub order: Vec<usize>,
}

impl RootedTree {
    /// Orient `edges` away from `root`. Vertices unreachable from the root
    /// become roots of their own components, in index order.
    pub fn orient(vertex_count: usize, edges: &[TreeEdge], root: usize) -> Self {
        let mut adjacency = vec![Vec::new(); vertex_count];
        for edge in edges {
            adjacency[edge.a].push((edge.b, edge.length));
            adjacency[edge.b].push((edge.a, edge.length));
        }

        let mut parent = vec![None; vertex_count];
        let mut children = vec![Vec::new(); vertex_count];
        let mut visited = vec![false; vertex_count];
        let mut order = Vec::with_capacity(vertex_count);

        let starts = std::iter::once(root).chain(0..vertex_count);
        for start in starts {
            if start >= vertex_count || visited[start] {
                continue;
            }
            visited[start] = true;
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                order.push(current);
                for &(next, length) in &adjacency[current] {
                    if !visited[next] {
                        visited[next] = true;
                        parent[next] = Some((current, length));
                        children[current].push(next);
                        queue.push_back(next);
                    }
                }
            }
        }

        Self {
            parent,
            children,
            order,
        }
    }

    /// Vertices ordered so every child precedes its parent.
    pub fn leaves_first(&self) -> impl Iterator<Item = usize> + '_ {
        self.order.iter().rev().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<PlanarPoint> {
        vec![
            PlanarPoint::new(0.0, 0.0),
            PlanarPoint::new(10.0, 0.0),
            PlanarPoint::new(0.0, 10.0),
            PlanarPoint::new(10.0, 10.0),
        ]
    }

    #[test]
    fn mst_of_square_uses_three_sides() {
        let edges = euclidean_mst(&square());
        assert_eq!(edges.len(), 3);
        assert!((tree_length(&edges) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn mst_is_not_heavier_than_alternative_spanning_trees() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0),
            PlanarPoint::new(4.0, 0.0),
            PlanarPoint::new(4.0, 3.0),
            PlanarPoint::new(9.0, 3.0),
            PlanarPoint::new(1.0, 7.0),
        ];
        let mst = tree_length(&euclidean_mst(&points));
        assert!((mst - (4.0 + 3.0 + 5.0 + 5.0)).abs() < 1e-9);

        // star from the first point and a chain in index order
        let star: f64 = points[1..].iter().map(|p| p.distance(&points[0])).sum();
        let chain: f64 = points.windows(2).map(|w| w[0].distance(&w[1])).sum();
        assert!(mst <= star);
        assert!(mst <= chain);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(euclidean_mst(&[]).is_empty());
        assert!(euclidean_mst(&[PlanarPoint::new(1.0, 1.0)]).is_empty());
        let coincident = vec![PlanarPoint::new(2.0, 2.0); 3];
        let edges = euclidean_mst(&coincident);
        assert_eq!(edges.len(), 2);
        assert_eq!(tree_length(&edges), 0.0);
    }

    #[test]
    fn orientation_places_children_before_parents() {
        let edges = euclidean_mst(&square());
        let tree = RootedTree::orient(4, &edges, 0);
        assert!(tree.parent[0].is_none());
        let order: Vec<_> = tree.leaves_first().collect();
        assert_eq!(order.last(), Some(&0));
        for (position, vertex) in order.iter().enumerate() {
            if let Some((parent, _)) = tree.parent[*vertex] {
                let parent_position = order.iter().position(|v| *v == parent).unwrap();
                assert!(parent_position > position);
            }
        }
    }
}
