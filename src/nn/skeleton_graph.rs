use crate::dataset::skeleton::NUM_KEYPOINTS;

/// Parent-child pairs of a simplified body rooted at the hip (keypoint 1):
/// head, left arm, right arm, left leg, right leg.
pub const BODY_CONNECTIONS: [(usize, usize); 16] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 4),
    (1, 5),
    (5, 6),
    (6, 7),
    (1, 8),
    (8, 9),
    (9, 10),
    (1, 11),
    (11, 12),
    (12, 13),
    (1, 14),
    (14, 15),
    (15, 16),
];

/// Undirected graph over keypoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkeletonGraph {
    num_nodes: usize,
    edges: Vec<(usize, usize)>,
}

impl SkeletonGraph {
    /// Pairs with an endpoint outside `0..num_nodes` are dropped.
    pub fn new(num_nodes: usize, pairs: &[(usize, usize)]) -> Self {
        let edges = pairs.iter().copied().filter(|&(a, b)| a < num_nodes && b < num_nodes).collect();
        Self { num_nodes, edges }
    }

    pub fn body(num_nodes: usize) -> Self {
        Self::new(num_nodes, &BODY_CONNECTIONS)
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Dense row-major `[num_nodes, num_nodes]` matrix with 1 for each edge in
    /// both directions.
    pub fn adjacency(&self) -> Vec<f32> {
        let n = self.num_nodes;
        let mut adj = vec![0.0; n * n];

        for &(a, b) in &self.edges {
            adj[a * n + b] = 1.0;
            adj[b * n + a] = 1.0;
        }

        adj
    }
}

impl Default for SkeletonGraph {
    fn default() -> Self {
        Self::body(NUM_KEYPOINTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_adjacency() {
        let graph = SkeletonGraph::default();
        let adj = graph.adjacency();
        let n = graph.num_nodes();

        assert_eq!(n, 33);
        assert_eq!(adj.iter().filter(|&&x| x != 0.0).count(), 32);

        for i in 0..n {
            assert_eq!(adj[i * n + i], 0.0);

            for j in 0..n {
                assert_eq!(adj[i * n + j], adj[j * n + i]);
            }
        }

        assert_eq!(adj[n + 14], 1.0);
        assert_eq!(adj[20 * n + 21], 0.0);
    }

    #[test]
    fn out_of_range_pairs_are_skipped() {
        let graph = SkeletonGraph::body(10);
        assert_eq!(graph.edges().len(), 9);
        assert_eq!(graph.adjacency().iter().filter(|&&x| x != 0.0).count(), 18);

        assert!(SkeletonGraph::body(0).edges().is_empty());
    }
}
