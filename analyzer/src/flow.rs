//! Bipartite maximum matching via Ford-Fulkerson augmenting paths.
//!
//! The unlock and wait-group checks both reduce to the same question: can every release-side
//! operation be explained by a distinct acquire-side operation that happens before it? The
//! residual graph is source -> left side -> right side -> drain with unit capacities, so plain
//! augmenting-path search is exact and fast at the sizes one object produces.

// BIPARTITE FLOW
// ================================================================================================

#[derive(Clone, Debug, Default)]
pub struct BipartiteFlow {
    /// Right-side candidates per left node.
    adj: Vec<Vec<usize>>,
    num_right: usize,
}

/// Result of a maximum matching computation.
#[derive(Clone, Debug)]
pub struct Matching {
    /// Matched right partner per left node.
    pub left_to_right: Vec<Option<usize>>,
    /// Matched left partner per right node.
    pub right_to_left: Vec<Option<usize>>,
}

impl Matching {
    /// The max-flow value.
    pub fn flow(&self) -> usize {
        self.left_to_right.iter().flatten().count()
    }

    /// Left nodes no augmenting path could satisfy.
    pub fn unmatched_left(&self) -> impl Iterator<Item = usize> {
        self.left_to_right
            .iter()
            .enumerate()
            .filter(|(_, matched)| matched.is_none())
            .map(|(left, _)| left)
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl BipartiteFlow {
    pub fn new(num_left: usize, num_right: usize) -> Self {
        Self { adj: vec![Vec::new(); num_left], num_right }
    }

    pub fn add_edge(&mut self, left: usize, right: usize) {
        self.adj[left].push(right);
    }

    /// Computes a maximum matching.
    pub fn max_matching(&self) -> Matching {
        let mut left_to_right: Vec<Option<usize>> = vec![None; self.adj.len()];
        let mut right_to_left: Vec<Option<usize>> = vec![None; self.num_right];
        for left in 0..self.adj.len() {
            let mut visited = vec![false; self.num_right];
            self.augment(left, &mut visited, &mut left_to_right, &mut right_to_left);
        }
        Matching { left_to_right, right_to_left }
    }

    fn augment(
        &self,
        left: usize,
        visited: &mut [bool],
        left_to_right: &mut [Option<usize>],
        right_to_left: &mut [Option<usize>],
    ) -> bool {
        for &right in &self.adj[left] {
            if visited[right] {
                continue;
            }
            visited[right] = true;
            let free = match right_to_left[right] {
                None => true,
                Some(other) => self.augment(other, visited, left_to_right, right_to_left),
            };
            if free {
                left_to_right[left] = Some(right);
                right_to_left[right] = Some(left);
                return true;
            }
        }
        false
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_matching_saturates() {
        let mut flow = BipartiteFlow::new(2, 2);
        flow.add_edge(0, 0);
        flow.add_edge(0, 1);
        flow.add_edge(1, 0);
        let matching = flow.max_matching();
        assert_eq!(matching.flow(), 2);
        assert_eq!(matching.unmatched_left().count(), 0);
    }

    #[test]
    fn contention_leaves_one_left_unmatched() {
        // two left nodes compete for one right node
        let mut flow = BipartiteFlow::new(2, 1);
        flow.add_edge(0, 0);
        flow.add_edge(1, 0);
        let matching = flow.max_matching();
        assert_eq!(matching.flow(), 1);
        assert_eq!(matching.unmatched_left().count(), 1);
    }

    #[test]
    fn augmenting_path_reassigns_earlier_match() {
        // left 0 could take right 0 or 1; left 1 only right 0: the path must re-route left 0
        let mut flow = BipartiteFlow::new(2, 2);
        flow.add_edge(0, 0);
        flow.add_edge(0, 1);
        flow.add_edge(1, 0);
        let matching = flow.max_matching();
        assert_eq!(matching.flow(), 2);
        assert_eq!(matching.left_to_right[1], Some(0));
        assert_eq!(matching.left_to_right[0], Some(1));
    }

    #[test]
    fn isolated_left_nodes_stay_unmatched() {
        let flow = BipartiteFlow::new(3, 0);
        let matching = flow.max_matching();
        assert_eq!(matching.flow(), 0);
        assert_eq!(matching.unmatched_left().count(), 3);
    }
}
