use std::collections::{HashMap, HashSet};

use skein_core::{ClockRelation, EventId, RoutineId, Trace};
use smallvec::SmallVec;

use super::HbEdge;

// PARTIAL-ORDER GRAPH
// ================================================================================================

/// Happens-before as an explicit DAG over events.
///
/// Nodes are event ids; cross-routine edges are added at the same hooks where the vector-clock
/// path synchronizes. The same-routine successor edges are implicit: reachability walks them by
/// position, so only the synchronization edges are stored. Strong and weak orders are two edge
/// sets over the same nodes.
#[derive(Debug)]
pub struct Pog {
    /// Events per routine, `lengths[r]` for 1-based r.
    lengths: Vec<usize>,
    strong: EdgeSet,
    weak: EdgeSet,
}

#[derive(Debug, Default)]
struct EdgeSet {
    fwd: HashMap<EventId, SmallVec<[EventId; 2]>>,
    /// Inverted adjacency for reverse reachability.
    rev: HashMap<EventId, SmallVec<[EventId; 2]>>,
}

impl EdgeSet {
    fn insert(&mut self, from: EventId, to: EventId) {
        self.fwd.entry(from).or_default().push(to);
        self.rev.entry(to).or_default().push(from);
    }
}

impl Pog {
    pub fn new(trace: &Trace) -> Self {
        let mut lengths = vec![0; trace.num_routines() + 1];
        for routine in 1..=trace.num_routines() {
            lengths[routine] = trace.routine(RoutineId::new(routine as u32)).len();
        }
        Self { lengths, strong: EdgeSet::default(), weak: EdgeSet::default() }
    }

    pub fn add_edge(&mut self, edge: HbEdge) {
        self.strong.insert(edge.from, edge.to);
        if edge.in_weak {
            self.weak.insert(edge.from, edge.to);
        }
    }

    /// Strong happens-before relation via DFS reachability.
    pub fn relation(&self, a: EventId, b: EventId) -> ClockRelation {
        self.relation_in(&self.strong, a, b)
    }

    /// Weak-order counterpart of [Self::relation].
    pub fn relation_weak(&self, a: EventId, b: EventId) -> ClockRelation {
        self.relation_in(&self.weak, a, b)
    }

    fn relation_in(&self, edges: &EdgeSet, a: EventId, b: EventId) -> ClockRelation {
        if a == b {
            return ClockRelation::Concurrent;
        }
        if a.routine == b.routine {
            return if a.index < b.index { ClockRelation::Before } else { ClockRelation::After };
        }
        if self.search(edges, a, b, Direction::Forward) {
            ClockRelation::Before
        } else if self.search(edges, a, b, Direction::Backward) {
            ClockRelation::After
        } else {
            ClockRelation::Concurrent
        }
    }

    /// DFS from `from` towards `to`, walking either the forward edges plus same-routine
    /// successors, or the inverted edges plus same-routine predecessors.
    fn search(&self, edges: &EdgeSet, from: EventId, to: EventId, dir: Direction) -> bool {
        let reached = |node: EventId| {
            node.routine == to.routine
                && match dir {
                    Direction::Forward => node.index <= to.index,
                    Direction::Backward => node.index >= to.index,
                }
        };

        let mut visited: HashSet<EventId> = HashSet::new();
        let mut stack: Vec<EventId> = vec![from];
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            if node != from && reached(node) {
                return true;
            }
            let chain = match dir {
                Direction::Forward => {
                    let len = self.lengths[node.routine.as_usize()];
                    ((node.index as usize) + 1 < len).then(|| EventId::new(node.routine, node.index + 1))
                },
                Direction::Backward => {
                    (node.index > 0).then(|| EventId::new(node.routine, node.index - 1))
                },
            };
            if let Some(next) = chain {
                if reached(next) {
                    return true;
                }
                stack.push(next);
            }
            let adjacency = match dir {
                Direction::Forward => &edges.fwd,
                Direction::Backward => &edges.rev,
            };
            for &next in adjacency.get(&node).into_iter().flatten() {
                if reached(next) {
                    return true;
                }
                stack.push(next);
            }
        }
        false
    }
}

#[derive(Clone, Copy, Debug)]
enum Direction {
    Forward,
    Backward,
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(routine: u32, index: u32) -> EventId {
        EventId::new(RoutineId::new(routine), index)
    }

    fn pog(lengths: &[usize]) -> Pog {
        let mut all = vec![0];
        all.extend_from_slice(lengths);
        Pog { lengths: all, strong: EdgeSet::default(), weak: EdgeSet::default() }
    }

    #[test]
    fn same_routine_order_is_positional() {
        let graph = pog(&[3]);
        assert_eq!(graph.relation(id(1, 0), id(1, 2)), ClockRelation::Before);
        assert_eq!(graph.relation(id(1, 2), id(1, 0)), ClockRelation::After);
        assert_eq!(graph.relation(id(1, 1), id(1, 1)), ClockRelation::Concurrent);
    }

    #[test]
    fn cross_edges_compose_with_chains() {
        let mut graph = pog(&[3, 3]);
        // 1.0 -> 2.1; chain carries it to 2.2 and from 1.0's predecessors
        graph.add_edge(HbEdge::new(id(1, 0), id(2, 1)));
        assert_eq!(graph.relation(id(1, 0), id(2, 2)), ClockRelation::Before);
        assert_eq!(graph.relation(id(2, 2), id(1, 0)), ClockRelation::After);
        assert_eq!(graph.relation(id(1, 1), id(2, 1)), ClockRelation::Concurrent);
        assert_eq!(graph.relation(id(2, 0), id(1, 0)), ClockRelation::Concurrent);
    }

    #[test]
    fn weak_order_omits_strong_only_edges() {
        let mut graph = pog(&[2, 2]);
        graph.add_edge(HbEdge::strong_only(id(1, 0), id(2, 0)));
        assert_eq!(graph.relation(id(1, 0), id(2, 1)), ClockRelation::Before);
        assert_eq!(graph.relation_weak(id(1, 0), id(2, 1)), ClockRelation::Concurrent);
    }

    #[test]
    fn two_hop_transitivity() {
        let mut graph = pog(&[2, 2, 2]);
        graph.add_edge(HbEdge::new(id(1, 0), id(2, 0)));
        graph.add_edge(HbEdge::new(id(2, 1), id(3, 0)));
        assert_eq!(graph.relation(id(1, 0), id(3, 1)), ClockRelation::Before);
        assert_eq!(graph.relation(id(3, 1), id(1, 0)), ClockRelation::After);
    }
}
