use skein_core::{ClockRelation, EventId, RoutineId, Trace};

use super::HbEdge;

mod segtree;
pub use segtree::{BLOCK_SIZE, FlatSegTree, INF, SparseSegTree};

// COLLECTIVE SPARSE SEGMENT TREES
// ================================================================================================

/// Chain-reachability index over per-routine event positions.
///
/// For every ordered routine pair `(i, j)` a sparse segment tree maps a position `p` in `i` to
/// the earliest position in `j` directly reachable from `(i, p)`. Since anything reachable from a
/// later position of `i` is also reachable from `p` through `i`'s own chain, the index answers
/// `reachable((i, p), (j, q))` with one suffix-minimum query. The trees hold the transitive
/// closure: inserting an edge propagates it to every affected pair through a worklist.
///
/// The strong/weak split is realized by running two instances side by side.
#[derive(Debug)]
pub struct Csst {
    /// Events per routine, `lengths[r]` for 1-based r.
    lengths: Vec<usize>,
    /// `trees[i][j]`, both 1-based; `None` until first touched.
    trees: Vec<Vec<Option<SparseSegTree>>>,
}

impl Csst {
    pub fn new(trace: &Trace) -> Self {
        let mut lengths = vec![0; trace.num_routines() + 1];
        for routine in 1..=trace.num_routines() {
            lengths[routine] = trace.routine(RoutineId::new(routine as u32)).len();
        }
        let k = lengths.len();
        Self { lengths, trees: vec![(0..k).map(|_| None).collect(); k] }
    }

    fn num_routines(&self) -> usize {
        self.lengths.len() - 1
    }

    /// Direct or transitive reach from position `p` of routine `i` into routine `j`.
    fn suffix_min(&self, i: usize, j: usize, p: usize) -> u32 {
        self.trees[i][j].as_ref().map_or(INF, |tree| tree.suffix_min(p))
    }

    /// Latest position of routine `z` that reaches position `p` of routine `a`, if any.
    fn latest_reaching(&self, z: usize, a: usize, p: usize) -> Option<usize> {
        self.trees[z][a].as_ref().and_then(|tree| tree.latest_leq(p as u32))
    }

    fn insert(&mut self, i: usize, p: usize, j: usize, q: u32) -> bool {
        let len = self.lengths[i];
        if len == 0 {
            return false;
        }
        self.trees[i][j]
            .get_or_insert_with(|| SparseSegTree::new(len))
            .update(p, q)
    }

    /// Inserts the edge `(from) -> (to)` and restores transitive closure.
    ///
    /// The worklist extends every new pair forward along the target's outgoing reach and backward
    /// to the latest predecessors of the source, which covers predecessor-to-successor pairs
    /// recursively.
    pub fn add_edge(&mut self, edge: HbEdge) {
        let (i, p) = (edge.from.routine.as_usize(), edge.from.index as usize);
        let (j, q) = (edge.to.routine.as_usize(), edge.to.index as usize);
        let mut worklist = vec![(i, p, j, q as u32)];

        while let Some((a, pa, b, qb)) = worklist.pop() {
            if a == b {
                continue;
            }
            if self.suffix_min(a, b, pa) <= qb {
                continue;
            }
            self.insert(a, pa, b, qb);

            for c in 1..=self.num_routines() {
                if c != a && c != b {
                    let qc = self.suffix_min(b, c, qb as usize);
                    if qc != INF {
                        worklist.push((a, pa, c, qc));
                    }
                }
            }
            for z in 1..=self.num_routines() {
                if z != a
                    && z != b
                    && let Some(pz) = self.latest_reaching(z, a, pa)
                {
                    worklist.push((z, pz, b, qb));
                }
            }
        }
    }

    /// Earliest position of `routine` reachable from `from`, if any.
    pub fn successor(&self, from: EventId, routine: RoutineId) -> Option<u32> {
        let min =
            self.suffix_min(from.routine.as_usize(), routine.as_usize(), from.index as usize);
        (min != INF).then_some(min)
    }

    /// Latest position of `routine` that reaches `to`, if any.
    pub fn predecessor(&self, to: EventId, routine: RoutineId) -> Option<u32> {
        self.latest_reaching(routine.as_usize(), to.routine.as_usize(), to.index as usize)
            .map(|pos| pos as u32)
    }

    /// True if `(from)` reaches `(to)` through chains and inserted edges.
    pub fn reachable(&self, from: EventId, to: EventId) -> bool {
        if from.routine == to.routine {
            return from.index <= to.index;
        }
        self.suffix_min(from.routine.as_usize(), to.routine.as_usize(), from.index as usize)
            <= to.index
    }

    /// Happens-before relation; mirrors the conventions of the other paths, including that an
    /// event is concurrent with itself.
    pub fn relation(&self, a: EventId, b: EventId) -> ClockRelation {
        if a == b {
            return ClockRelation::Concurrent;
        }
        if a.routine == b.routine {
            return if a.index < b.index { ClockRelation::Before } else { ClockRelation::After };
        }
        if self.reachable(a, b) {
            ClockRelation::Before
        } else if self.reachable(b, a) {
            ClockRelation::After
        } else {
            ClockRelation::Concurrent
        }
    }
}

// CSST PAIR
// ================================================================================================

/// Strong and weak reachability indexes maintained side by side.
#[derive(Debug)]
pub struct CsstPair {
    pub strong: Csst,
    pub weak: Csst,
}

impl CsstPair {
    pub fn new(trace: &Trace) -> Self {
        Self { strong: Csst::new(trace), weak: Csst::new(trace) }
    }

    pub fn add_edge(&mut self, edge: HbEdge) {
        self.strong.add_edge(edge);
        if edge.in_weak {
            self.weak.add_edge(edge);
        }
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(routine: u32, index: u32) -> EventId {
        EventId::new(RoutineId::new(routine), index)
    }

    fn csst(lengths: &[usize]) -> Csst {
        let mut all = vec![0];
        all.extend_from_slice(lengths);
        let k = all.len();
        Csst { lengths: all, trees: vec![(0..k).map(|_| None).collect(); k] }
    }

    #[test]
    fn direct_edge_reaches_through_both_chains() {
        let mut index = csst(&[4, 4]);
        index.add_edge(HbEdge::new(id(1, 1), id(2, 2)));
        // earlier in routine 1, later in routine 2
        assert!(index.reachable(id(1, 0), id(2, 3)));
        assert!(index.reachable(id(1, 1), id(2, 2)));
        assert!(!index.reachable(id(1, 2), id(2, 3)));
        assert!(!index.reachable(id(2, 0), id(1, 3)));

        assert_eq!(index.successor(id(1, 0), RoutineId::new(2)), Some(2));
        assert_eq!(index.successor(id(1, 2), RoutineId::new(2)), None);
        assert_eq!(index.predecessor(id(2, 3), RoutineId::new(1)), Some(1));
        assert_eq!(index.predecessor(id(2, 1), RoutineId::new(1)), None);
    }

    #[test]
    fn closure_is_maintained_across_pairs() {
        let mut index = csst(&[3, 3, 3]);
        index.add_edge(HbEdge::new(id(1, 0), id(2, 1)));
        index.add_edge(HbEdge::new(id(2, 2), id(3, 0)));
        // 1.0 -> 2.1 -> (chain) 2.2 -> 3.0
        assert!(index.reachable(id(1, 0), id(3, 2)));
        assert_eq!(index.relation(id(1, 0), id(3, 1)), ClockRelation::Before);
        assert_eq!(index.relation(id(3, 1), id(1, 0)), ClockRelation::After);
    }

    #[test]
    fn late_edge_connects_earlier_predecessors() {
        let mut index = csst(&[3, 3, 3]);
        // first 3 -> 1, then 1 -> 2: adding the second edge must connect 3 to 2 backward
        index.add_edge(HbEdge::new(id(3, 0), id(1, 1)));
        index.add_edge(HbEdge::new(id(1, 2), id(2, 1)));
        assert!(index.reachable(id(3, 0), id(2, 2)));
        assert_eq!(index.relation(id(3, 0), id(2, 1)), ClockRelation::Before);
    }

    #[test]
    fn unrelated_positions_stay_concurrent() {
        let mut index = csst(&[2, 2]);
        index.add_edge(HbEdge::new(id(1, 1), id(2, 1)));
        assert_eq!(index.relation(id(1, 0), id(2, 0)), ClockRelation::Concurrent);
        assert_eq!(index.relation(id(2, 0), id(1, 0)), ClockRelation::Concurrent);
    }
}
