use skein_core::{ClockRelation, Event, EventId};
use smallvec::SmallVec;

pub mod csst;
pub mod pog;
pub mod vc;

pub use csst::{Csst, CsstPair};
pub use pog::Pog;
pub use vc::{Step, VcEngine};

// HB EDGE
// ================================================================================================

/// A happens-before edge discovered by an update rule.
///
/// Edges always enter the strong representation. `in_weak` is false only for the lock-to-unlock
/// ordering edges the weak relation deliberately omits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HbEdge {
    pub from: EventId,
    pub to: EventId,
    pub in_weak: bool,
}

impl HbEdge {
    pub fn new(from: EventId, to: EventId) -> Self {
        Self { from, to, in_weak: true }
    }

    pub fn strong_only(from: EventId, to: EventId) -> Self {
        Self { from, to, in_weak: false }
    }
}

/// Per-event edge fan-out buffer; most events produce at most a handful of edges.
pub type EdgeBuf = SmallVec<[HbEdge; 4]>;

// CANONICAL QUERIES
// ================================================================================================

/// Happens-before relation between two events according to their cached strong clocks.
///
/// This is the canonical query exposed to the scenario checks; when the graph or segment-tree
/// paths are enabled as well, cross-validation asserts they agree with it.
pub fn relation(a: &Event, b: &Event) -> ClockRelation {
    a.clock().relation(b.clock())
}

/// Weak-relation counterpart of [relation].
pub fn relation_weak(a: &Event, b: &Event) -> ClockRelation {
    a.weak_clock().relation(b.weak_clock())
}

/// True if the two events are unordered under strong happens-before.
pub fn concurrent(a: &Event, b: &Event) -> bool {
    relation(a, b) == ClockRelation::Concurrent
}
