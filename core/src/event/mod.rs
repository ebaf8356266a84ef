use std::sync::Arc;

use crate::{
    clock::VectorClock,
    ids::{EventId, ObjectId, RoutineId},
};

mod kind;
pub use kind::{
    AtomicEvent, AtomicOp, ChannelEvent, ChannelOp, CondEvent, CondOp, EventKind, ForkEvent,
    MutexEvent, MutexOp, NewEvent, OnceEvent, ReplayEvent, SelectCase, SelectEvent, WaitEvent,
    WaitOp,
};

// EVENT
// ================================================================================================

/// One recorded operation of one routine.
///
/// Events are created by the trace parser, added exactly once to their routine's stream, and from
/// then on mutated only by the happens-before engine (to fill the `vc`/`wvc` caches) and by the
/// scenario checks (to fill the concurrency-count caches).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Event {
    routine: RoutineId,
    index: u32,
    /// Timestamp at which the routine entered the operation.
    t_pre: u64,
    /// Timestamp at which the operation completed; 0 if it never did (a leak candidate).
    t_post: u64,
    file: Arc<str>,
    line: u32,
    pub kind: EventKind,
    /// Strong happens-before clock, assigned by the engine before the rule's closing increment.
    pub vc: Option<VectorClock>,
    /// Weak happens-before clock (lock edges omitted).
    pub wvc: Option<VectorClock>,
    /// Number of events concurrent with this one under strong HB; cached by scenario checks.
    pub num_concurrent: Option<u32>,
    /// Same under weak HB.
    pub num_concurrent_weak: Option<u32>,
}

impl Event {
    // CONSTRUCTOR
    // --------------------------------------------------------------------------------------------

    pub fn new(
        routine: RoutineId,
        index: u32,
        t_pre: u64,
        t_post: u64,
        file: Arc<str>,
        line: u32,
        kind: EventKind,
    ) -> Self {
        Self {
            routine,
            index,
            t_pre,
            t_post,
            file,
            line,
            kind,
            vc: None,
            wvc: None,
            num_concurrent: None,
            num_concurrent_weak: None,
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn id(&self) -> EventId {
        EventId::new(self.routine, self.index)
    }

    pub fn routine(&self) -> RoutineId {
        self.routine
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn t_pre(&self) -> u64 {
        self.t_pre
    }

    pub fn t_post(&self) -> u64 {
        self.t_post
    }

    pub fn file(&self) -> &Arc<str> {
        &self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn object(&self) -> Option<ObjectId> {
        self.kind.object()
    }

    /// Returns true if the operation was entered but never completed in the observed trace.
    pub fn is_leak(&self) -> bool {
        self.t_post == 0 && self.t_pre != 0
    }

    /// Returns the key under which the global iterator orders this event.
    ///
    /// Completed operations sort by their exit timestamp; blocked operations by their enter
    /// timestamp; entries that never ran sort last. Conditional-variable waits always sort by
    /// their enter timestamp: the wait must be queued on the variable before the signal that
    /// releases it is analyzed.
    pub fn t_sort(&self) -> u64 {
        if matches!(&self.kind, EventKind::Cond(cond) if cond.op == kind::CondOp::Wait)
            && self.t_pre != 0
        {
            return self.t_pre;
        }
        if self.t_post != 0 {
            self.t_post
        } else if self.t_pre != 0 {
            self.t_pre
        } else {
            u64::MAX
        }
    }

    /// Returns the strong clock cache, panicking if the engine has not assigned it yet.
    ///
    /// Intended for scenario checks, which by construction run after clock assignment.
    pub fn clock(&self) -> &VectorClock {
        self.vc.as_ref().expect("event clock not assigned")
    }

    /// Weak-clock counterpart of [Self::clock].
    pub fn weak_clock(&self) -> &VectorClock {
        self.wvc.as_ref().expect("event weak clock not assigned")
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn event(t_pre: u64, t_post: u64) -> Event {
        Event::new(
            RoutineId::main(),
            0,
            t_pre,
            t_post,
            Arc::from("main.go"),
            10,
            EventKind::RoutineEnd,
        )
    }

    #[test]
    fn t_sort_prefers_completion_time() {
        assert_eq!(event(4, 9).t_sort(), 9);
        assert_eq!(event(4, 0).t_sort(), 4);
        assert_eq!(event(0, 0).t_sort(), u64::MAX);
    }

    #[test]
    fn leak_requires_entered_but_unfinished() {
        assert!(event(4, 0).is_leak());
        assert!(!event(4, 9).is_leak());
        assert!(!event(0, 0).is_leak());
    }
}
