use skein_core::{EventId, EventKind, RoutineId, Trace, event::AtomicEvent, event::OnceEvent};

use crate::{
    config::AnalyzerConfig,
    state::{HbState, Stamp},
};

use super::{EdgeBuf, HbEdge};

mod channel;
mod mutex;
mod sync;

// STEP
// ================================================================================================

/// Result of feeding one event to the engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct Step {
    /// Partner event analyzed together with this one (unbuffered communication); the caller must
    /// not feed it again.
    pub consumed: Option<EventId>,
    /// The event was held back and has no clocks yet; the caller must pause the routine until
    /// [VcEngine::drain_ready] reports the event done.
    pub deferred: bool,
}

impl Step {
    pub(crate) fn done() -> Self {
        Self::default()
    }

    pub(crate) fn deferred() -> Self {
        Self { consumed: None, deferred: true }
    }

    pub(crate) fn consumed(partner: EventId) -> Self {
        Self { consumed: Some(partner), deferred: false }
    }
}

// VC ENGINE
// ================================================================================================

/// The vector-clock happens-before path.
///
/// Owns the shared rule state and executes one update rule per primitive. The engine announces
/// every synchronization it performs as an [HbEdge] so the observing representations (graph,
/// segment trees) stay in lockstep without touching the state themselves.
#[derive(Debug)]
pub struct VcEngine {
    state: HbState,
    fifo: bool,
    double_increment_on_closed_recv: bool,
    ignore_atomics: bool,
}

impl VcEngine {
    pub fn new(num_routines: usize, cfg: &AnalyzerConfig) -> Self {
        Self {
            state: HbState::new(num_routines),
            fifo: cfg.fifo_channel_edges,
            double_increment_on_closed_recv: cfg.double_increment_on_closed_recv,
            ignore_atomics: cfg.ignore_atomics,
        }
    }

    pub fn state(&self) -> &HbState {
        &self.state
    }

    // EVENT ROUTING
    // --------------------------------------------------------------------------------------------

    /// Executes the update rule for the event, filling its clock caches and emitting the edges
    /// the rule discovered.
    pub fn process(&mut self, trace: &mut Trace, id: EventId, edges: &mut EdgeBuf) -> Step {
        if trace.event(id).vc.is_some() {
            // already analyzed as somebody's partner
            return Step::done();
        }
        let kind = trace.event(id).kind.clone();
        match kind {
            EventKind::Fork(fork) => {
                self.fork(trace, id, fork.child, edges);
                Step::done()
            },
            EventKind::RoutineEnd | EventKind::New(_) | EventKind::Replay(_) => {
                self.local(trace, id);
                Step::done()
            },
            EventKind::Atomic(atomic) => {
                self.atomic(trace, id, &atomic, edges);
                Step::done()
            },
            EventKind::Channel(ch) => self.channel(trace, id, &ch, edges),
            EventKind::Select(select) => self.select(trace, id, &select, edges),
            EventKind::Mutex(mutex) => {
                self.mutex(trace, id, &mutex, edges);
                Step::done()
            },
            EventKind::Cond(cond) => {
                self.cond(trace, id, &cond, edges);
                Step::done()
            },
            EventKind::Wait(wait) => {
                self.wait_group(trace, id, &wait, edges);
                Step::done()
            },
            EventKind::Once(once) => {
                self.once(trace, id, &once, edges);
                Step::done()
            },
        }
    }

    /// Retries every held-back channel operation until no further progress is possible.
    ///
    /// Returns the ids of the events that completed, in completion order, so the dispatcher can
    /// run their hooks and unblock their routines.
    pub fn drain_ready(&mut self, trace: &mut Trace, edges: &mut EdgeBuf) -> Vec<EventId> {
        let mut drained = Vec::new();
        loop {
            let before = drained.len();
            self.drain_queue_once(trace, edges, &mut drained, HoldQueue::WaitingRecv);
            self.drain_queue_once(trace, edges, &mut drained, HoldQueue::HoldRecv);
            self.drain_queue_once(trace, edges, &mut drained, HoldQueue::HoldSend);
            if drained.len() == before {
                return drained;
            }
        }
    }

    fn drain_queue_once(
        &mut self,
        trace: &mut Trace,
        edges: &mut EdgeBuf,
        drained: &mut Vec<EventId>,
        queue: HoldQueue,
    ) {
        let held: Vec<EventId> = match queue {
            HoldQueue::WaitingRecv => self.state.waiting_recv.drain(..).collect(),
            HoldQueue::HoldRecv => self.state.hold_recv.drain(..).collect(),
            HoldQueue::HoldSend => self.state.hold_send.drain(..).collect(),
        };
        for id in held {
            let step = self.reprocess(trace, id, edges);
            if !step.deferred {
                drained.push(id);
            }
        }
    }

    /// Re-runs the rule of a previously held event. The rule re-defers it if it is still not
    /// processable.
    fn reprocess(&mut self, trace: &mut Trace, id: EventId, edges: &mut EdgeBuf) -> Step {
        let kind = trace.event(id).kind.clone();
        match kind {
            EventKind::Channel(ch) => self.channel(trace, id, &ch, edges),
            EventKind::Select(select) => self.select(trace, id, &select, edges),
            _ => Step::done(),
        }
    }

    // ROUTINE-LOCAL RULES
    // --------------------------------------------------------------------------------------------

    /// The bracket shared by every rule after its syncs: advance the routine's own components,
    /// then cache the resulting clocks on the event. An event's own component therefore equals
    /// its 1-based position in the stream, and merging an event's clock into another routine
    /// orders that routine strictly after the event.
    pub(crate) fn local(&mut self, trace: &mut Trace, id: EventId) {
        self.state.tick(id.routine);
        self.assign(trace, id);
    }

    /// Caches the routine's current clocks on the event.
    pub(crate) fn assign(&mut self, trace: &mut Trace, id: EventId) {
        let snapshot = self.state.snapshot(id.routine);
        let event = trace.event_mut(id);
        event.vc = Some(snapshot.vc);
        event.wvc = Some(snapshot.wvc);
    }

    /// The event's own clocks as a stamp, for release stores and FIFO state.
    pub(crate) fn stamp(&self, id: EventId) -> Stamp {
        Stamp { event: id, clocks: self.state.snapshot(id.routine) }
    }

    pub(crate) fn merge_strong(&mut self, routine: RoutineId, stamp: &Stamp) {
        self.state.clocks[routine.as_usize()].merge(&stamp.clocks.vc);
    }

    pub(crate) fn merge_both(&mut self, routine: RoutineId, stamp: &Stamp) {
        self.state.clocks[routine.as_usize()].merge(&stamp.clocks.vc);
        self.state.weak_clocks[routine.as_usize()].merge(&stamp.clocks.wvc);
    }

    // FORK
    // --------------------------------------------------------------------------------------------

    /// Seeds the child routine's clocks from the parent and orders the child's stream after the
    /// fork. The child's first event advances the child component itself.
    fn fork(&mut self, trace: &mut Trace, id: EventId, child: RoutineId, edges: &mut EdgeBuf) {
        self.local(trace, id);
        let parent = id.routine.as_usize();
        let child_idx = child.as_usize();

        self.state.clocks[child_idx] = self.state.clocks[parent].clone();
        self.state.weak_clocks[child_idx] = self.state.weak_clocks[parent].clone();

        if !trace.routine(child).is_empty() {
            edges.push(HbEdge::new(id, EventId::new(child, 0)));
        }
    }

    // ATOMIC
    // --------------------------------------------------------------------------------------------

    /// Readers order themselves after the last writer; writers only publish themselves.
    fn atomic(&mut self, trace: &mut Trace, id: EventId, atomic: &AtomicEvent, edges: &mut EdgeBuf) {
        if self.ignore_atomics {
            self.local(trace, id);
            return;
        }
        if atomic.op.is_read() {
            if let Some(writer) = self.state.last_atomic_writer.get(&atomic.object).cloned() {
                self.merge_both(id.routine, &writer);
                edges.push(HbEdge::new(writer.event, id));
            }
        }
        self.local(trace, id);
        if atomic.op.is_write() {
            let stamp = self.stamp(id);
            self.state.last_atomic_writer.insert(atomic.object, stamp);
        }
    }

    // ONCE
    // --------------------------------------------------------------------------------------------

    /// The successful attempt publishes itself; every failing attempt orders after it.
    fn once(&mut self, trace: &mut Trace, id: EventId, once: &OnceEvent, edges: &mut EdgeBuf) {
        if !once.success
            && let Some(winner) = self.state.o_suc.get(&once.object).cloned()
        {
            self.merge_both(id.routine, &winner);
            edges.push(HbEdge::new(winner.event, id));
        }
        self.local(trace, id);
        if once.success {
            let stamp = self.stamp(id);
            self.state.o_suc.insert(once.object, stamp);
        }
    }
}

// HOLD QUEUES
// ================================================================================================

#[derive(Clone, Copy, Debug)]
enum HoldQueue {
    WaitingRecv,
    HoldRecv,
    HoldSend,
}
