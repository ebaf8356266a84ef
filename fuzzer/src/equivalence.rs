//! Trace-equivalence pruning: the independence relation on adjacent operations, canonical
//! vector-clock signatures, and the dedup set that keeps equivalent schedules from being
//! dispatched twice.

use std::collections::{HashMap, HashSet};
use std::fmt;

use skein_core::{
    Event, EventId, ObjectId, Trace,
    event::{AtomicOp, ChannelOp, CondOp, EventKind, MutexOp},
};

use crate::constraint::ScheduleChain;

// INDEPENDENCE ORACLE
// ================================================================================================

/// Answers "can these two adjacent operations be swapped without changing any safety property?".
///
/// Most answers come straight from the operation kinds; the conditional rows of the table need
/// context (reader counts, wait-group counters, whether a close or a successful once already
/// happened), which the oracle precomputes in one pass over the trace.
#[derive(Debug)]
pub struct IndependenceOracle {
    /// Reader count per rw mutex after each of its lock events, in schedule order.
    reader_count_after: HashMap<EventId, i64>,
    /// Earliest close time per channel.
    first_close: HashMap<ObjectId, u64>,
    /// Earliest successful once time per once object.
    first_once_success: HashMap<ObjectId, u64>,
}

impl IndependenceOracle {
    pub fn new(trace: &Trace) -> Self {
        let mut reader_counts: HashMap<ObjectId, i64> = HashMap::new();
        let mut reader_count_after = HashMap::new();
        let mut first_close = HashMap::new();
        let mut first_once_success = HashMap::new();

        let mut events: Vec<&Event> = trace.events().filter(|e| e.t_sort() != u64::MAX).collect();
        events.sort_by_key(|event| event.t_sort());

        for event in events {
            match &event.kind {
                EventKind::Mutex(mutex) if mutex.op.is_read() => {
                    let count = reader_counts.entry(mutex.object).or_insert(0);
                    match mutex.op {
                        MutexOp::RLock | MutexOp::TryRLock if mutex.acquired() => *count += 1,
                        MutexOp::RUnlock => *count -= 1,
                        _ => (),
                    }
                    reader_count_after.insert(event.id(), *count);
                },
                EventKind::Channel(ch) if ch.op == ChannelOp::Close => {
                    first_close.entry(ch.object).or_insert(event.t_sort());
                },
                EventKind::Once(once) if once.success => {
                    first_once_success.entry(once.object).or_insert(event.t_sort());
                },
                _ => (),
            }
        }
        Self { reader_count_after, first_close, first_once_success }
    }

    /// The independence table. Symmetric; unlisted combinations are dependent.
    pub fn independent(&self, a: &Event, b: &Event) -> bool {
        self.independent_oriented(a, b) || self.independent_oriented(b, a)
    }

    fn independent_oriented(&self, left: &Event, right: &Event) -> bool {
        match (&left.kind, &right.kind) {
            (EventKind::Atomic(a), EventKind::Atomic(b)) => {
                a.op == AtomicOp::Load && b.op == AtomicOp::Load
            },
            (EventKind::Mutex(a), EventKind::Mutex(b)) if a.object == b.object => {
                match (a.op, b.op) {
                    (MutexOp::RLock, MutexOp::RLock | MutexOp::TryRLock) => true,
                    (MutexOp::RUnlock, MutexOp::RLock | MutexOp::TryRLock) => true,
                    (MutexOp::RLock, MutexOp::RUnlock) => {
                        // swapping is harmless only while another reader still holds the lock
                        self.pair_reader_count(left, right) >= 2
                    },
                    _ => false,
                }
            },
            (EventKind::Wait(a), EventKind::Wait(b)) if a.object == b.object => {
                if (a.is_add() && b.is_add()) || (a.is_done() && b.is_done()) {
                    true
                } else if a.is_add() && b.is_done() {
                    wait_val(later_of(left, right)) >= 2
                } else {
                    false
                }
            },
            (EventKind::Cond(a), EventKind::Cond(b)) => {
                a.op == CondOp::Broadcast && b.op == CondOp::Broadcast
            },
            (EventKind::Once(a), EventKind::Once(b)) if a.object == b.object => {
                self.first_once_success.get(&a.object).is_some_and(|&t| {
                    t < left.t_sort().min(right.t_sort())
                })
            },
            (EventKind::Channel(a), EventKind::Channel(b))
                if a.object == b.object && a.op == ChannelOp::Recv && b.op == ChannelOp::Recv =>
            {
                self.first_close.get(&a.object).is_some_and(|&t| {
                    t < left.t_sort().min(right.t_sort())
                })
            },
            _ => false,
        }
    }

    fn pair_reader_count(&self, a: &Event, b: &Event) -> i64 {
        let later = later_of(a, b);
        self.reader_count_after.get(&later.id()).copied().unwrap_or(0)
    }
}

fn later_of<'a>(a: &'a Event, b: &'a Event) -> &'a Event {
    if a.t_sort() >= b.t_sort() { a } else { b }
}

fn wait_val(event: &Event) -> i64 {
    match &event.kind {
        EventKind::Wait(wait) => wait.val,
        _ => 0,
    }
}

// CANONICAL SIGNATURE
// ================================================================================================

/// Canonical identity of a schedule; two schedules with equal signatures are equivalent and must
/// not both be dispatched.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Signature([u8; 32]);

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Canonical signature of an analyzed trace.
///
/// Events are put into a linear extension of happens-before (component sums extend the partial
/// order), clock components are rank-normalized per routine to erase raw timestamp noise, and
/// the result is hashed.
pub fn trace_signature(trace: &Trace) -> Signature {
    let mut events: Vec<&Event> = trace.events().filter(|event| event.vc.is_some()).collect();
    events.sort_by_key(|event| {
        let sum: u64 = event.clock().components().iter().sum();
        (sum, event.routine(), event.index())
    });

    // dense rank per clock component, per routine
    let num_routines = trace.num_routines();
    let mut ranks: Vec<HashMap<u64, u32>> = vec![HashMap::new(); num_routines + 1];
    for routine in 1..=num_routines {
        let mut values: Vec<u64> =
            events.iter().map(|event| event.clock().components()[routine]).collect();
        values.sort_unstable();
        values.dedup();
        ranks[routine] =
            values.into_iter().enumerate().map(|(rank, v)| (v, rank as u32 + 1)).collect();
    }

    let mut hasher = blake3::Hasher::new();
    for event in &events {
        hasher.update(event.kind.label().as_bytes());
        hasher.update(&event.object().map_or(0, |object| object.as_u64()).to_le_bytes());
        for routine in 1..=num_routines {
            let component = event.clock().components()[routine];
            let rank = ranks[routine].get(&component).copied().unwrap_or(0);
            hasher.update(&rank.to_le_bytes());
        }
    }
    Signature(*hasher.finalize().as_bytes())
}

/// Canonical signature of a mutated schedule: the base trace plus the mutation chain, with the
/// chain first normalized under adjacent-independent swaps.
pub fn schedule_signature(
    trace: &Trace,
    oracle: &IndependenceOracle,
    chain: &ScheduleChain,
    tag: &str,
) -> Signature {
    let canonical = canonicalize_chain(trace, oracle, chain);
    let mut hasher = blake3::Hasher::new();
    hasher.update(trace_signature(trace).0.as_slice());
    hasher.update(tag.as_bytes());
    for id in &canonical.events {
        hasher.update(&id.routine.as_u32().to_le_bytes());
        hasher.update(&id.index.to_le_bytes());
    }
    Signature(*hasher.finalize().as_bytes())
}

/// Bubble-sorts adjacent independent events into `(routine, index)` order, the normal form under
/// which two chains differing only in harmless swaps compare equal.
pub fn canonicalize_chain(
    trace: &Trace,
    oracle: &IndependenceOracle,
    chain: &ScheduleChain,
) -> ScheduleChain {
    let mut events = chain.events.clone();
    let mut changed = true;
    while changed {
        changed = false;
        for i in 1..events.len() {
            let (a, b) = (events[i - 1], events[i]);
            if a > b && oracle.independent(trace.event(a), trace.event(b)) {
                events.swap(i - 1, i);
                changed = true;
            }
        }
    }
    ScheduleChain::new(events)
}

// SIGNATURE SET
// ================================================================================================

/// The dedup set of already-dispatched schedules.
#[derive(Debug, Default)]
pub struct SignatureSet {
    seen: HashSet<Signature>,
}

impl SignatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the signature was new; false means an equivalent schedule was already
    /// dispatched and this one must be dropped.
    pub fn insert(&mut self, signature: Signature) -> bool {
        self.seen.insert(signature)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use skein_analyzer::{AnalyzerConfig, CancelFlag, analyze};
    use skein_core::event::AtomicOp;
    use skein_test_utils::TraceBuilder;

    use super::*;

    fn analyzed_trace(builder: TraceBuilder) -> Trace {
        let mut trace = builder.build();
        analyze(&mut trace, &AnalyzerConfig::default(), &CancelFlag::new()).unwrap();
        trace
    }

    #[test]
    fn loads_are_always_independent() {
        let mut builder = TraceBuilder::new(2);
        builder.fork(1, 2);
        let a = builder.atomic(1, 7, AtomicOp::Load);
        let b = builder.atomic(2, 7, AtomicOp::Load);
        builder.end(1);
        builder.end(2);
        let trace = analyzed_trace(builder);

        let oracle = IndependenceOracle::new(&trace);
        assert!(oracle.independent(trace.event(a), trace.event(b)));
    }

    #[test]
    fn load_store_is_dependent() {
        let mut builder = TraceBuilder::new(2);
        builder.fork(1, 2);
        let a = builder.atomic(1, 7, AtomicOp::Load);
        let b = builder.atomic(2, 7, AtomicOp::Store);
        builder.end(1);
        builder.end(2);
        let trace = analyzed_trace(builder);

        let oracle = IndependenceOracle::new(&trace);
        assert!(!oracle.independent(trace.event(a), trace.event(b)));
    }

    #[test]
    fn recvs_after_close_are_independent() {
        let mut builder = TraceBuilder::new(2);
        builder.fork(1, 2);
        builder.close(1, 5);
        let a = builder.recv_on_closed(1, 5, 1);
        let b = builder.recv_on_closed(2, 5, 1);
        builder.end(1);
        builder.end(2);
        let trace = analyzed_trace(builder);

        let oracle = IndependenceOracle::new(&trace);
        assert!(oracle.independent(trace.event(a), trace.event(b)));
    }

    #[test]
    fn equal_traces_share_a_signature() {
        let build = || {
            let mut builder = TraceBuilder::new(2);
            builder.fork(1, 2);
            builder.send_recv(1, 2, 9, 1);
            builder.end(1);
            builder.end(2);
            analyzed_trace(builder)
        };
        assert_eq!(trace_signature(&build()), trace_signature(&build()));
    }

    #[test]
    fn chain_canonicalization_orders_independent_neighbors() {
        let mut builder = TraceBuilder::new(2);
        builder.fork(1, 2);
        let a = builder.atomic(1, 7, AtomicOp::Load);
        let b = builder.atomic(2, 7, AtomicOp::Load);
        builder.end(1);
        builder.end(2);
        let trace = analyzed_trace(builder);
        let oracle = IndependenceOracle::new(&trace);

        let forward = canonicalize_chain(&trace, &oracle, &ScheduleChain::new(vec![a, b]));
        let backward = canonicalize_chain(&trace, &oracle, &ScheduleChain::new(vec![b, a]));
        assert_eq!(forward, backward);
    }
}
