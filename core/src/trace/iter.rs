use std::{cmp::Reverse, collections::BinaryHeap};

use crate::ids::{EventId, RoutineId};

use super::Trace;

// SCHEDULE ITERATOR
// ================================================================================================

/// Yields event ids in the order in which they should be analyzed.
///
/// Events are interleaved across routines through a min-heap keyed on each event's `t_sort`
/// (ties broken by routine id). The iterator does not borrow the trace: it snapshots the sort
/// keys up front so the caller can mutate events while walking the schedule.
///
/// When the dispatcher analyzes both halves of an unbuffered communication at once, it calls
/// [ScheduleIter::advance_past] with the partner's id so the partner is not yielded again.
/// Entries that never executed (both timestamps zero) are skipped.
#[derive(Clone, Debug)]
pub struct ScheduleIter {
    /// Per-routine `t_sort` keys, indexed `[routine - 1][index]`.
    keys: Vec<Vec<u64>>,
    /// Next unconsumed index per routine.
    cursors: Vec<u32>,
    /// Min-heap of (t_sort, routine, index); entries may be stale after `advance_past`.
    heap: BinaryHeap<Reverse<(u64, u32, u32)>>,
}

impl ScheduleIter {
    pub fn new(trace: &Trace) -> Self {
        let keys: Vec<Vec<u64>> = (1..=trace.num_routines())
            .map(|r| {
                trace
                    .routine(RoutineId::new(r as u32))
                    .iter()
                    .map(|event| event.t_sort())
                    .collect()
            })
            .collect();
        let mut iter = Self {
            cursors: vec![0; keys.len()],
            heap: BinaryHeap::with_capacity(keys.len()),
            keys,
        };
        for routine in 0..iter.keys.len() {
            iter.push_cursor(routine);
        }
        iter
    }

    /// Moves the routine's cursor past the specified event, if it is exactly the next one.
    ///
    /// Events before the cursor were already consumed; an event further ahead stays in place and
    /// the caller is expected to skip it when its turn comes.
    pub fn advance_past(&mut self, id: EventId) {
        let routine = id.routine.as_usize() - 1;
        if self.cursors[routine] == id.index {
            self.cursors[routine] = id.index + 1;
            self.push_cursor(routine);
        }
    }

    fn push_cursor(&mut self, routine: usize) {
        let index = self.cursors[routine];
        if let Some(&key) = self.keys[routine].get(index as usize) {
            self.heap.push(Reverse((key, routine as u32 + 1, index)));
        }
    }
}

impl Iterator for ScheduleIter {
    type Item = EventId;

    fn next(&mut self) -> Option<EventId> {
        while let Some(Reverse((key, routine, index))) = self.heap.pop() {
            let slot = routine as usize - 1;
            if index != self.cursors[slot] {
                // stale entry left behind by advance_past
                continue;
            }
            self.cursors[slot] = index + 1;
            self.push_cursor(slot);
            if key == u64::MAX {
                // never-executed entry; nothing to analyze
                continue;
            }
            return Some(EventId::new(RoutineId::new(routine), index));
        }
        None
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        event::{Event, EventKind, ForkEvent},
        ids::ObjectId,
        trace::Trace,
    };

    use super::*;

    fn marker(routine: u32, index: u32, t_pre: u64, t_post: u64) -> Event {
        Event::new(
            RoutineId::new(routine),
            index,
            t_pre,
            t_post,
            Arc::from("x.go"),
            1,
            EventKind::New(crate::event::NewEvent { object: ObjectId::new(1) }),
        )
    }

    fn fork(routine: u32, index: u32, t: u64, child: u32) -> Event {
        Event::new(
            RoutineId::new(routine),
            index,
            t,
            t,
            Arc::from("x.go"),
            1,
            EventKind::Fork(ForkEvent { child: RoutineId::new(child) }),
        )
    }

    fn ids(trace: &Trace) -> Vec<(u32, u32)> {
        trace.schedule().map(|id| (id.routine.as_u32(), id.index)).collect()
    }

    #[test]
    fn interleaves_routines_by_t_sort() {
        let trace = Trace::from_streams(vec![
            vec![fork(1, 0, 1, 2), marker(1, 1, 5, 6), marker(1, 2, 8, 9)],
            vec![marker(2, 0, 2, 3), marker(2, 1, 6, 7)],
        ])
        .unwrap();
        assert_eq!(ids(&trace), vec![(1, 0), (2, 0), (1, 1), (2, 1), (1, 2)]);
    }

    #[test]
    fn blocked_events_sort_by_enter_time() {
        let trace = Trace::from_streams(vec![
            vec![fork(1, 0, 1, 2), marker(1, 1, 9, 10)],
            // blocked forever at t=4: must come before the t=10 event
            vec![marker(2, 0, 4, 0)],
        ])
        .unwrap();
        assert_eq!(ids(&trace), vec![(1, 0), (2, 0), (1, 1)]);
    }

    #[test]
    fn advance_past_suppresses_partner() {
        let trace = Trace::from_streams(vec![
            vec![fork(1, 0, 1, 2), marker(1, 1, 5, 6)],
            vec![marker(2, 0, 7, 8)],
        ])
        .unwrap();
        let mut schedule = trace.schedule();
        assert_eq!(schedule.next(), Some(EventId::new(RoutineId::new(1), 0)));
        // pretend (1,1) was analyzed as a partner of some other event
        schedule.advance_past(EventId::new(RoutineId::new(1), 1));
        assert_eq!(schedule.next(), Some(EventId::new(RoutineId::new(2), 0)));
        assert_eq!(schedule.next(), None);
    }

    #[test]
    fn never_executed_entries_are_skipped() {
        let trace = Trace::from_streams(vec![vec![marker(1, 0, 3, 4), marker(1, 1, 0, 0)]]).unwrap();
        assert_eq!(ids(&trace), vec![(1, 0)]);
    }
}
