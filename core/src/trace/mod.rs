use std::collections::HashMap;

use crate::{
    errors::SchemaError,
    event::{ChannelOp, Event, EventKind},
    ids::{EventId, ObjectId, RoutineId},
};

mod iter;
pub use iter::ScheduleIter;

mod parser;

// TRACE
// ================================================================================================

/// A recorded execution: one ordered event stream per routine.
///
/// The trace owns all event storage. Routine ids are 1-based; stream `r` lives at index `r - 1`.
/// Cross-references between events are [EventId] values that stay valid for the lifetime of the
/// trace, since analysis never deletes events.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trace {
    routines: Vec<Vec<Event>>,
}

impl Trace {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Builds a trace from per-routine streams, checks the structural invariants, and resolves
    /// unbuffered communication partners.
    pub fn from_streams(routines: Vec<Vec<Event>>) -> Result<Self, SchemaError> {
        let mut trace = Self { routines };
        trace.validate()?;
        trace.link_partners()?;
        Ok(trace)
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn num_routines(&self) -> usize {
        self.routines.len()
    }

    pub fn routine(&self, routine: RoutineId) -> &[Event] {
        &self.routines[routine.as_usize() - 1]
    }

    pub fn event(&self, id: EventId) -> &Event {
        &self.routines[id.routine.as_usize() - 1][id.index as usize]
    }

    pub fn event_mut(&mut self, id: EventId) -> &mut Event {
        &mut self.routines[id.routine.as_usize() - 1][id.index as usize]
    }

    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.routines
            .get(id.routine.as_usize().wrapping_sub(1))
            .and_then(|stream| stream.get(id.index as usize))
    }

    /// Iterates all events in routine order, then stream order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.routines.iter().flatten()
    }

    /// Total number of recorded events.
    pub fn num_events(&self) -> usize {
        self.routines.iter().map(Vec::len).sum()
    }

    /// Returns an iterator yielding event ids in global analysis order (§ trace model).
    pub fn schedule(&self) -> ScheduleIter {
        ScheduleIter::new(self)
    }

    // VALIDATION
    // --------------------------------------------------------------------------------------------

    /// Checks the structural invariants that link streams, timestamps, and forks.
    fn validate(&self) -> Result<(), SchemaError> {
        for (idx, stream) in self.routines.iter().enumerate() {
            let routine = RoutineId::new(idx as u32 + 1);
            let mut prev = 0u64;
            for event in stream {
                debug_assert_eq!(event.routine(), routine, "event filed under wrong stream");
                if event.t_pre() != 0 {
                    if event.t_pre() <= prev {
                        return Err(SchemaError::NonMonotonicTimestamps {
                            routine,
                            index: event.index(),
                            t_pre: event.t_pre(),
                            prev,
                        });
                    }
                    prev = event.t_pre();
                }
            }
        }

        let mut forks: HashMap<RoutineId, EventId> = HashMap::new();
        for event in self.events() {
            if let EventKind::Fork(fork) = &event.kind {
                if fork.child.as_usize() == 0 || fork.child.as_usize() > self.routines.len() {
                    return Err(SchemaError::ForkOutOfRange { at: event.id(), child: fork.child });
                }
                if let Some(first) = forks.insert(fork.child, event.id()) {
                    return Err(SchemaError::DuplicateFork {
                        routine: fork.child,
                        first,
                        second: event.id(),
                    });
                }
            }
        }
        for (idx, stream) in self.routines.iter().enumerate().skip(1) {
            let routine = RoutineId::new(idx as u32 + 1);
            if !stream.is_empty() && !forks.contains_key(&routine) {
                return Err(SchemaError::MissingFork(routine));
            }
        }
        Ok(())
    }

    // PARTNER RESOLUTION
    // --------------------------------------------------------------------------------------------

    /// Resolves the send/recv partner references on unbuffered channels.
    ///
    /// Every completed unbuffered send must pair with exactly one completed recv carrying the same
    /// operation id, and vice versa; receives on closed channels pair with the close instead and
    /// are exempt. An operation chosen inside a select participates under the select's event id.
    fn link_partners(&mut self) -> Result<(), SchemaError> {
        struct Site {
            at: EventId,
            op_id: u64,
        }

        let mut sends: HashMap<ObjectId, Vec<Site>> = HashMap::new();
        let mut recvs: HashMap<ObjectId, Vec<Site>> = HashMap::new();

        let mut record = |at: EventId, channel: &crate::event::ChannelEvent| {
            if !channel.is_unbuffered() || channel.closed {
                return;
            }
            let site = Site { at, op_id: channel.op_id };
            match channel.op {
                ChannelOp::Send => sends.entry(channel.object).or_default().push(site),
                ChannelOp::Recv => recvs.entry(channel.object).or_default().push(site),
                ChannelOp::Close => (),
            }
        };

        for event in self.events() {
            if event.t_post() == 0 {
                continue;
            }
            match &event.kind {
                EventKind::Channel(channel) => record(event.id(), channel),
                EventKind::Select(select) => {
                    if let Some(case) = select.chosen_case() {
                        record(event.id(), &case.channel);
                    }
                },
                _ => (),
            }
        }

        let mut pairs: Vec<(EventId, EventId)> = Vec::new();
        for (object, send_sites) in &mut sends {
            let mut recv_by_op: HashMap<u64, &Site> = HashMap::new();
            let recv_sites = recvs.remove(object).unwrap_or_default();
            for site in &recv_sites {
                recv_by_op.insert(site.op_id, site);
            }
            for send in send_sites.iter() {
                match recv_by_op.remove(&send.op_id) {
                    Some(recv) => pairs.push((send.at, recv.at)),
                    None => {
                        return Err(SchemaError::UnmatchedCommunication {
                            object: *object,
                            op: "send",
                            at: send.at,
                            op_id: send.op_id,
                        });
                    },
                }
            }
            if let Some(stray) = recv_by_op.into_values().next() {
                return Err(SchemaError::UnmatchedCommunication {
                    object: *object,
                    op: "recv",
                    at: stray.at,
                    op_id: stray.op_id,
                });
            }
        }
        if let Some((object, stray)) = recvs.iter().find(|(_, sites)| !sites.is_empty()) {
            return Err(SchemaError::UnmatchedCommunication {
                object: *object,
                op: "recv",
                at: stray[0].at,
                op_id: stray[0].op_id,
            });
        }

        for (send, recv) in pairs {
            self.set_partner(send, recv)?;
            self.set_partner(recv, send)?;
        }
        Ok(())
    }

    fn set_partner(&mut self, at: EventId, partner: EventId) -> Result<(), SchemaError> {
        if self.get(at).is_none() {
            return Err(SchemaError::DanglingReference(at));
        }
        match &mut self.event_mut(at).kind {
            EventKind::Channel(channel) => channel.partner = Some(partner),
            EventKind::Select(select) => {
                if let Some(case) = select.chosen_case_mut() {
                    case.channel.partner = Some(partner);
                }
            },
            _ => return Err(SchemaError::DanglingReference(at)),
        }
        Ok(())
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        assert_matches,
        event::{ChannelEvent, ForkEvent},
    };

    use super::*;

    fn channel_event(
        routine: u32,
        index: u32,
        t: u64,
        op: ChannelOp,
        object: u64,
        op_id: u64,
    ) -> Event {
        Event::new(
            RoutineId::new(routine),
            index,
            t,
            t + 1,
            Arc::from("chan.go"),
            7,
            EventKind::Channel(ChannelEvent {
                object: ObjectId::new(object),
                op,
                closed: false,
                op_id,
                q_size: 0,
                partner: None,
            }),
        )
    }

    fn fork_event(routine: u32, index: u32, t: u64, child: u32) -> Event {
        Event::new(
            RoutineId::new(routine),
            index,
            t,
            t,
            Arc::from("main.go"),
            3,
            EventKind::Fork(ForkEvent { child: RoutineId::new(child) }),
        )
    }

    #[test]
    fn partners_resolved_by_op_id() {
        let trace = Trace::from_streams(vec![
            vec![fork_event(1, 0, 1, 2), channel_event(1, 1, 10, ChannelOp::Send, 5, 1)],
            vec![channel_event(2, 0, 11, ChannelOp::Recv, 5, 1)],
        ])
        .unwrap();

        let send = trace.event(EventId::new(RoutineId::new(1), 1));
        assert_matches!(
            &send.kind,
            EventKind::Channel(ch) if ch.partner == Some(EventId::new(RoutineId::new(2), 0))
        );
    }

    #[test]
    fn unmatched_send_is_rejected() {
        let result =
            Trace::from_streams(vec![vec![channel_event(1, 0, 10, ChannelOp::Send, 5, 1)]]);
        assert_matches!(result, Err(SchemaError::UnmatchedCommunication { op: "send", .. }));
    }

    #[test]
    fn missing_fork_is_rejected() {
        let result = Trace::from_streams(vec![
            vec![],
            vec![channel_event(2, 0, 11, ChannelOp::Close, 5, 1)],
        ]);
        assert_matches!(result, Err(SchemaError::MissingFork(r)) if r == RoutineId::new(2));
    }

    #[test]
    fn timestamps_must_increase_within_a_routine() {
        let result = Trace::from_streams(vec![vec![
            channel_event(1, 0, 5, ChannelOp::Close, 5, 1),
            channel_event(1, 1, 5, ChannelOp::Close, 5, 2),
        ]]);
        assert_matches!(result, Err(SchemaError::NonMonotonicTimestamps { .. }));
    }
}
