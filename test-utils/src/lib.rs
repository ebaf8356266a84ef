//! Programmatic trace construction for tests.
//!
//! The builder hands out monotonically increasing timestamps, so a test describes only the
//! interleaving it wants: the order of builder calls is the order of the recorded schedule.

use std::sync::Arc;

use skein_core::{
    Event, EventId, ObjectId, RoutineId, Trace,
    event::{
        AtomicEvent, AtomicOp, ChannelEvent, ChannelOp, CondEvent, CondOp, EventKind, ForkEvent,
        MutexEvent, MutexOp, NewEvent, OnceEvent, SelectCase, SelectEvent, WaitEvent, WaitOp,
    },
};

// TRACE BUILDER
// ================================================================================================

/// Builds an in-memory trace one operation at a time.
#[derive(Debug)]
pub struct TraceBuilder {
    streams: Vec<Vec<Event>>,
    now: u64,
    file: Arc<str>,
}

/// Description of one select case for [TraceBuilder::select].
#[derive(Clone, Copy, Debug)]
pub struct CaseSpec {
    pub channel: u64,
    pub op: ChannelOp,
    pub q_size: u32,
    pub op_id: u64,
}

impl TraceBuilder {
    pub fn new(num_routines: usize) -> Self {
        Self {
            streams: vec![Vec::new(); num_routines],
            now: 0,
            file: Arc::from("test.go"),
        }
    }

    /// Finishes the builder; panics on schema violations, which in tests are bugs in the test.
    pub fn build(self) -> Trace {
        Trace::from_streams(self.streams).expect("test trace violates trace schema")
    }

    fn tick(&mut self) -> u64 {
        self.now += 1;
        self.now
    }

    fn push(&mut self, routine: u32, t_pre: u64, t_post: u64, kind: EventKind) -> EventId {
        let stream = &mut self.streams[routine as usize - 1];
        let index = stream.len() as u32;
        let line = 10 * routine + index;
        stream.push(Event::new(
            RoutineId::new(routine),
            index,
            t_pre,
            t_post,
            self.file.clone(),
            line,
            kind,
        ));
        EventId::new(RoutineId::new(routine), index)
    }

    fn push_quick(&mut self, routine: u32, kind: EventKind) -> EventId {
        let t_pre = self.tick();
        let t_post = self.tick();
        self.push(routine, t_pre, t_post, kind)
    }

    // ROUTINE STRUCTURE
    // --------------------------------------------------------------------------------------------

    pub fn fork(&mut self, routine: u32, child: u32) -> EventId {
        let t = self.tick();
        self.push(routine, t, t, EventKind::Fork(ForkEvent { child: RoutineId::new(child) }))
    }

    pub fn end(&mut self, routine: u32) -> EventId {
        let t = self.tick();
        self.push(routine, t, t, EventKind::RoutineEnd)
    }

    pub fn new_object(&mut self, routine: u32, object: u64) -> EventId {
        let t = self.tick();
        self.push(routine, t, t, EventKind::New(NewEvent { object: ObjectId::new(object) }))
    }

    // CHANNELS
    // --------------------------------------------------------------------------------------------

    fn channel_kind(
        object: u64,
        op: ChannelOp,
        closed: bool,
        op_id: u64,
        q_size: u32,
    ) -> EventKind {
        EventKind::Channel(ChannelEvent {
            object: ObjectId::new(object),
            op,
            closed,
            op_id,
            q_size,
            partner: None,
        })
    }

    /// A completed unbuffered communication; both halves share the completion moment.
    pub fn send_recv(
        &mut self,
        sender: u32,
        receiver: u32,
        channel: u64,
        op_id: u64,
    ) -> (EventId, EventId) {
        let send_pre = self.tick();
        let recv_pre = self.tick();
        let shared_post = self.tick();
        let send = self.push(
            sender,
            send_pre,
            shared_post,
            Self::channel_kind(channel, ChannelOp::Send, false, op_id, 0),
        );
        let recv = self.push(
            receiver,
            recv_pre,
            shared_post,
            Self::channel_kind(channel, ChannelOp::Recv, false, op_id, 0),
        );
        (send, recv)
    }

    pub fn send_buffered(&mut self, routine: u32, channel: u64, q_size: u32, op_id: u64) -> EventId {
        let kind = Self::channel_kind(channel, ChannelOp::Send, false, op_id, q_size);
        self.push_quick(routine, kind)
    }

    pub fn recv_buffered(&mut self, routine: u32, channel: u64, q_size: u32, op_id: u64) -> EventId {
        let kind = Self::channel_kind(channel, ChannelOp::Recv, false, op_id, q_size);
        self.push_quick(routine, kind)
    }

    /// A buffered receive whose record appears before the matching send in the interleaving,
    /// as replayed traces can order them.
    pub fn recv_buffered_at(
        &mut self,
        routine: u32,
        channel: u64,
        q_size: u32,
        op_id: u64,
        t_pre: u64,
        t_post: u64,
    ) -> EventId {
        self.push(
            routine,
            t_pre,
            t_post,
            Self::channel_kind(channel, ChannelOp::Recv, false, op_id, q_size),
        )
    }

    pub fn close(&mut self, routine: u32, channel: u64) -> EventId {
        self.push_quick(routine, Self::channel_kind(channel, ChannelOp::Close, false, 0, 0))
    }

    pub fn close_closed(&mut self, routine: u32, channel: u64) -> EventId {
        self.push_quick(routine, Self::channel_kind(channel, ChannelOp::Close, true, 0, 0))
    }

    /// A send that observed the channel already closed.
    pub fn send_on_closed(&mut self, routine: u32, channel: u64, q_size: u32) -> EventId {
        self.push_quick(routine, Self::channel_kind(channel, ChannelOp::Send, true, 0, q_size))
    }

    pub fn recv_on_closed(&mut self, routine: u32, channel: u64, q_size: u32) -> EventId {
        self.push_quick(routine, Self::channel_kind(channel, ChannelOp::Recv, true, 0, q_size))
    }

    /// A channel operation that blocked forever.
    pub fn channel_leak(
        &mut self,
        routine: u32,
        channel: u64,
        op: ChannelOp,
        q_size: u32,
        op_id: u64,
    ) -> EventId {
        let t_pre = self.tick();
        self.push(routine, t_pre, 0, Self::channel_kind(channel, op, false, op_id, q_size))
    }

    // SELECT
    // --------------------------------------------------------------------------------------------

    /// A select; `chosen` is the case index or -1 for the default, `completed` controls whether
    /// the select ever finished.
    pub fn select(
        &mut self,
        routine: u32,
        object: u64,
        cases: &[CaseSpec],
        chosen: i32,
        has_default: bool,
        completed: bool,
    ) -> EventId {
        let t_pre = self.tick();
        let t_post = if completed { self.tick() } else { 0 };
        let cases = cases
            .iter()
            .enumerate()
            .map(|(index, spec)| SelectCase {
                channel: ChannelEvent {
                    object: ObjectId::new(spec.channel),
                    op: spec.op,
                    closed: false,
                    op_id: spec.op_id,
                    q_size: spec.q_size,
                    partner: None,
                },
                chosen: index as i32 == chosen,
                vc: None,
                wvc: None,
            })
            .collect();
        self.push(
            routine,
            t_pre,
            t_post,
            EventKind::Select(SelectEvent {
                object: ObjectId::new(object),
                cases,
                chosen_index: chosen,
                has_default,
            }),
        )
    }

    // MUTEXES
    // --------------------------------------------------------------------------------------------

    pub fn mutex(&mut self, routine: u32, object: u64, op: MutexOp, success: bool) -> EventId {
        self.push_quick(
            routine,
            EventKind::Mutex(MutexEvent { object: ObjectId::new(object), op, success }),
        )
    }

    pub fn lock(&mut self, routine: u32, object: u64) -> EventId {
        self.mutex(routine, object, MutexOp::Lock, true)
    }

    pub fn unlock(&mut self, routine: u32, object: u64) -> EventId {
        self.mutex(routine, object, MutexOp::Unlock, true)
    }

    pub fn rlock(&mut self, routine: u32, object: u64) -> EventId {
        self.mutex(routine, object, MutexOp::RLock, true)
    }

    pub fn runlock(&mut self, routine: u32, object: u64) -> EventId {
        self.mutex(routine, object, MutexOp::RUnlock, true)
    }

    pub fn mutex_leak(&mut self, routine: u32, object: u64, op: MutexOp) -> EventId {
        let t_pre = self.tick();
        self.push(
            routine,
            t_pre,
            0,
            EventKind::Mutex(MutexEvent { object: ObjectId::new(object), op, success: false }),
        )
    }

    // WAIT GROUPS
    // --------------------------------------------------------------------------------------------

    pub fn wg_add(&mut self, routine: u32, object: u64, delta: i64, val: i64) -> EventId {
        self.push_quick(
            routine,
            EventKind::Wait(WaitEvent {
                object: ObjectId::new(object),
                op: WaitOp::Change,
                delta,
                val,
            }),
        )
    }

    pub fn wg_done(&mut self, routine: u32, object: u64, val: i64) -> EventId {
        self.push_quick(
            routine,
            EventKind::Wait(WaitEvent {
                object: ObjectId::new(object),
                op: WaitOp::Change,
                delta: -1,
                val,
            }),
        )
    }

    pub fn wg_wait(&mut self, routine: u32, object: u64) -> EventId {
        self.push_quick(
            routine,
            EventKind::Wait(WaitEvent {
                object: ObjectId::new(object),
                op: WaitOp::Wait,
                delta: 0,
                val: 0,
            }),
        )
    }

    pub fn wg_wait_leak(&mut self, routine: u32, object: u64) -> EventId {
        let t_pre = self.tick();
        self.push(
            routine,
            t_pre,
            0,
            EventKind::Wait(WaitEvent {
                object: ObjectId::new(object),
                op: WaitOp::Wait,
                delta: 0,
                val: 0,
            }),
        )
    }

    // CONDITIONAL VARIABLES
    // --------------------------------------------------------------------------------------------

    pub fn cond(&mut self, routine: u32, object: u64, op: CondOp) -> EventId {
        self.push_quick(
            routine,
            EventKind::Cond(CondEvent { object: ObjectId::new(object), op }),
        )
    }

    pub fn cond_wait_leak(&mut self, routine: u32, object: u64) -> EventId {
        let t_pre = self.tick();
        self.push(
            routine,
            t_pre,
            0,
            EventKind::Cond(CondEvent { object: ObjectId::new(object), op: CondOp::Wait }),
        )
    }

    // ONCE AND ATOMICS
    // --------------------------------------------------------------------------------------------

    pub fn once(&mut self, routine: u32, object: u64, success: bool) -> EventId {
        self.push_quick(
            routine,
            EventKind::Once(OnceEvent { object: ObjectId::new(object), success }),
        )
    }

    pub fn atomic(&mut self, routine: u32, object: u64, op: AtomicOp) -> EventId {
        let t = self.tick();
        self.push(
            routine,
            t,
            t,
            EventKind::Atomic(AtomicEvent { object: ObjectId::new(object), op }),
        )
    }
}
