use core::fmt::{self, Display};

use crate::{
    clock::VectorClock,
    ids::{EventId, ObjectId, RoutineId},
};

// EVENT KIND
// ================================================================================================

/// Tagged sum of every operation kind a trace can record.
///
/// Cross-references inside payloads ([ChannelEvent::partner], [ForkEvent::child]) are non-owning
/// back-references resolved by stable identifier during parsing and never mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// The routine spawned a new routine.
    Fork(ForkEvent),
    /// The routine ran to completion.
    RoutineEnd,
    /// A primitive instance was created.
    New(NewEvent),
    /// Marker emitted by the replay runtime; never produced by the trace parser.
    Replay(ReplayEvent),
    /// An atomic memory operation.
    Atomic(AtomicEvent),
    /// A channel send, receive, or close.
    Channel(ChannelEvent),
    /// A select over channel cases, possibly with a default case.
    Select(SelectEvent),
    /// A mutex operation, including the rw and try variants.
    Mutex(MutexEvent),
    /// A conditional-variable operation.
    Cond(CondEvent),
    /// A wait-group counter change or wait.
    Wait(WaitEvent),
    /// A once execution attempt.
    Once(OnceEvent),
}

impl EventKind {
    /// Returns the id of the primitive instance this operation acts on, if any.
    ///
    /// For forks this is the id of the new routine expressed as an object id; routine ends and
    /// replay markers have no object. For a select this is the select's own id; the channels the
    /// cases touch are on the case shells.
    pub fn object(&self) -> Option<ObjectId> {
        match self {
            Self::Fork(fork) => Some(ObjectId::new(fork.child.as_u32() as u64)),
            Self::RoutineEnd | Self::Replay(_) => None,
            Self::Select(select) => Some(select.object),
            Self::New(new) => Some(new.object),
            Self::Atomic(atomic) => Some(atomic.object),
            Self::Channel(channel) => Some(channel.object),
            Self::Mutex(mutex) => Some(mutex.object),
            Self::Cond(cond) => Some(cond.object),
            Self::Wait(wait) => Some(wait.object),
            Self::Once(once) => Some(once.object),
        }
    }

    /// Returns a short lowercase label for the operation, used in findings and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fork(_) => "fork",
            Self::RoutineEnd => "end",
            Self::New(_) => "new",
            Self::Replay(_) => "replay",
            Self::Atomic(_) => "atomic",
            Self::Channel(channel) => match channel.op {
                ChannelOp::Send => "send",
                ChannelOp::Recv => "recv",
                ChannelOp::Close => "close",
            },
            Self::Select(_) => "select",
            Self::Mutex(_) => "mutex",
            Self::Cond(_) => "cond",
            Self::Wait(_) => "wait",
            Self::Once(_) => "once",
        }
    }
}

// FORK / END / NEW / REPLAY
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ForkEvent {
    /// Id of the spawned routine; equals the fork's object id.
    pub child: RoutineId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NewEvent {
    pub object: ObjectId,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReplayEvent {
    /// Runtime-specific marker code.
    pub code: u32,
}

// ATOMIC
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AtomicOp {
    Load,
    Store,
    Add,
    Swap,
    CompSwap,
    And,
    Or,
}

impl AtomicOp {
    /// Returns true if the operation reads the atomic variable.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::Load | Self::Swap | Self::CompSwap)
    }

    /// Returns true if the operation writes the atomic variable.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Load)
    }
}

impl Display for AtomicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Store => f.write_str("store"),
            Self::Add => f.write_str("add"),
            Self::Swap => f.write_str("swap"),
            Self::CompSwap => f.write_str("compswap"),
            Self::And => f.write_str("and"),
            Self::Or => f.write_str("or"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AtomicEvent {
    pub object: ObjectId,
    pub op: AtomicOp,
}

// CHANNEL
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelOp {
    Send,
    Recv,
    Close,
}

impl Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Recv => f.write_str("recv"),
            Self::Close => f.write_str("close"),
        }
    }
}

/// A channel operation, either standing alone in a routine stream or embedded as a select case
/// shell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelEvent {
    pub object: ObjectId,
    pub op: ChannelOp,
    /// True if the channel was already closed when the operation executed.
    pub closed: bool,
    /// Per-channel operation sequence number; reconstructs FIFO order on buffered channels.
    pub op_id: u64,
    /// Buffer capacity; 0 for unbuffered channels.
    pub q_size: u32,
    /// The matched communication partner, resolved during parsing. For an operation chosen inside
    /// a select, the partner id points at the enclosing select event.
    pub partner: Option<EventId>,
}

impl ChannelEvent {
    /// Returns true if the channel has no buffer.
    pub fn is_unbuffered(&self) -> bool {
        self.q_size == 0
    }
}

// SELECT
// ================================================================================================

/// One case of a select: an embedded channel event shell plus analysis caches.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectCase {
    pub channel: ChannelEvent,
    /// True for the case the scheduler chose.
    pub chosen: bool,
    /// Clock of the enclosing select, propagated by the happens-before engine so scenario checks
    /// can query cases directly.
    pub vc: Option<VectorClock>,
    pub wvc: Option<VectorClock>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SelectEvent {
    pub object: ObjectId,
    /// Cases in declaration order; the default case, if any, is not listed here.
    pub cases: Vec<SelectCase>,
    /// Index of the chosen case, or -1 if the default case ran.
    pub chosen_index: i32,
    pub has_default: bool,
}

impl SelectEvent {
    /// Returns the chosen case, or `None` if the default ran or the select never completed.
    pub fn chosen_case(&self) -> Option<&SelectCase> {
        usize::try_from(self.chosen_index).ok().and_then(|idx| self.cases.get(idx))
    }

    pub fn chosen_case_mut(&mut self) -> Option<&mut SelectCase> {
        usize::try_from(self.chosen_index).ok().and_then(|idx| self.cases.get_mut(idx))
    }
}

// MUTEX
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MutexOp {
    Lock,
    Unlock,
    RLock,
    RUnlock,
    TryLock,
    TryRLock,
}

impl MutexOp {
    /// Returns true for operations that (attempt to) acquire the mutex.
    pub fn is_acquire(&self) -> bool {
        matches!(self, Self::Lock | Self::RLock | Self::TryLock | Self::TryRLock)
    }

    /// Returns true for operations that release the mutex.
    pub fn is_release(&self) -> bool {
        matches!(self, Self::Unlock | Self::RUnlock)
    }

    /// Returns true for the reader-side operations of an rw mutex.
    pub fn is_read(&self) -> bool {
        matches!(self, Self::RLock | Self::RUnlock | Self::TryRLock)
    }

    /// Returns true for the try variants, which carry a success flag.
    pub fn is_try(&self) -> bool {
        matches!(self, Self::TryLock | Self::TryRLock)
    }
}

impl Display for MutexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lock => f.write_str("lock"),
            Self::Unlock => f.write_str("unlock"),
            Self::RLock => f.write_str("rlock"),
            Self::RUnlock => f.write_str("runlock"),
            Self::TryLock => f.write_str("trylock"),
            Self::TryRLock => f.write_str("tryrlock"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MutexEvent {
    pub object: ObjectId,
    pub op: MutexOp,
    /// Always true for the non-try variants.
    pub success: bool,
}

impl MutexEvent {
    /// Returns true if the event actually acquired the mutex.
    pub fn acquired(&self) -> bool {
        self.op.is_acquire() && self.success
    }
}

// COND
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CondOp {
    Wait,
    Signal,
    Broadcast,
}

impl Display for CondOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wait => f.write_str("wait"),
            Self::Signal => f.write_str("signal"),
            Self::Broadcast => f.write_str("broadcast"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CondEvent {
    pub object: ObjectId,
    pub op: CondOp,
}

// WAIT GROUP
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOp {
    /// A counter change: positive delta for add, -1 for done.
    Change,
    /// A wait until the counter reaches zero.
    Wait,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitEvent {
    pub object: ObjectId,
    pub op: WaitOp,
    /// Value by which the counter changes: positive for add, -1 for done, 0 for wait.
    pub delta: i64,
    /// Counter value after the operation.
    pub val: i64,
}

impl WaitEvent {
    pub fn is_add(&self) -> bool {
        self.op == WaitOp::Change && self.delta > 0
    }

    pub fn is_done(&self) -> bool {
        self.op == WaitOp::Change && self.delta < 0
    }
}

// ONCE
// ================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OnceEvent {
    pub object: ObjectId,
    /// True for the single attempt that ran the guarded function.
    pub success: bool,
}
