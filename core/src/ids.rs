use core::fmt::{self, Display};

// ROUTINE ID
// ================================================================================================

/// Identifier of a routine (a lightweight thread of control) within a trace.
///
/// Routine ids are 1-based: id 1 is the main routine, and every other routine is introduced by a
/// fork event whose object id equals the new routine's id.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RoutineId(u32);

impl RoutineId {
    /// Returns the id of the main routine.
    pub const fn main() -> Self {
        Self(1)
    }

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    /// Returns the id as an index usable with 1-based per-routine storage.
    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for RoutineId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<RoutineId> for u32 {
    fn from(routine: RoutineId) -> Self {
        routine.0
    }
}

impl From<RoutineId> for usize {
    fn from(routine: RoutineId) -> Self {
        routine.0 as usize
    }
}

impl Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// OBJECT ID
// ================================================================================================

/// Identifier of a primitive instance (channel, mutex, wait-group, cond, once, atomic variable).
///
/// Object ids are assigned by the recording runtime and are stable across the whole trace. For a
/// fork event, the object id equals the id of the new routine.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ObjectId> for u64 {
    fn from(object: ObjectId) -> Self {
        object.0
    }
}

impl Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// EVENT ID
// ================================================================================================

/// Stable identifier of an event: its routine and its position within that routine's stream.
///
/// All cross-references between events (channel partner, select cases, fork to child routine) are
/// expressed as [EventId] values resolved during parsing and never mutated afterwards.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EventId {
    pub routine: RoutineId,
    pub index: u32,
}

impl EventId {
    pub const fn new(routine: RoutineId, index: u32) -> Self {
        Self { routine, index }
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.routine, self.index)
    }
}
