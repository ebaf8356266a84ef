use std::collections::{HashMap, VecDeque};

use skein_core::{EventId, ObjectId, RoutineId, VectorClock};

// CLOCK PAIR
// ================================================================================================

/// A strong and a weak clock snapshot taken together.
#[derive(Clone, Debug)]
pub struct ClockPair {
    pub vc: VectorClock,
    pub wvc: VectorClock,
}

impl ClockPair {
    pub fn zero(num_routines: usize) -> Self {
        Self { vc: VectorClock::new(num_routines), wvc: VectorClock::new(num_routines) }
    }
}

/// A clock snapshot attributed to the event that produced it.
#[derive(Clone, Debug)]
pub struct Stamp {
    pub event: EventId,
    pub clocks: ClockPair,
}

/// Accumulated release knowledge for a mutex: the merged clocks plus every event that
/// contributed, so acquires can order themselves after each of them.
#[derive(Clone, Debug)]
pub struct ReleaseSet {
    pub events: Vec<EventId>,
    pub clocks: ClockPair,
}

impl ReleaseSet {
    pub fn single(stamp: Stamp) -> Self {
        Self { events: vec![stamp.event], clocks: stamp.clocks }
    }

    /// Folds another release into the set (max-merge of clocks).
    pub fn merge(&mut self, stamp: Stamp) {
        self.clocks.vc.merge(&stamp.clocks.vc);
        self.clocks.wvc.merge(&stamp.clocks.wvc);
        self.events.push(stamp.event);
    }
}

// CHANNEL BUFFER
// ================================================================================================

/// Model of one buffered channel's slots.
///
/// Slots shift down on receive; a vacated slot keeps the clocks of the sender whose message it
/// last held, so a later send filling the same position can order itself after that sender.
#[derive(Clone, Debug)]
pub struct ChannelBuffer {
    pub capacity: usize,
    pub slots: Vec<BufferSlot>,
}

#[derive(Clone, Debug, Default)]
pub struct BufferSlot {
    pub occupied: bool,
    pub sender: Option<Stamp>,
}

impl ChannelBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, slots: Vec::new() }
    }

    /// Number of currently occupied slots.
    pub fn occupancy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.occupied).count()
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() >= self.capacity
    }

    /// Returns the slot at the given index, growing the lazy slot vector up to capacity.
    pub fn slot_mut(&mut self, index: usize) -> &mut BufferSlot {
        debug_assert!(index < self.capacity);
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, BufferSlot::default);
        }
        &mut self.slots[index]
    }

    /// Removes the front slot and shifts the rest down. The vacated back slot keeps the popped
    /// sender's clocks but is marked free.
    pub fn pop_front(&mut self) -> Option<Stamp> {
        if self.slots.first().is_none_or(|slot| !slot.occupied) {
            return None;
        }
        let front = self.slots.remove(0);
        self.slots.push(BufferSlot { occupied: false, sender: front.sender.clone() });
        front.sender
    }
}

// HB STATE
// ================================================================================================

/// All keyed shared state the happens-before update rules read and write.
///
/// One instance per analysis run, passed explicitly to every rule; nothing here is global. Only
/// the dispatcher thread touches it.
#[derive(Debug)]
pub struct HbState {
    /// Current strong clock per routine (index 0 unused).
    pub clocks: Vec<VectorClock>,
    /// Current weak clock per routine.
    pub weak_clocks: Vec<VectorClock>,
    /// Last write-release (unlock) per mutex.
    pub rel_w: HashMap<ObjectId, Stamp>,
    /// Read-releases (runlocks) since the last write-release, merged.
    pub rel_r: HashMap<ObjectId, ReleaseSet>,
    /// Last add/done per wait-group.
    pub last_change_wg: HashMap<ObjectId, Stamp>,
    /// FIFO queue of blocked cond waiters per conditional variable.
    pub currently_waiting: HashMap<ObjectId, VecDeque<EventId>>,
    /// The successful once execution per once object.
    pub o_suc: HashMap<ObjectId, Stamp>,
    /// Last store/add/and/or/swap/compswap per atomic variable.
    pub last_atomic_writer: HashMap<ObjectId, Stamp>,
    /// Per-routine, per-channel last send, for FIFO edges.
    pub most_recent_send: Vec<HashMap<ObjectId, Stamp>>,
    /// Per-routine, per-channel last receive, for FIFO edges.
    pub most_recent_recv: Vec<HashMap<ObjectId, Stamp>>,
    /// The close event per channel, if the channel was closed.
    pub close_data: HashMap<ObjectId, Stamp>,
    /// Buffered-channel slot models, created lazily.
    pub buffers: HashMap<ObjectId, ChannelBuffer>,
    /// Sends held back because the buffer model was full.
    pub hold_send: VecDeque<EventId>,
    /// Receives held back because the buffer model was empty.
    pub hold_recv: VecDeque<EventId>,
    /// Receives held back because their op id outruns the highest send op id seen.
    pub waiting_recv: VecDeque<EventId>,
    /// Highest send op id observed per channel.
    pub max_op_id: HashMap<ObjectId, u64>,
}

impl HbState {
    pub fn new(num_routines: usize) -> Self {
        // clocks start at zero; a routine's own component advances before each event's clock is
        // cached, so an event's own component equals its 1-based stream position
        let clocks = vec![VectorClock::new(num_routines); num_routines + 1];
        let weak_clocks = clocks.clone();
        Self {
            clocks,
            weak_clocks,
            rel_w: HashMap::new(),
            rel_r: HashMap::new(),
            last_change_wg: HashMap::new(),
            currently_waiting: HashMap::new(),
            o_suc: HashMap::new(),
            last_atomic_writer: HashMap::new(),
            most_recent_send: vec![HashMap::new(); num_routines + 1],
            most_recent_recv: vec![HashMap::new(); num_routines + 1],
            close_data: HashMap::new(),
            buffers: HashMap::new(),
            hold_send: VecDeque::new(),
            hold_recv: VecDeque::new(),
            waiting_recv: VecDeque::new(),
            max_op_id: HashMap::new(),
        }
    }

    pub fn num_routines(&self) -> usize {
        self.clocks.len() - 1
    }

    /// Snapshot of a routine's current clocks.
    pub fn snapshot(&self, routine: RoutineId) -> ClockPair {
        ClockPair {
            vc: self.clocks[routine.as_usize()].clone(),
            wvc: self.weak_clocks[routine.as_usize()].clone(),
        }
    }

    /// Advances the routine's own components; runs before an event's clock is cached.
    pub fn tick(&mut self, routine: RoutineId) {
        self.clocks[routine.as_usize()].inc(routine);
        self.weak_clocks[routine.as_usize()].inc(routine);
    }

    pub fn buffer_mut(&mut self, object: ObjectId, capacity: usize) -> &mut ChannelBuffer {
        self.buffers.entry(object).or_insert_with(|| ChannelBuffer::new(capacity))
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_keeps_popped_sender_in_vacated_slot() {
        let mut buffer = ChannelBuffer::new(1);
        let stamp = Stamp {
            event: EventId::new(RoutineId::new(1), 0),
            clocks: ClockPair::zero(2),
        };
        let slot = buffer.slot_mut(0);
        slot.occupied = true;
        slot.sender = Some(stamp);

        let popped = buffer.pop_front().expect("front occupied");
        assert_eq!(popped.event.index, 0);
        assert_eq!(buffer.occupancy(), 0);
        // the vacated slot remembers the sender for capacity ordering
        assert!(buffer.slots[0].sender.is_some());
        assert!(!buffer.slots[0].occupied);
    }

    #[test]
    fn ticking_advances_only_the_own_component() {
        let mut state = HbState::new(3);
        state.tick(RoutineId::new(2));
        state.tick(RoutineId::new(2));
        assert_eq!(state.clocks[2].get(RoutineId::new(2)), 2);
        assert_eq!(state.clocks[2].get(RoutineId::new(1)), 0);
        assert_eq!(state.weak_clocks[2].get(RoutineId::new(2)), 2);
    }
}
