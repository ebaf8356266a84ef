use skein_core::EventId;

use crate::constraint::ScheduleChain;

// MUTATION
// ================================================================================================

/// One schedule mutation the runtime is asked to realize in a re-execution.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Mutation {
    /// Force the select to take a different case.
    FlipSelect { select: EventId, chosen: i32 },
    /// Delay the operation until after the n-th further occurrence of a concurrent counterpart.
    Delay { event: EventId, past_occurrence: u32 },
    /// Schedule the chained events in exactly this order.
    Reorder { chain: ScheduleChain },
}

impl Mutation {
    /// The chain of scheduling points the runtime must honor for this mutation.
    pub fn chain(&self) -> ScheduleChain {
        match self {
            Self::FlipSelect { select, .. } => ScheduleChain::single(*select),
            Self::Delay { event, .. } => ScheduleChain::single(*event),
            Self::Reorder { chain } => chain.clone(),
        }
    }
}
