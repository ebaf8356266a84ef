use skein_core::{ClockRelation, Event, Trace};

pub mod flow;
pub mod gfuzz;
pub mod gopie;

/// True if the events are unordered under the strong relation of their cached clocks.
pub(crate) fn concurrent(a: &Event, b: &Event) -> bool {
    a.clock().relation(b.clock()) == ClockRelation::Concurrent
}

/// Pool of events the chain strategies draw from: analyzed, completed, and with at least one
/// concurrent counterpart.
pub(crate) fn mutation_pool(trace: &Trace) -> Vec<&Event> {
    trace
        .events()
        .filter(|event| event.vc.is_some() && event.t_post() != 0)
        .filter(|event| event.num_concurrent.unwrap_or(0) > 0)
        .collect()
}
