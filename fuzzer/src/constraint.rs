use std::fmt::Write;

use skein_core::{EventId, Trace};

// SCHEDULE CHAIN
// ================================================================================================

/// A constraint: a short ordered chain of trace events that a re-execution should schedule in
/// exactly this order to expose a suspected bug.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct ScheduleChain {
    pub events: Vec<EventId>,
}

impl ScheduleChain {
    pub fn new(events: Vec<EventId>) -> Self {
        Self { events }
    }

    pub fn single(event: EventId) -> Self {
        Self { events: vec![event] }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// REPLAY DIRECTIVES
// ================================================================================================

/// Renders the replay-directives file for a chain.
///
/// The first line is the partial-replay activation time (0 replays from the start); each
/// following line pins one scheduling point as `routine:file:line,tSort,counter`, where the
/// counter disambiguates repeated hits of the same source position within the routine.
pub fn render_replay(trace: &Trace, chain: &ScheduleChain, start_time: u64) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{start_time}");
    for &id in &chain.events {
        let event = trace.event(id);
        let counter = trace
            .routine(id.routine)
            .iter()
            .take(id.index as usize)
            .filter(|other| other.file() == event.file() && other.line() == event.line())
            .count()
            + 1;
        let _ = writeln!(
            out,
            "{}:{}:{},{},{}",
            id.routine,
            event.file(),
            event.line(),
            event.t_sort(),
            counter,
        );
    }
    out
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use skein_test_utils::TraceBuilder;

    use super::*;

    #[test]
    fn replay_file_lists_chain_in_order() {
        let mut builder = TraceBuilder::new(2);
        builder.fork(1, 2);
        let (send, recv) = builder.send_recv(1, 2, 9, 1);
        builder.end(1);
        builder.end(2);
        let trace = builder.build();

        let rendered =
            render_replay(&trace, &ScheduleChain::new(vec![send, recv]), 0);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "0");
        assert!(lines[1].starts_with("1:test.go:"), "unexpected line {}", lines[1]);
        assert!(lines[2].starts_with("2:test.go:"), "unexpected line {}", lines[2]);
        // every point carries sort key and occurrence counter
        assert!(lines[1].split(',').count() == 3);
    }
}
