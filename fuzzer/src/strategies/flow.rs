//! Flow fuzzing: delay operations that have concurrent counterparts, so a re-execution observes
//! the other resolution of the race.

use skein_core::{
    Trace,
    event::{ChannelOp, EventKind},
};

use crate::{config::FuzzerConfig, mutation::Mutation};

pub fn mutations(trace: &Trace, cfg: &FuzzerConfig) -> Vec<Mutation> {
    let mut out = Vec::new();
    for event in trace.events() {
        if out.len() >= cfg.max_constraints {
            break;
        }
        if event.vc.is_none() || event.t_post() == 0 {
            continue;
        }
        if event.num_concurrent.unwrap_or(0) == 0 {
            continue;
        }
        let eligible = match &event.kind {
            EventKind::Once(_) => true,
            EventKind::Mutex(mutex) => mutex.acquired(),
            EventKind::Channel(ch) => matches!(ch.op, ChannelOp::Send | ChannelOp::Recv),
            _ => false,
        };
        if eligible {
            out.push(Mutation::Delay { event: event.id(), past_occurrence: 1 });
        }
    }
    out
}
