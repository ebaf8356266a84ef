//! Selection fuzzing: flip the chosen case of selects, weighted toward cases that had a
//! feasible partner under happens-before.

use rand::{Rng, rngs::StdRng};
use skein_core::{
    Event, Trace,
    event::{ChannelOp, EventKind, SelectCase},
};

use crate::{config::FuzzerConfig, mutation::Mutation};

use super::concurrent;

pub fn mutations(trace: &Trace, cfg: &FuzzerConfig, rng: &mut StdRng) -> Vec<Mutation> {
    let mut out = Vec::new();
    for event in trace.events() {
        let EventKind::Select(select) = &event.kind else { continue };
        if event.vc.is_none() {
            continue;
        }
        if !rng.random_bool(cfg.flip_probability) {
            continue;
        }

        // flip targets: every other case, plus the default if one exists
        let mut candidates: Vec<(i32, u32)> = Vec::new();
        for (index, case) in select.cases.iter().enumerate() {
            if index as i32 == select.chosen_index {
                continue;
            }
            let weight = if has_feasible_partner(trace, event, case) { 3 } else { 1 };
            candidates.push((index as i32, weight));
        }
        if select.has_default && select.chosen_index != -1 {
            candidates.push((-1, 1));
        }
        let Some(chosen) = weighted_pick(&candidates, rng) else { continue };
        out.push(Mutation::FlipSelect { select: event.id(), chosen });
    }
    out
}

/// A case had a feasible partner if some operation of the complementary kind on the same channel
/// ran concurrently with the select.
fn has_feasible_partner(trace: &Trace, select_event: &Event, case: &SelectCase) -> bool {
    let want = match case.channel.op {
        ChannelOp::Send => ChannelOp::Recv,
        ChannelOp::Recv => ChannelOp::Send,
        ChannelOp::Close => return false,
    };
    trace.events().filter(|other| other.vc.is_some()).any(|other| {
        matches!(
            &other.kind,
            EventKind::Channel(ch) if ch.object == case.channel.object && ch.op == want
        ) && concurrent(select_event, other)
    })
}

fn weighted_pick(candidates: &[(i32, u32)], rng: &mut StdRng) -> Option<i32> {
    let total: u32 = candidates.iter().map(|(_, weight)| weight).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rng.random_range(0..total);
    for (value, weight) in candidates {
        if roll < *weight {
            return Some(*value);
        }
        roll -= weight;
    }
    None
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use skein_analyzer::{AnalyzerConfig, CancelFlag, analyze};
    use skein_test_utils::{CaseSpec, TraceBuilder};

    use crate::config::FuzzerConfig;

    use super::*;

    #[test]
    fn certain_flip_probability_mutates_every_select() {
        let mut builder = TraceBuilder::new(3);
        builder.fork(1, 2);
        builder.fork(1, 3);
        builder.select(
            1,
            50,
            &[
                CaseSpec { channel: 51, op: ChannelOp::Recv, q_size: 0, op_id: 3 },
                CaseSpec { channel: 52, op: ChannelOp::Recv, q_size: 0, op_id: 4 },
            ],
            -1,
            true,
            true,
        );
        builder.send_recv(2, 3, 51, 1);
        builder.end(1);
        builder.end(2);
        builder.end(3);
        let mut trace = builder.build();
        analyze(&mut trace, &AnalyzerConfig::default(), &CancelFlag::new()).unwrap();

        let cfg = FuzzerConfig { flip_probability: 1.0, ..FuzzerConfig::default() };
        let mut rng = StdRng::seed_from_u64(1);
        let mutations = mutations(&trace, &cfg, &mut rng);
        assert_eq!(mutations.len(), 1, "the one select must flip");
        let Mutation::FlipSelect { chosen, .. } = &mutations[0] else {
            panic!("expected a select flip")
        };
        // the default was taken, so the flip must pick one of the channel cases
        assert!(*chosen == 0 || *chosen == 1);
    }

    #[test]
    fn zero_flip_probability_mutates_nothing() {
        let mut builder = TraceBuilder::new(1);
        builder.select(
            1,
            50,
            &[CaseSpec { channel: 51, op: ChannelOp::Recv, q_size: 1, op_id: 1 }],
            -1,
            true,
            true,
        );
        builder.end(1);
        let mut trace = builder.build();
        analyze(&mut trace, &AnalyzerConfig::default(), &CancelFlag::new()).unwrap();

        let cfg = FuzzerConfig { flip_probability: 0.0, ..FuzzerConfig::default() };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(mutations(&trace, &cfg, &mut rng).is_empty());
    }
}
