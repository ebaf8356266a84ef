//! Negative wait-group counter check.

use std::collections::BTreeMap;

use skein_core::{
    ClockRelation, EventId, Finding, FindingKind, ObjectId,
    event::EventKind,
};

use crate::{flow::BipartiteFlow, hb};

use super::{CheckContext, analyzed, operand};

// NEGATIVE COUNTER
// ================================================================================================

/// Matches every done to a distinct add that happens before it.
///
/// A done with no such add can, in some interleaving, run while the counter is zero and drive it
/// negative. The matching is the same bipartite pattern as the unlock check, with dones on the
/// left and adds on the right. Unmatched dones are reported together with the adds they are
/// concurrent with.
pub fn run(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    if !ctx.cfg.checks.waitgroup {
        return;
    }

    let mut adds: BTreeMap<ObjectId, Vec<EventId>> = BTreeMap::new();
    let mut dones: BTreeMap<ObjectId, Vec<EventId>> = BTreeMap::new();
    for event in ctx.trace.events() {
        if !analyzed(event) || event.t_post() == 0 {
            continue;
        }
        if let EventKind::Wait(wait) = &event.kind {
            if wait.is_add() {
                // an add of n can justify n dones
                for _ in 0..wait.delta {
                    adds.entry(wait.object).or_default().push(event.id());
                }
            } else if wait.is_done() {
                dones.entry(wait.object).or_default().push(event.id());
            }
        }
    }

    for (object, done_ids) in &dones {
        let add_ids = adds.get(object).cloned().unwrap_or_default();

        let mut flow = BipartiteFlow::new(done_ids.len(), add_ids.len());
        for (left, &done) in done_ids.iter().enumerate() {
            for (right, &add) in add_ids.iter().enumerate() {
                if hb::relation(ctx.trace.event(add), ctx.trace.event(done))
                    == ClockRelation::Before
                {
                    flow.add_edge(left, right);
                }
            }
        }

        let matching = flow.max_matching();
        if matching.flow() == done_ids.len() {
            continue;
        }
        for left in matching.unmatched_left() {
            let done = done_ids[left];
            let mut operands = vec![operand(ctx.trace, done)];
            for &add in &add_ids {
                if hb::relation(ctx.trace.event(add), ctx.trace.event(done))
                    == ClockRelation::Concurrent
                {
                    operands.push(operand(ctx.trace, add));
                }
            }
            findings.push(Finding::new(FindingKind::NegativeWaitGroup, operands));
        }
    }
}
