//! Unlock-of-not-locked-mutex check.

use std::collections::BTreeMap;

use skein_core::{
    ClockRelation, EventId, Finding, FindingKind, ObjectId, Trace,
    event::EventKind,
};

use crate::{flow::BipartiteFlow, hb};

use super::{CheckContext, analyzed, operand};

// UNLOCK BEFORE LOCK
// ================================================================================================

/// Matches every release to a distinct acquire that happens before it.
///
/// Objects whose acquires and releases all live in one routine cannot misbehave and are skipped.
/// For the rest, a bipartite maximum matching (releases against acquires, an edge where the
/// acquire happens before the release) is computed; any release left unmatched can run without a
/// lock being held in some interleaving. Reader/writer kinds are ignored here, only the
/// acquire/release pairing matters.
pub fn run(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    if !ctx.cfg.checks.unlock {
        return;
    }

    let mut acquires: BTreeMap<ObjectId, Vec<EventId>> = BTreeMap::new();
    let mut releases: BTreeMap<ObjectId, Vec<EventId>> = BTreeMap::new();
    for event in ctx.trace.events() {
        if !analyzed(event) || event.t_post() == 0 {
            continue;
        }
        if let EventKind::Mutex(mutex) = &event.kind {
            if mutex.acquired() {
                acquires.entry(mutex.object).or_default().push(event.id());
            } else if mutex.op.is_release() {
                releases.entry(mutex.object).or_default().push(event.id());
            }
        }
    }

    for (object, release_ids) in &releases {
        let acquire_ids = acquires.get(object).cloned().unwrap_or_default();
        if single_routine(ctx.trace, release_ids, &acquire_ids) {
            continue;
        }

        let mut flow = BipartiteFlow::new(release_ids.len(), acquire_ids.len());
        for (left, &release) in release_ids.iter().enumerate() {
            for (right, &acquire) in acquire_ids.iter().enumerate() {
                let rel =
                    hb::relation(ctx.trace.event(acquire), ctx.trace.event(release));
                if rel == ClockRelation::Before {
                    flow.add_edge(left, right);
                }
            }
        }

        let matching = flow.max_matching();
        if matching.flow() == release_ids.len() {
            continue;
        }
        for left in matching.unmatched_left() {
            let release = release_ids[left];
            let mut operands = vec![operand(ctx.trace, release)];
            // pair the unmatched release with the acquires it races with
            for &acquire in &acquire_ids {
                if hb::relation(ctx.trace.event(acquire), ctx.trace.event(release))
                    == ClockRelation::Concurrent
                {
                    operands.push(operand(ctx.trace, acquire));
                }
            }
            findings.push(Finding::new(FindingKind::UnlockOfNotLockedMutex, operands));
        }
    }
}

fn single_routine(trace: &Trace, releases: &[EventId], acquires: &[EventId]) -> bool {
    let mut routines = releases.iter().chain(acquires).map(|id| trace.event(*id).routine());
    let Some(first) = routines.next() else { return true };
    routines.all(|routine| routine == first)
}
