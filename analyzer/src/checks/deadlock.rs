//! Resource-deadlock detection over lock dependencies, plus the mixed channel/mutex heuristic.

use std::collections::{HashMap, HashSet};

use skein_core::{
    ClockRelation, Event, EventId, Finding, FindingKind, ObjectId, RoutineId,
    event::{ChannelOp, EventKind, MutexOp},
};

use crate::hb;

use super::{CheckContext, channel_sites, operand};

// LOCK DEPENDENCIES
// ================================================================================================

/// One lock held by a routine at some point in time.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeldLock {
    pub object: ObjectId,
    pub read: bool,
    pub acquired_at: EventId,
}

/// A dependency `(routine, requested lock, locks held while requesting)`.
///
/// Collected while the dispatcher walks the trace, since the lockset is temporal state the
/// finished trace no longer shows.
#[derive(Clone, Debug)]
pub struct LockDep {
    pub routine: RoutineId,
    pub lock: ObjectId,
    pub read: bool,
    pub request: EventId,
    pub holds: Vec<HeldLock>,
}

/// Per-routine lockset tracking and dependency collection.
#[derive(Debug)]
pub struct LockDependencies {
    locksets: Vec<Vec<HeldLock>>,
    deps: Vec<LockDep>,
}

impl LockDependencies {
    pub fn new(num_routines: usize) -> Self {
        Self { locksets: vec![Vec::new(); num_routines + 1], deps: Vec::new() }
    }

    pub fn deps(&self) -> &[LockDep] {
        &self.deps
    }

    /// Walk hook: call for every analyzed event in analysis order.
    pub fn observe(&mut self, event: &Event, lockset_on_try: bool) {
        let EventKind::Mutex(mutex) = &event.kind else { return };
        let routine = event.routine().as_usize();
        match mutex.op {
            MutexOp::Lock | MutexOp::RLock | MutexOp::TryLock | MutexOp::TryRLock => {
                let record_dep = mutex.success || (mutex.op.is_try() && lockset_on_try);
                if record_dep && !self.locksets[routine].is_empty() {
                    self.deps.push(LockDep {
                        routine: event.routine(),
                        lock: mutex.object,
                        read: mutex.op.is_read(),
                        request: event.id(),
                        holds: self.locksets[routine].clone(),
                    });
                }
                if mutex.acquired() && event.t_post() != 0 {
                    self.locksets[routine].push(HeldLock {
                        object: mutex.object,
                        read: mutex.op.is_read(),
                        acquired_at: event.id(),
                    });
                }
            },
            MutexOp::Unlock | MutexOp::RUnlock => {
                // release the most recent matching hold; reader counts fall out naturally since
                // each rlock pushed its own entry
                let read = mutex.op.is_read();
                if let Some(pos) = self.locksets[routine]
                    .iter()
                    .rposition(|held| held.object == mutex.object && held.read == read)
                {
                    self.locksets[routine].remove(pos);
                }
            },
        }
    }
}

// CYCLE SEARCH
// ================================================================================================

/// True if the two lock usages would block each other; two readers never do.
fn blocks(a_read: bool, b_read: bool) -> bool {
    !(a_read && b_read)
}

/// Searches the collected dependencies for cycles across distinct routines.
///
/// A chain step from `d` to `e` exists when `e` holds the lock `d` requests with a blocking
/// kind. A cycle is valid only if its dependencies are pairwise non-excluding: no two of them
/// hold a common lock in blocking kinds (they could not block simultaneously otherwise), and
/// their requests are pairwise concurrent under the weak relation.
pub fn run(ctx: &CheckContext<'_>, deps: &LockDependencies, findings: &mut Vec<Finding>) {
    if !ctx.cfg.checks.resource_deadlock {
        return;
    }
    let deps = deps.deps();
    let mut reported: HashSet<Vec<EventId>> = HashSet::new();

    for start in 0..deps.len() {
        let mut chain = vec![start];
        search(ctx, deps, start, &mut chain, &mut reported, findings);
    }
}

fn search(
    ctx: &CheckContext<'_>,
    deps: &[LockDep],
    start: usize,
    chain: &mut Vec<usize>,
    reported: &mut HashSet<Vec<EventId>>,
    findings: &mut Vec<Finding>,
) {
    if chain.len() > ctx.trace.num_routines() {
        // a cycle visits each routine at most once
        return;
    }
    let last = *chain.last().expect("chain never empty");
    for next in 0..deps.len() {
        // keep the smallest index first so each cycle is found once
        if next < start || chain.contains(&next) {
            continue;
        }
        if !chain_step(&deps[last], &deps[next]) {
            continue;
        }
        if !compatible(ctx, deps, chain, next) {
            continue;
        }
        chain.push(next);
        if chain.len() >= 2 && chain_step(&deps[next], &deps[start]) {
            let mut cycle: Vec<EventId> = chain.iter().map(|&i| deps[i].request).collect();
            cycle.sort();
            if reported.insert(cycle.clone()) {
                let operands =
                    chain.iter().map(|&i| operand(ctx.trace, deps[i].request)).collect();
                findings.push(Finding::new(FindingKind::ResourceDeadlock, operands));
            }
        }
        search(ctx, deps, start, chain, reported, findings);
        chain.pop();
    }
}

/// `next` can extend the chain after `last`: `next` holds what `last` requests, blockingly.
fn chain_step(last: &LockDep, next: &LockDep) -> bool {
    last.routine != next.routine
        && next
            .holds
            .iter()
            .any(|held| held.object == last.lock && blocks(last.read, held.read))
}

/// Pairwise guard for adding `candidate` to the chain.
fn compatible(
    ctx: &CheckContext<'_>,
    deps: &[LockDep],
    chain: &[usize],
    candidate: usize,
) -> bool {
    let cand = &deps[candidate];
    chain.iter().all(|&i| {
        let dep = &deps[i];
        if dep.routine == cand.routine {
            return false;
        }
        // two elements holding the same lock blockingly cannot be blocked at the same time
        let excludes = dep.holds.iter().any(|a| {
            cand.holds
                .iter()
                .any(|b| a.object == b.object && blocks(a.read, b.read))
        });
        if excludes {
            return false;
        }
        hb::relation_weak(ctx.trace.event(dep.request), ctx.trace.event(cand.request))
            == ClockRelation::Concurrent
    })
}

// MIXED DEADLOCK
// ================================================================================================

/// Heuristic: a channel communication between two routines that also contend on a mutex can
/// deadlock if the lock is held around the communication in one of them.
pub fn mixed(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    if !ctx.cfg.checks.mixed_deadlock {
        return;
    }

    let mut locks_by_routine: HashMap<RoutineId, Vec<(ObjectId, EventId)>> = HashMap::new();
    for event in ctx.trace.events() {
        if let EventKind::Mutex(mutex) = &event.kind
            && mutex.acquired()
        {
            locks_by_routine
                .entry(event.routine())
                .or_default()
                .push((mutex.object, event.id()));
        }
    }

    let mut seen: HashSet<(ObjectId, ObjectId)> = HashSet::new();
    for site in channel_sites(ctx.trace) {
        if site.op != ChannelOp::Send || !site.executed {
            continue;
        }
        let event = ctx.trace.event(site.id);
        let Some(partner) = partner_of(event) else { continue };
        if partner.routine == site.id.routine {
            continue;
        }
        let Some(sender_locks) = locks_by_routine.get(&site.id.routine) else { continue };
        let Some(receiver_locks) = locks_by_routine.get(&partner.routine) else { continue };
        for (mutex, sender_lock) in sender_locks {
            if let Some((_, receiver_lock)) =
                receiver_locks.iter().find(|(other, _)| other == mutex)
                && seen.insert((site.object, *mutex))
            {
                findings.push(Finding::new(
                    FindingKind::MixedDeadlock,
                    vec![
                        operand(ctx.trace, site.id),
                        operand(ctx.trace, *sender_lock),
                        operand(ctx.trace, *receiver_lock),
                    ],
                ));
            }
        }
    }
}

fn partner_of(event: &Event) -> Option<EventId> {
    match &event.kind {
        EventKind::Channel(ch) => ch.partner,
        EventKind::Select(select) => select.chosen_case().and_then(|case| case.channel.partner),
        _ => None,
    }
}
