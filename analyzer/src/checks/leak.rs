//! Goroutine-leak diagnostics: operations that started but never completed, paired with the
//! candidates that could have released them in another interleaving.

use skein_core::{
    ClockRelation, Event, EventId, Finding, FindingKind, Severity,
    event::{ChannelEvent, ChannelOp, CondOp, EventKind, WaitOp},
};

use crate::hb;

use super::{CheckContext, analyzed, operand};

// LEAK CHECK
// ================================================================================================

/// Scans for events with a missing exit timestamp and searches a feasible release candidate.
///
/// A leak with a candidate is upgraded to critical: the recorded schedule merely got unlucky and
/// a re-execution can likely reproduce the hang with the partner redirected. A leak without any
/// candidate stays a warning.
pub fn run(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    if !ctx.cfg.checks.leaks {
        return;
    }
    for event in ctx.trace.events() {
        if !event.is_leak() || !analyzed(event) {
            continue;
        }
        match &event.kind {
            EventKind::Channel(ch) => channel_leak(ctx, event, ch, findings),
            EventKind::Select(select) => {
                let mut candidate = None;
                for case in &select.cases {
                    candidate = comm_candidate(ctx, event, &case.channel);
                    if candidate.is_some() {
                        break;
                    }
                }
                push_leak(ctx, FindingKind::LeakSelect, event, candidate, findings);
            },
            EventKind::Mutex(mutex) if mutex.op.is_acquire() => {
                let candidate = release_candidate(ctx, event, |other| {
                    matches!(
                        &other.kind,
                        EventKind::Mutex(m) if m.object == mutex.object && m.op.is_release()
                    )
                });
                push_leak(ctx, FindingKind::LeakMutex, event, candidate, findings);
            },
            EventKind::Cond(cond) if cond.op == CondOp::Wait => {
                let candidate = release_candidate(ctx, event, |other| {
                    matches!(
                        &other.kind,
                        EventKind::Cond(c)
                            if c.object == cond.object
                                && matches!(c.op, CondOp::Signal | CondOp::Broadcast)
                    )
                });
                push_leak(ctx, FindingKind::LeakCond, event, candidate, findings);
            },
            EventKind::Wait(wait) if wait.op == WaitOp::Wait => {
                let candidate = release_candidate(ctx, event, |other| {
                    matches!(
                        &other.kind,
                        EventKind::Wait(w) if w.object == wait.object && w.op == WaitOp::Change
                    )
                });
                push_leak(ctx, FindingKind::LeakWaitGroup, event, candidate, findings);
            },
            _ => (),
        }
    }
}

fn channel_leak(
    ctx: &CheckContext<'_>,
    event: &Event,
    ch: &ChannelEvent,
    findings: &mut Vec<Finding>,
) {
    let kind = if ch.is_unbuffered() {
        FindingKind::LeakUnbufferedChannel
    } else {
        FindingKind::LeakBufferedChannel
    };
    let candidate = comm_candidate(ctx, event, ch);
    push_leak(ctx, kind, event, candidate, findings);
}

/// A communication counterpart whose clock is concurrent with the leaked operation: the most
/// recent send (for a stuck receive) or receive (for a stuck send) any routine performed on the
/// channel.
fn comm_candidate(
    ctx: &CheckContext<'_>,
    event: &Event,
    ch: &ChannelEvent,
) -> Option<EventId> {
    let partner_maps = match ch.op {
        ChannelOp::Send => &ctx.state.most_recent_recv,
        ChannelOp::Recv => &ctx.state.most_recent_send,
        ChannelOp::Close => return None,
    };
    for (routine, per_channel) in partner_maps.iter().enumerate().skip(1) {
        if routine == event.routine().as_usize() {
            continue;
        }
        if let Some(stamp) = per_channel.get(&ch.object)
            && concurrent_with(ctx, event, stamp.event)
        {
            return Some(stamp.event);
        }
    }
    None
}

/// Any event matching `select_fn` that is concurrent with the leaked operation.
fn release_candidate(
    ctx: &CheckContext<'_>,
    event: &Event,
    select_fn: impl Fn(&Event) -> bool,
) -> Option<EventId> {
    ctx.trace
        .events()
        .filter(|other| analyzed(other) && other.t_post() != 0)
        .filter(|other| other.routine() != event.routine())
        .find(|other| select_fn(other) && concurrent_with(ctx, event, other.id()))
        .map(|other| other.id())
}

fn concurrent_with(ctx: &CheckContext<'_>, event: &Event, other: EventId) -> bool {
    hb::relation(event, ctx.trace.event(other)) == ClockRelation::Concurrent
}

fn push_leak(
    ctx: &CheckContext<'_>,
    kind: FindingKind,
    event: &Event,
    candidate: Option<EventId>,
    findings: &mut Vec<Finding>,
) {
    let mut operands = vec![operand(ctx.trace, event.id())];
    let severity = match candidate {
        Some(candidate) => {
            operands.push(operand(ctx.trace, candidate));
            Severity::Critical
        },
        None => Severity::Warning,
    };
    findings.push(Finding::new(kind, operands).with_severity(severity));
}
