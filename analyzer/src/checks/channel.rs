//! Closed-channel communication and nondeterministic-receive checks.

use std::collections::BTreeMap;

use itertools::Itertools;
use skein_core::{ClockRelation, Finding, FindingKind, ObjectId, event::ChannelOp};

use crate::hb;

use super::{ChanOpSite, CheckContext, channel_sites, operand};

// CLOSED CHANNEL
// ================================================================================================

/// Reports actual and predicted communication on closed channels.
///
/// An operation that actually hit a closed channel is reported as-is. For every close, any send
/// or receive whose clock is concurrent with the close could have run after it in another
/// interleaving and is reported as a possible case. Select cases count as potential operations
/// whether or not they were chosen.
pub fn closed_channel(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    let sites = channel_sites(ctx.trace);
    let mut closes: BTreeMap<ObjectId, Vec<&ChanOpSite>> = BTreeMap::new();
    for site in sites.iter().filter(|site| site.op == ChannelOp::Close) {
        closes.entry(site.object).or_default().push(site);
    }

    // actual close of an already closed channel
    for sites in closes.values() {
        for close in sites.iter().filter(|close| close.closed) {
            let first = sites.iter().find(|other| !other.closed);
            let mut operands = vec![operand(ctx.trace, close.id)];
            operands.extend(first.map(|other| operand(ctx.trace, other.id)));
            findings.push(Finding::new(FindingKind::CloseOnClosed, operands));
        }
    }

    for site in &sites {
        if site.op == ChannelOp::Close {
            continue;
        }
        let close_list = closes.get(&site.object);
        let close_op = close_list.and_then(|list| list.first());

        // the operation actually observed the channel closed
        if site.closed && site.executed {
            let kind = match site.op {
                ChannelOp::Send => FindingKind::SendOnClosed,
                _ => FindingKind::RecvOnClosed,
            };
            let mut operands = vec![operand(ctx.trace, site.id)];
            operands.extend(close_op.map(|close| operand(ctx.trace, close.id)));
            findings.push(Finding::new(kind, operands));
            continue;
        }

        // predicted: the close and the operation are unordered
        if let Some(close) = close_op {
            let close_event = ctx.trace.event(close.id);
            let op_event = ctx.trace.event(site.id);
            if hb::relation(op_event, close_event) == ClockRelation::Concurrent {
                let kind = match site.op {
                    ChannelOp::Send => FindingKind::PossibleSendOnClosed,
                    _ => FindingKind::PossibleRecvOnClosed,
                };
                findings.push(Finding::new(
                    kind,
                    vec![operand(ctx.trace, close.id), operand(ctx.trace, site.id)],
                ));
            }
        }
    }
}

// CONCURRENT RECEIVE
// ================================================================================================

/// Two receives on the same channel that are unordered receive nondeterministically.
pub fn concurrent_recv(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    let sites = channel_sites(ctx.trace);
    let mut recvs: BTreeMap<ObjectId, Vec<&ChanOpSite>> = BTreeMap::new();
    for site in sites.iter().filter(|site| site.op == ChannelOp::Recv && site.executed) {
        recvs.entry(site.object).or_default().push(site);
    }

    for sites in recvs.values() {
        for (first, second) in sites.iter().tuple_combinations() {
            if first.id.routine == second.id.routine {
                continue;
            }
            let a = ctx.trace.event(first.id);
            let b = ctx.trace.event(second.id);
            if hb::relation(a, b) == ClockRelation::Concurrent {
                findings.push(Finding::new(
                    FindingKind::ConcurrentRecv,
                    vec![operand(ctx.trace, first.id), operand(ctx.trace, second.id)],
                ));
            }
        }
    }
}

/// Entry point for the closed-channel and concurrent-receive checks, honoring the check set.
pub fn run(ctx: &CheckContext<'_>, findings: &mut Vec<Finding>) {
    if ctx.cfg.checks.closed_channel {
        closed_channel(ctx, findings);
    }
    if ctx.cfg.checks.concurrent_recv {
        concurrent_recv(ctx, findings);
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use skein_core::Trace;

    use crate::{analyze, config::AnalyzerConfig};

    use super::*;

    fn findings_for(trace_text: &str) -> Vec<Finding> {
        let mut trace = Trace::parse("test.trace", trace_text).unwrap();
        let analysis =
            analyze(&mut trace, &AnalyzerConfig::default(), &Default::default()).unwrap();
        analysis.findings
    }

    #[test]
    fn actual_send_on_closed_is_critical() {
        // routine 1 closes, routine 2 sends into the already-closed channel
        let text = "\
F,1,2,main.go:3;C,4,5,7,C,f,0,1,main.go:4;E,9;
C,6,7,7,S,t,1,1,worker.go:8;E,10;";
        let findings = findings_for(text);
        assert!(
            findings
                .iter()
                .any(|finding| finding.kind == FindingKind::SendOnClosed),
            "expected an actual send-on-closed finding, got {findings:?}"
        );
    }

    #[test]
    fn unordered_close_and_send_is_predicted() {
        // buffered channel: send completes independently, close is concurrent
        let text = "\
F,1,2,main.go:3;C,4,5,7,C,f,0,2,main.go:4;E,9;
C,6,7,7,S,f,1,2,worker.go:8;E,10;";
        let findings = findings_for(text);
        assert!(
            findings
                .iter()
                .any(|finding| finding.kind == FindingKind::PossibleSendOnClosed),
            "expected a predicted send-on-closed finding, got {findings:?}"
        );
    }
}
