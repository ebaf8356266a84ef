//! End-to-end scenario tests: known bug shapes analyzed from scratch, plus the quantified
//! invariants of the happens-before engine checked across all three representations.

use pretty_assertions::assert_eq;
use rstest::rstest;
use skein_analyzer::{Analysis, AnalyzerConfig, CancelFlag, analyze, hb};
use skein_core::{
    ClockRelation, EventId, FindingKind, RoutineId, Severity, Trace,
    event::{ChannelOp, CondOp, EventKind},
};
use skein_test_utils::{CaseSpec, TraceBuilder};

fn run(trace: &mut Trace, cfg: &AnalyzerConfig) -> Analysis {
    analyze(trace, cfg, &CancelFlag::new()).expect("analysis must succeed")
}

fn run_default(trace: &mut Trace) -> Analysis {
    run(trace, &AnalyzerConfig::default())
}

fn kinds(analysis: &Analysis) -> Vec<FindingKind> {
    analysis.findings.iter().map(|finding| finding.kind).collect()
}

// CLOSED CHANNEL RACE
// ================================================================================================

fn send_on_closed_trace() -> Trace {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    builder.new_object(1, 5);
    // the send blocks forever; the close races with it
    builder.channel_leak(2, 5, ChannelOp::Send, 0, 1);
    builder.close(1, 5);
    builder.end(1);
    builder.build()
}

#[test]
fn send_racing_a_close_is_predicted() {
    let mut trace = send_on_closed_trace();
    let analysis = run_default(&mut trace);

    let finding = analysis
        .findings
        .iter()
        .find(|finding| finding.kind == FindingKind::PossibleSendOnClosed)
        .expect("expected a possible send-on-closed finding");
    assert_eq!(finding.severity, Severity::Critical);
    // operands: the close first, then the racing send
    assert_eq!(finding.operands.len(), 2);
    assert_eq!(finding.operands[0].event.routine, RoutineId::new(1));
    assert_eq!(finding.operands[1].event.routine, RoutineId::new(2));
}

// NEGATIVE WAIT GROUP
// ================================================================================================

fn negative_waitgroup_trace() -> Trace {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    builder.wg_add(1, 8, 1, 1);
    builder.wg_done(1, 8, 0);
    builder.wg_done(2, 8, -1);
    builder.end(1);
    builder.end(2);
    builder.build()
}

#[test]
fn unmatched_done_reports_negative_counter() {
    let mut trace = negative_waitgroup_trace();
    let analysis = run_default(&mut trace);

    let negative: Vec<_> = analysis
        .findings
        .iter()
        .filter(|finding| finding.kind == FindingKind::NegativeWaitGroup)
        .collect();
    assert_eq!(negative.len(), 1, "exactly one unmatched done expected");
    assert_eq!(negative[0].severity, Severity::Critical);
    // the second done is the one the matching cannot satisfy
    assert_eq!(negative[0].operands[0].event.routine, RoutineId::new(2));
}

// UNLOCK OF NOT LOCKED MUTEX
// ================================================================================================

fn stray_unlock_trace() -> Trace {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    builder.lock(1, 9);
    builder.unlock(1, 9);
    builder.unlock(2, 9);
    builder.end(1);
    builder.end(2);
    builder.build()
}

#[test]
fn stray_unlock_is_reported_with_racing_lock() {
    let mut trace = stray_unlock_trace();
    let analysis = run_default(&mut trace);

    let finding = analysis
        .findings
        .iter()
        .find(|finding| finding.kind == FindingKind::UnlockOfNotLockedMutex)
        .expect("expected an unlock-of-not-locked finding");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.operands[0].event.routine, RoutineId::new(2));
    // paired with the lock it is concurrent with
    assert!(finding.operands.len() >= 2);
}

// RESOURCE DEADLOCK
// ================================================================================================

fn two_lock_cycle_trace() -> Trace {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    builder.lock(1, 30);
    builder.lock(1, 31);
    builder.unlock(1, 31);
    builder.unlock(1, 30);
    builder.lock(2, 31);
    builder.lock(2, 30);
    builder.unlock(2, 30);
    builder.unlock(2, 31);
    builder.end(1);
    builder.end(2);
    builder.build()
}

#[test]
fn opposite_lock_orders_form_a_cycle() {
    let mut trace = two_lock_cycle_trace();
    let analysis = run_default(&mut trace);

    let finding = analysis
        .findings
        .iter()
        .find(|finding| finding.kind == FindingKind::ResourceDeadlock)
        .expect("expected a resource deadlock finding");
    assert_eq!(finding.operands.len(), 2, "the two-lock cycle has two requests");
    let routines: Vec<u32> =
        finding.operands.iter().map(|op| op.event.routine.as_u32()).collect();
    assert!(routines.contains(&1) && routines.contains(&2));
}

// BUFFERED FIFO HOLD-BACK
// ================================================================================================

/// A receive recorded before its matching send: the engine must hold it back and the analysis
/// must stay clean.
const FIFO_HOLDBACK_TRACE: &str = "\
F,1,2,main.go:3;C,2,3,5,R,f,1,2,main.go:4;C,8,9,5,R,f,2,2,main.go:5;E,12;
C,4,5,5,S,f,1,2,worker.go:7;C,6,7,5,S,f,2,2,worker.go:8;E,13;";

#[test]
fn buffered_recv_outrunning_sends_is_held_back() {
    let mut trace = Trace::parse("fifo.trace", FIFO_HOLDBACK_TRACE).unwrap();
    let analysis = run(&mut trace, &AnalyzerConfig::all_paths());

    assert_eq!(kinds(&analysis), Vec::<FindingKind>::new(), "no findings expected");

    // the held-back receives still end up ordered after their sends
    let recv1 = trace.event(EventId::new(RoutineId::new(1), 1));
    let send1 = trace.event(EventId::new(RoutineId::new(2), 0));
    assert_eq!(hb::relation(send1, recv1), ClockRelation::Before);
}

// LEAKS
// ================================================================================================

#[test]
fn blocked_select_with_feasible_partner_is_critical() {
    let mut builder = TraceBuilder::new(3);
    builder.fork(1, 2);
    builder.fork(1, 3);
    // routines 2 and 3 communicate once; the select in routine 1 waits on the same channel
    // forever and could have taken that message
    builder.select(
        1,
        60,
        &[CaseSpec { channel: 61, op: ChannelOp::Recv, q_size: 0, op_id: 7 }],
        -1,
        false,
        false,
    );
    builder.send_recv(2, 3, 61, 1);
    builder.end(2);
    builder.end(3);
    let mut trace = builder.build();
    let analysis = run_default(&mut trace);

    let finding = analysis
        .findings
        .iter()
        .find(|finding| finding.kind == FindingKind::LeakSelect)
        .expect("expected a select leak");
    assert_eq!(finding.severity, Severity::Critical, "a feasible sender exists");
    assert_eq!(finding.operands.len(), 2);
}

#[test]
fn blocked_mutex_without_candidate_is_a_warning() {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    builder.lock(1, 12);
    builder.mutex_leak(2, 12, skein_core::event::MutexOp::Lock);
    builder.end(1);
    let mut trace = builder.build();
    let analysis = run_default(&mut trace);

    let finding = analysis
        .findings
        .iter()
        .find(|finding| finding.kind == FindingKind::LeakMutex)
        .expect("expected a mutex leak");
    assert_eq!(finding.severity, Severity::Warning);
}

// CROSS-PATH AGREEMENT
// ================================================================================================

#[rstest]
#[case::send_on_closed(send_on_closed_trace())]
#[case::negative_waitgroup(negative_waitgroup_trace())]
#[case::stray_unlock(stray_unlock_trace())]
#[case::two_lock_cycle(two_lock_cycle_trace())]
fn all_paths_agree(#[case] mut trace: Trace) {
    // cross-validation inside analyze compares vc, pog, and csst on every event pair
    let analysis = run(&mut trace, &AnalyzerConfig::all_paths());
    assert!(analysis.pog.is_some());
    assert!(analysis.csst.is_some());
}

// INVARIANTS
// ================================================================================================

/// A trace touching every primitive family at least once.
fn mixed_trace() -> Trace {
    let mut builder = TraceBuilder::new(3);
    builder.fork(1, 2);
    builder.fork(1, 3);
    builder.once(2, 70, true);
    builder.once(3, 70, false);
    builder.lock(2, 71);
    builder.unlock(2, 71);
    builder.lock(3, 71);
    builder.unlock(3, 71);
    builder.send_recv(2, 3, 72, 1);
    builder.wg_add(1, 73, 1, 1);
    builder.wg_done(2, 73, 0);
    builder.close(2, 74);
    builder.recv_on_closed(3, 74, 0);
    builder.end(1);
    builder.end(2);
    builder.end(3);
    builder.build()
}

#[test]
fn clocks_stay_positive_and_bounded() {
    let mut trace = mixed_trace();
    run_default(&mut trace);

    for event in trace.events() {
        let Some(vc) = event.vc.as_ref() else { continue };
        assert!(
            vc.get(event.routine()) > 0,
            "own component must be positive at {}",
            event.id()
        );
    }
}

#[test]
fn same_routine_events_are_ordered_on_all_paths() {
    let mut trace = mixed_trace();
    let analysis = run(&mut trace, &AnalyzerConfig::all_paths());
    let pog = analysis.pog.expect("pog enabled");

    for routine in 1..=trace.num_routines() {
        let routine = RoutineId::new(routine as u32);
        let stream = trace.routine(routine);
        for i in 0..stream.len() {
            for j in i + 1..stream.len() {
                let (a, b) = (&stream[i], &stream[j]);
                if a.vc.is_none() || b.vc.is_none() {
                    continue;
                }
                assert_eq!(hb::relation(a, b), ClockRelation::Before);
                assert_eq!(pog.relation(a.id(), b.id()), ClockRelation::Before);
            }
        }
    }
}

#[test]
fn unbuffered_pairs_share_their_moment_but_stay_ordered() {
    let mut builder = TraceBuilder::new(2);
    builder.fork(1, 2);
    let (send, recv) = builder.send_recv(1, 2, 80, 1);
    builder.end(1);
    builder.end(2);
    let mut trace = builder.build();
    run_default(&mut trace);

    let (send, recv) = (trace.event(send), trace.event(recv));
    assert_eq!(send.t_post(), recv.t_post(), "pair shares one scheduling moment");
    assert_eq!(hb::relation(send, recv), ClockRelation::Before);
}

#[test]
fn close_happens_before_every_recv_on_closed() {
    let mut trace = mixed_trace();
    run_default(&mut trace);

    let mut close = None;
    let mut closed_recv = None;
    for event in trace.events() {
        if let EventKind::Channel(ch) = &event.kind {
            match ch.op {
                ChannelOp::Close => close = Some(event),
                ChannelOp::Recv if ch.closed => closed_recv = Some(event),
                _ => (),
            }
        }
    }
    let (close, recv) = (close.unwrap(), closed_recv.unwrap());
    assert_eq!(hb::relation(close, recv), ClockRelation::Before);
}

#[test]
fn successful_once_happens_before_failing_once() {
    let mut trace = mixed_trace();
    run_default(&mut trace);

    let mut success = None;
    let mut failure = None;
    for event in trace.events() {
        if let EventKind::Once(once) = &event.kind {
            if once.success {
                success = Some(event);
            } else {
                failure = Some(event);
            }
        }
    }
    assert_eq!(hb::relation(success.unwrap(), failure.unwrap()), ClockRelation::Before);
}

#[test]
fn signal_happens_before_the_wait_it_releases() {
    // the wait enters before the signal but completes after it
    let text = "\
F,1,2,main.go:3;D,4,5,9,S,main.go:6;E,10;
D,2,6,9,W,worker.go:4;E,11;";
    let mut trace = Trace::parse("cond.trace", text).unwrap();
    run(&mut trace, &AnalyzerConfig::all_paths());

    let signal = trace.event(EventId::new(RoutineId::new(1), 1));
    let wait = trace.event(EventId::new(RoutineId::new(2), 0));
    assert!(matches!(&signal.kind, EventKind::Cond(c) if c.op == CondOp::Signal));
    assert_eq!(hb::relation(signal, wait), ClockRelation::Before);
}

// CANCELLATION
// ================================================================================================

#[test]
fn preset_cancel_flag_stops_the_walk_with_a_record() {
    use skein_analyzer::CancelReason;

    let mut trace = mixed_trace();
    let cancel = CancelFlag::new();
    cancel.cancel(CancelReason::OutOfMemory);
    let analysis = analyze(&mut trace, &AnalyzerConfig::default(), &cancel).unwrap();

    assert_eq!(analysis.cancelled, Some(CancelReason::OutOfMemory));
    assert_eq!(analysis.events_processed, 0);
    // the partial result set still carries the cancellation record, and nothing else
    assert_eq!(kinds(&analysis), vec![FindingKind::CancelledOutOfMemory]);
}

#[test]
fn event_budget_caps_the_walk() {
    let mut trace = mixed_trace();
    let cfg = AnalyzerConfig { max_events: Some(3), ..AnalyzerConfig::default() };
    let analysis = run(&mut trace, &cfg);
    assert!(analysis.events_processed <= 3);
}

#[test]
fn reanalyzing_the_same_trace_is_idempotent() {
    let mut first = mixed_trace();
    let findings_a = run_default(&mut first).findings;
    let mut second = mixed_trace();
    let findings_b = run_default(&mut second).findings;
    assert_eq!(findings_a, findings_b);
}
