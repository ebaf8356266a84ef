use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::{self, AssertUnwindSafe},
};

use skein_core::{EventId, Finding, FindingKind, RoutineId, Severity, Trace};
use tracing::{debug, error};

use crate::{
    cancel::CancelFlag,
    checks::{self, CheckContext, LockDependencies},
    config::AnalyzerConfig,
    errors::{AnalysisError, CancelReason},
    hb::{CsstPair, EdgeBuf, Pog, VcEngine},
};

// ANALYSIS RESULT
// ================================================================================================

/// Outcome of one analysis run: the findings plus the happens-before structures, which the
/// fuzzer and the cross-path tests keep using after the walk.
#[derive(Debug)]
pub struct Analysis {
    pub findings: Vec<Finding>,
    pub cancelled: Option<CancelReason>,
    pub events_processed: usize,
    pub pog: Option<Pog>,
    pub csst: Option<CsstPair>,
}

impl Analysis {
    pub fn count_with_severity(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|finding| finding.severity == severity).count()
    }

    pub fn has_bug(&self) -> bool {
        self.count_with_severity(Severity::Critical) > 0
    }
}

// DISPATCHER
// ================================================================================================

/// Walks the trace in schedule order, routing every event through the enabled happens-before
/// representations and collecting scenario findings.
///
/// The vector-clock engine owns the update rules; the graph and segment-tree paths only observe
/// the edges it announces. Scenario checks run after the walk behind a single catch boundary
/// each: a panicking check degrades to a `ScenarioInternal` finding instead of killing the run.
pub fn analyze(
    trace: &mut Trace,
    cfg: &AnalyzerConfig,
    cancel: &CancelFlag,
) -> Result<Analysis, AnalysisError> {
    let num_routines = trace.num_routines();
    let mut engine = VcEngine::new(num_routines, cfg);
    let mut pog = cfg.build_pog.then(|| Pog::new(trace));
    let mut csst = cfg.build_csst.then(|| CsstPair::new(trace));
    let mut deps = LockDependencies::new(num_routines);
    let mut edges = EdgeBuf::new();
    let mut findings = Vec::new();

    let mut schedule = trace.schedule();
    let mut pending: VecDeque<EventId> = VecDeque::new();
    let mut consumed: HashSet<EventId> = HashSet::new();
    let mut deferred_heads: HashMap<RoutineId, EventId> = HashMap::new();
    let mut backlog: HashMap<RoutineId, VecDeque<EventId>> = HashMap::new();
    let mut processed = 0usize;
    let mut cancelled = None;

    loop {
        if let Some(reason) = cancel.cancelled() {
            debug!(%reason, processed, "analysis cancelled mid-walk");
            if reason == CancelReason::OutOfMemory {
                findings.push(Finding::new(FindingKind::CancelledOutOfMemory, vec![]));
            }
            cancelled = Some(reason);
            break;
        }
        if cfg.max_events.is_some_and(|max| processed >= max) {
            break;
        }
        let Some(id) = pending.pop_front().or_else(|| schedule.next()) else { break };
        if consumed.contains(&id) {
            continue;
        }
        let routine = id.routine;
        if deferred_heads.contains_key(&routine) {
            // the routine waits for a held-back channel operation; keep its order intact
            backlog.entry(routine).or_default().push_back(id);
            continue;
        }

        let step = engine.process(trace, id, &mut edges);
        flush_edges(&mut edges, &mut pog, &mut csst);
        if step.deferred {
            deferred_heads.insert(routine, id);
            continue;
        }

        processed += 1;
        deps.observe(trace.event(id), cfg.lockset_on_try);
        if let Some(partner) = step.consumed {
            consumed.insert(partner);
            schedule.advance_past(partner);
            processed += 1;
            deps.observe(trace.event(partner), cfg.lockset_on_try);
        }

        let drained = engine.drain_ready(trace, &mut edges);
        flush_edges(&mut edges, &mut pog, &mut csst);
        for done in drained {
            processed += 1;
            deferred_heads.remove(&done.routine);
            deps.observe(trace.event(done), cfg.lockset_on_try);
            if let Some(queue) = backlog.remove(&done.routine) {
                for (offset, queued) in queue.into_iter().enumerate() {
                    pending.insert(offset, queued);
                }
            }
        }
    }

    if cfg.cross_validate {
        cross_validate(trace, pog.as_ref(), csst.as_ref())?;
    }

    if cancelled.is_none() {
        cache_concurrent_counts(trace);
        let ctx = CheckContext { trace, state: engine.state(), cfg };
        run_checks(&ctx, &deps, &mut findings);
    }

    Ok(Analysis { findings, cancelled, events_processed: processed, pog, csst })
}

fn flush_edges(edges: &mut EdgeBuf, pog: &mut Option<Pog>, csst: &mut Option<CsstPair>) {
    for edge in edges.drain(..) {
        if let Some(pog) = pog.as_mut() {
            pog.add_edge(edge);
        }
        if let Some(csst) = csst.as_mut() {
            csst.add_edge(edge);
        }
    }
}

// SCENARIO CHECK BOUNDARY
// ================================================================================================

fn run_checks(ctx: &CheckContext<'_>, deps: &LockDependencies, findings: &mut Vec<Finding>) {
    let mut guarded = |name: &'static str, check: &mut dyn FnMut(&mut Vec<Finding>)| {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut produced = Vec::new();
            check(&mut produced);
            produced
        }));
        match outcome {
            Ok(mut produced) => findings.append(&mut produced),
            Err(_) => {
                error!(check = name, "scenario check panicked; continuing without its findings");
                findings.push(
                    Finding::new(FindingKind::ScenarioInternal, vec![])
                        .with_note(format!("check '{name}' failed internally")),
                );
            },
        }
    };

    guarded("closed_channel", &mut |out| checks::channel::run(ctx, out));
    guarded("unlock", &mut |out| checks::mutex::run(ctx, out));
    guarded("waitgroup", &mut |out| checks::waitgroup::run(ctx, out));
    guarded("resource_deadlock", &mut |out| checks::deadlock::run(ctx, deps, out));
    guarded("mixed_deadlock", &mut |out| checks::deadlock::mixed(ctx, out));
    guarded("leaks", &mut |out| checks::leak::run(ctx, out));
}

// CONCURRENCY COUNTS
// ================================================================================================

/// Fills the per-event concurrency-count caches the fuzzer's quality heuristics read.
fn cache_concurrent_counts(trace: &mut Trace) {
    let ids: Vec<EventId> =
        trace.events().filter(|event| event.vc.is_some()).map(|event| event.id()).collect();
    let mut strong = vec![0u32; ids.len()];
    let mut weak = vec![0u32; ids.len()];
    for i in 0..ids.len() {
        for j in i + 1..ids.len() {
            let a = trace.event(ids[i]);
            let b = trace.event(ids[j]);
            if crate::hb::concurrent(a, b) {
                strong[i] += 1;
                strong[j] += 1;
            }
            if a.weak_clock().relation(b.weak_clock()) == skein_core::ClockRelation::Concurrent {
                weak[i] += 1;
                weak[j] += 1;
            }
        }
    }
    for (idx, id) in ids.iter().enumerate() {
        let event = trace.event_mut(*id);
        event.num_concurrent = Some(strong[idx]);
        event.num_concurrent_weak = Some(weak[idx]);
    }
}

// CROSS-VALIDATION
// ================================================================================================

/// Compares every enabled representation against the vector clocks on all analyzed event pairs.
fn cross_validate(
    trace: &Trace,
    pog: Option<&Pog>,
    csst: Option<&CsstPair>,
) -> Result<(), AnalysisError> {
    if pog.is_none() && csst.is_none() {
        return Ok(());
    }
    let ids: Vec<EventId> =
        trace.events().filter(|event| event.vc.is_some()).map(|event| event.id()).collect();

    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            let (ev_a, ev_b) = (trace.event(a), trace.event(b));
            let vc = crate::hb::relation(ev_a, ev_b);
            let wvc = crate::hb::relation_weak(ev_a, ev_b);

            if let Some(pog) = pog {
                check_agreement(a, b, vc, "pog", pog.relation(a, b))?;
                check_agreement(a, b, wvc, "pog-weak", pog.relation_weak(a, b))?;
            }
            if let Some(csst) = csst {
                check_agreement(a, b, vc, "csst", csst.strong.relation(a, b))?;
                check_agreement(a, b, wvc, "csst-weak", csst.weak.relation(a, b))?;
            }
        }
    }
    Ok(())
}

fn check_agreement(
    a: EventId,
    b: EventId,
    vc: skein_core::ClockRelation,
    path: &'static str,
    other: skein_core::ClockRelation,
) -> Result<(), AnalysisError> {
    if vc == other {
        Ok(())
    } else {
        Err(AnalysisError::HbPathDisagree { a, b, vc, path, other })
    }
}
