//! Schedule-chain fuzzing: grow a chain of operations worth scheduling together, then derive
//! variants by swapping adjacent independent operations.

use std::mem;

use rand::{Rng, rngs::StdRng};
use skein_core::{Event, Trace};

use crate::{
    config::{FuzzerConfig, FuzzingMode},
    constraint::ScheduleChain,
    equivalence::IndependenceOracle,
    mutation::Mutation,
};

use super::{concurrent, mutation_pool};

pub fn mutations(
    trace: &Trace,
    cfg: &FuzzerConfig,
    oracle: &IndependenceOracle,
    rng: &mut StdRng,
) -> Vec<Mutation> {
    let pool = mutation_pool(trace);
    if pool.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    for _ in 0..cfg.max_constraints {
        let seed = pool[rng.random_range(0..pool.len())];
        let chain = grow_chain(&pool, seed, cfg, rng);
        if chain.len() < 2 {
            continue;
        }
        emit_variants(trace, oracle, cfg, chain, &mut out);
    }
    out
}

/// Iteratively extends the chain with a concurrent successor of high quality (many concurrent
/// partners), honoring the mode's candidate filter.
fn grow_chain<'a>(
    pool: &[&'a Event],
    seed: &'a Event,
    cfg: &FuzzerConfig,
    rng: &mut StdRng,
) -> ScheduleChain {
    let mut chain = vec![seed.id()];
    let mut current = seed;
    while chain.len() < cfg.chain_length.max(2) {
        let mut candidates: Vec<&Event> = pool
            .iter()
            .copied()
            .filter(|event| !chain.contains(&event.id()))
            .filter(|event| event.routine() != current.routine())
            .filter(|event| admissible(cfg.mode, current, event))
            .filter(|event| {
                !cfg.same_type_in_chain_only
                    || mem::discriminant(&event.kind) == mem::discriminant(&current.kind)
            })
            .collect();
        if candidates.is_empty() {
            break;
        }
        candidates.sort_by_key(|event| std::cmp::Reverse(event.num_concurrent.unwrap_or(0)));
        let quality_cut = candidates.len().min(3);
        let next = candidates[rng.random_range(0..quality_cut)];
        chain.push(next.id());
        current = next;
    }
    ScheduleChain::new(chain)
}

/// Candidate filter per mode family: plain chains take any cross-routine neighbor, the
/// happens-before variants only operations the relation leaves unordered, and the
/// channel-relation variant additionally requires a shared object.
fn admissible(mode: FuzzingMode, current: &Event, candidate: &Event) -> bool {
    match mode {
        FuzzingMode::GoPie => true,
        FuzzingMode::GoPieHB => concurrent(current, candidate),
        FuzzingMode::GoCR => {
            concurrent(current, candidate)
                && match (current.object(), candidate.object()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
        },
        // the chain strategies are only invoked for the chain family
        FuzzingMode::GFuzz | FuzzingMode::Flow => false,
    }
}

/// The chain itself plus up to `max_muts_per_constraint - 1` adjacent-independent swaps.
fn emit_variants(
    trace: &Trace,
    oracle: &IndependenceOracle,
    cfg: &FuzzerConfig,
    chain: ScheduleChain,
    out: &mut Vec<Mutation>,
) {
    let mut emitted = 1;
    out.push(Mutation::Reorder { chain: chain.clone() });
    for i in 1..chain.len() {
        if emitted >= cfg.max_muts_per_constraint.max(1) {
            break;
        }
        let (a, b) = (chain.events[i - 1], chain.events[i]);
        if oracle.independent(trace.event(a), trace.event(b)) {
            let mut swapped = chain.events.clone();
            swapped.swap(i - 1, i);
            out.push(Mutation::Reorder { chain: ScheduleChain::new(swapped) });
            emitted += 1;
        }
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use skein_analyzer::{AnalyzerConfig, CancelFlag, analyze};
    use skein_core::event::AtomicOp;
    use skein_test_utils::TraceBuilder;

    use super::*;

    /// Three routines hammering unrelated objects; everything cross-routine is concurrent.
    fn concurrent_trace() -> Trace {
        let mut builder = TraceBuilder::new(3);
        builder.fork(1, 2);
        builder.fork(1, 3);
        builder.atomic(2, 90, AtomicOp::Load);
        builder.atomic(3, 90, AtomicOp::Load);
        builder.lock(2, 91);
        builder.unlock(2, 91);
        builder.once(3, 92, true);
        builder.end(1);
        builder.end(2);
        builder.end(3);
        let mut trace = builder.build();
        analyze(&mut trace, &AnalyzerConfig::default(), &CancelFlag::new()).unwrap();
        trace
    }

    #[test]
    fn chains_span_routines_and_respect_length() {
        let trace = concurrent_trace();
        let oracle = IndependenceOracle::new(&trace);
        let cfg = FuzzerConfig {
            mode: FuzzingMode::GoPie,
            chain_length: 3,
            max_constraints: 8,
            // base chains only; swap variants may reorder within a routine
            max_muts_per_constraint: 1,
            ..FuzzerConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(7);
        let mutations = mutations(&trace, &cfg, &oracle, &mut rng);
        assert!(!mutations.is_empty());
        for mutation in &mutations {
            let Mutation::Reorder { chain } = mutation else { panic!("chain strategy emits reorders") };
            assert!(chain.len() >= 2 && chain.len() <= 3);
            // consecutive chain elements never share a routine
            for pair in chain.events.windows(2) {
                assert_ne!(pair[0].routine, pair[1].routine);
            }
        }
    }

    #[test]
    fn hb_variant_only_chains_concurrent_events() {
        let trace = concurrent_trace();
        let oracle = IndependenceOracle::new(&trace);
        let cfg = FuzzerConfig {
            mode: FuzzingMode::GoPieHB,
            chain_length: 4,
            max_constraints: 8,
            max_muts_per_constraint: 1,
            ..FuzzerConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        for mutation in mutations(&trace, &cfg, &oracle, &mut rng) {
            let Mutation::Reorder { chain } = mutation else { unreachable!() };
            for pair in chain.events.windows(2) {
                let (a, b) = (trace.event(pair[0]), trace.event(pair[1]));
                assert!(concurrent(a, b), "chained events must be unordered");
            }
        }
    }
}
