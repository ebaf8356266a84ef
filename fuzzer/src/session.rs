use rand::{SeedableRng, rngs::StdRng};
use skein_core::Trace;
use tracing::debug;

use crate::{
    config::{FuzzerConfig, FuzzingMode},
    constraint::{ScheduleChain, render_replay},
    equivalence::{IndependenceOracle, Signature, SignatureSet, schedule_signature},
    mutation::Mutation,
    strategies,
};

// PLANNED OUTPUT
// ================================================================================================

/// One deduplicated mutation with its canonical identity.
#[derive(Clone, Debug)]
pub struct PlannedMutation {
    pub mutation: Mutation,
    pub signature: Signature,
}

/// One re-execution request: a batch of mutations within the per-run budget.
#[derive(Clone, Debug, Default)]
pub struct FuzzRun {
    pub mutations: Vec<PlannedMutation>,
}

impl FuzzRun {
    /// The concatenated scheduling chain of the run's mutations.
    pub fn chain(&self) -> ScheduleChain {
        let events = self
            .mutations
            .iter()
            .flat_map(|planned| planned.mutation.chain().events)
            .collect();
        ScheduleChain::new(events)
    }

    /// Renders the replay-directives file for this run.
    pub fn replay_directives(&self, trace: &Trace, start_time: u64) -> String {
        render_replay(trace, &self.chain(), start_time)
    }
}

/// Result of planning one fuzzing iteration.
#[derive(Debug, Default)]
pub struct FuzzPlan {
    pub runs: Vec<FuzzRun>,
    /// Mutations dropped because an equivalent schedule was already dispatched.
    pub pruned: usize,
}

// FUZZ SESSION
// ================================================================================================

/// Long-lived fuzzing state across all runs of one program under test: the seeded generator, the
/// equivalence dedup set, and the run budget.
#[derive(Debug)]
pub struct FuzzSession {
    cfg: FuzzerConfig,
    rng: StdRng,
    seen: SignatureSet,
    runs_planned: usize,
}

impl FuzzSession {
    pub fn new(cfg: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self { cfg, rng, seen: SignatureSet::new(), runs_planned: 0 }
    }

    pub fn cfg(&self) -> &FuzzerConfig {
        &self.cfg
    }

    /// True once the session's run budget is spent.
    pub fn exhausted(&self) -> bool {
        self.runs_planned >= self.cfg.max_runs
    }

    /// Extracts mutations for the next re-executions from an analyzed trace.
    ///
    /// Every mutation is identified by its canonical schedule signature; a signature already seen
    /// in this session prunes the mutation instead of scheduling it again.
    pub fn plan(&mut self, trace: &Trace) -> FuzzPlan {
        if self.exhausted() {
            return FuzzPlan::default();
        }
        let oracle = IndependenceOracle::new(trace);
        let mutations = match self.cfg.mode {
            FuzzingMode::GFuzz => strategies::gfuzz::mutations(trace, &self.cfg, &mut self.rng),
            FuzzingMode::Flow => strategies::flow::mutations(trace, &self.cfg),
            FuzzingMode::GoPie | FuzzingMode::GoCR | FuzzingMode::GoPieHB => {
                strategies::gopie::mutations(trace, &self.cfg, &oracle, &mut self.rng)
            },
        };

        let mut plan = FuzzPlan::default();
        let mut current = FuzzRun::default();
        for mutation in mutations {
            let signature =
                schedule_signature(trace, &oracle, &mutation.chain(), &mutation_tag(&mutation));
            if !self.seen.insert(signature) {
                plan.pruned += 1;
                continue;
            }
            current.mutations.push(PlannedMutation { mutation, signature });
            if current.mutations.len() >= self.cfg.max_muts_per_run.max(1) {
                if !self.push_run(&mut plan, std::mem::take(&mut current)) {
                    break;
                }
            }
        }
        if !current.mutations.is_empty() {
            self.push_run(&mut plan, current);
        }
        debug!(
            runs = plan.runs.len(),
            pruned = plan.pruned,
            total_signatures = self.seen.len(),
            "planned fuzzing iteration"
        );
        plan
    }

    fn push_run(&mut self, plan: &mut FuzzPlan, run: FuzzRun) -> bool {
        if self.exhausted() {
            return false;
        }
        self.runs_planned += 1;
        plan.runs.push(run);
        !self.exhausted()
    }
}

/// Distinguishes mutation flavors that share a chain in the signature space.
fn mutation_tag(mutation: &Mutation) -> String {
    match mutation {
        Mutation::FlipSelect { chosen, .. } => format!("flip:{chosen}"),
        Mutation::Delay { past_occurrence, .. } => format!("delay:{past_occurrence}"),
        Mutation::Reorder { .. } => "reorder".to_string(),
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use skein_analyzer::{AnalyzerConfig, CancelFlag, analyze};
    use skein_test_utils::TraceBuilder;

    use super::*;

    fn racy_trace() -> Trace {
        let mut builder = TraceBuilder::new(3);
        builder.fork(1, 2);
        builder.fork(1, 3);
        builder.lock(2, 40);
        builder.unlock(2, 40);
        builder.lock(3, 40);
        builder.unlock(3, 40);
        builder.once(2, 50, true);
        builder.once(3, 50, false);
        builder.end(1);
        builder.end(2);
        builder.end(3);
        let mut trace = builder.build();
        analyze(&mut trace, &AnalyzerConfig::default(), &CancelFlag::new()).unwrap();
        trace
    }

    fn flow_config() -> FuzzerConfig {
        FuzzerConfig { mode: FuzzingMode::Flow, ..FuzzerConfig::default() }
    }

    #[test]
    fn fixed_seed_reproduces_the_plan() {
        let trace = racy_trace();
        let plan_a = FuzzSession::new(flow_config()).plan(&trace);
        let plan_b = FuzzSession::new(flow_config()).plan(&trace);
        let sigs = |plan: &FuzzPlan| {
            plan.runs
                .iter()
                .flat_map(|run| run.mutations.iter().map(|m| m.signature))
                .collect::<Vec<_>>()
        };
        assert_eq!(sigs(&plan_a), sigs(&plan_b));
    }

    #[test]
    fn replanning_the_same_trace_is_fully_pruned() {
        let trace = racy_trace();
        let mut session = FuzzSession::new(flow_config());
        let first = session.plan(&trace);
        let planned: usize = first.runs.iter().map(|run| run.mutations.len()).sum();
        assert!(planned > 0, "expected the racy trace to yield mutations");

        let second = session.plan(&trace);
        assert_eq!(second.runs.len(), 0);
        assert_eq!(second.pruned, planned);
    }

    #[test]
    fn run_budget_caps_planning() {
        let trace = racy_trace();
        let cfg = FuzzerConfig {
            mode: FuzzingMode::Flow,
            max_runs: 1,
            max_muts_per_run: 1,
            ..FuzzerConfig::default()
        };
        let mut session = FuzzSession::new(cfg);
        let plan = session.plan(&trace);
        assert_eq!(plan.runs.len(), 1);
        assert!(session.exhausted());
    }
}
