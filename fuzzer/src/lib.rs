//! Guided fuzzing core of skein: schedule constraints extracted from the happens-before
//! analysis, mutation strategies, and equivalence-class pruning of candidate schedules.

pub mod config;
pub mod constraint;
pub mod equivalence;
pub mod mutation;
pub mod strategies;

mod session;
pub use session::{FuzzPlan, FuzzRun, FuzzSession, PlannedMutation};

pub use config::{FuzzerConfig, FuzzingMode};
pub use constraint::{ScheduleChain, render_replay};
pub use equivalence::{IndependenceOracle, Signature, SignatureSet};
pub use mutation::Mutation;
