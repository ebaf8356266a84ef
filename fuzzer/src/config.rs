use serde::Deserialize;

// FUZZING MODE
// ================================================================================================

/// Which mutation family drives the session.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
pub enum FuzzingMode {
    /// Select-flip fuzzing.
    #[default]
    GFuzz,
    /// Delay mutations on operations with concurrent counterparts.
    Flow,
    /// Schedule-chain fuzzing with adjacent-independent swaps.
    GoPie,
    /// Schedule chains restricted to operations that share an object.
    GoCR,
    /// Schedule chains filtered through the happens-before relation.
    GoPieHB,
}

impl FuzzingMode {
    pub fn from_flag(value: &str) -> Option<Self> {
        match value {
            "GFuzz" => Some(Self::GFuzz),
            "Flow" => Some(Self::Flow),
            "GoPie" => Some(Self::GoPie),
            "GoCR" => Some(Self::GoCR),
            "GoPieHB" => Some(Self::GoPieHB),
            _ => None,
        }
    }

    /// The chain families all mutate through schedule chains.
    pub fn is_chain_family(&self) -> bool {
        matches!(self, Self::GoPie | Self::GoCR | Self::GoPieHB)
    }
}

// FUZZER CONFIG
// ================================================================================================

/// Budget knobs of the fuzzing core.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct FuzzerConfig {
    pub mode: FuzzingMode,
    /// Upper bound on re-executions the session may request.
    pub max_runs: usize,
    /// Mutations shipped with one re-execution.
    pub max_muts_per_run: usize,
    /// Mutations derived from a single constraint.
    pub max_muts_per_constraint: usize,
    /// Constraints extracted per analyzed trace.
    pub max_constraints: usize,
    /// Length of a schedule chain.
    pub chain_length: usize,
    /// Only chain operations of the same kind.
    pub same_type_in_chain_only: bool,
    /// Stop the whole session at the first confirmed bug.
    pub cancel_on_first_bug: bool,
    /// Probability of flipping a select's chosen case.
    pub flip_probability: f64,
    /// Seed for the session's random generator; fixed seeds reproduce mutation sets exactly.
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            mode: FuzzingMode::GFuzz,
            max_runs: 100,
            max_muts_per_run: 20,
            max_muts_per_constraint: 4,
            max_constraints: 64,
            chain_length: 6,
            same_type_in_chain_only: false,
            cancel_on_first_bug: false,
            flip_probability: 0.35,
            seed: 0x5eed,
        }
    }
}
