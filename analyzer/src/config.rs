use serde::Deserialize;

// CHECK SET
// ================================================================================================

/// Which scenario checks are armed. All checks run by default.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct CheckSet {
    pub closed_channel: bool,
    pub unlock: bool,
    pub waitgroup: bool,
    pub resource_deadlock: bool,
    pub mixed_deadlock: bool,
    pub leaks: bool,
    pub concurrent_recv: bool,
}

impl Default for CheckSet {
    fn default() -> Self {
        Self {
            closed_channel: true,
            unlock: true,
            waitgroup: true,
            resource_deadlock: true,
            mixed_deadlock: true,
            leaks: true,
            concurrent_recv: true,
        }
    }
}

// ANALYZER CONFIG
// ================================================================================================

/// Configuration of one analysis run.
///
/// The vector-clock path always runs, since its update rules own the shared happens-before state;
/// the graph and segment-tree paths are observers that can be switched on per run. Behaviors the
/// recorded runtime leaves ambiguous are explicit fields rather than hard-coded choices.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AnalyzerConfig {
    /// Build the partial-order graph alongside the vector clocks.
    pub build_pog: bool,
    /// Build the collective sparse segment trees alongside the vector clocks.
    pub build_csst: bool,
    /// Compare every enabled happens-before path pairwise after the run; a mismatch aborts with
    /// [crate::AnalysisError::HbPathDisagree].
    pub cross_validate: bool,
    /// Add per-routine FIFO ordering edges between operations on the same buffered channel.
    pub fifo_channel_edges: bool,
    /// Increment the strong clock a second time on the receive-on-closed path.
    pub double_increment_on_closed_recv: bool,
    /// Record lock dependencies for failed try-lock operations as well.
    pub lockset_on_try: bool,
    /// Skip atomic events entirely.
    pub ignore_atomics: bool,
    /// Abort the walk after this many events, if set.
    pub max_events: Option<usize>,
    pub checks: CheckSet,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            build_pog: false,
            build_csst: false,
            cross_validate: false,
            fifo_channel_edges: true,
            double_increment_on_closed_recv: false,
            lockset_on_try: true,
            ignore_atomics: false,
            max_events: None,
            checks: CheckSet::default(),
        }
    }
}

impl AnalyzerConfig {
    /// Configuration with every happens-before representation built and cross-validated.
    pub fn all_paths() -> Self {
        Self {
            build_pog: true,
            build_csst: true,
            cross_validate: true,
            ..Self::default()
        }
    }
}
