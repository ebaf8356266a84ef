use core::fmt::{self, Display};

use skein_core::{ClockRelation, EventId};

// CANCEL REASON
// ================================================================================================

/// Why a cooperative cancellation was requested.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    OutOfMemory,
    UserAbort,
}

impl Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => f.write_str("out of memory"),
            Self::UserAbort => f.write_str("user abort"),
        }
    }
}

// ANALYSIS ERROR
// ================================================================================================

/// Hard failures of the analysis pipeline.
///
/// Scenario-check panics are not represented here: the dispatcher converts them into
/// `ScenarioInternal` findings and keeps going. A disagreement between happens-before paths, by
/// contrast, means the engine itself is wrong and aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(
        "happens-before paths disagree on ({a}, {b}): vector clocks say {vc}, {path} says {other}"
    )]
    HbPathDisagree {
        a: EventId,
        b: EventId,
        vc: ClockRelation,
        path: &'static str,
        other: ClockRelation,
    },
    #[error("analysis cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("event reference {0} points outside the trace")]
    DanglingReference(EventId),
}
