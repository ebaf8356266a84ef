//! Core data model of the skein trace analyzer: vector clocks, typed trace events, per-routine
//! streams with the global analysis iterator, the trace text format, and severity-tagged
//! findings.

/// This is an implementation of `std::assert_matches::assert_matches`
/// so it can be removed when that feature stabilizes upstream
#[macro_export]
macro_rules! assert_matches {
    ($left:expr, $(|)? $( $pattern:pat_param )|+ $( if $guard: expr )? $(,)?) => {
        match $left {
            $( $pattern )|+ $( if $guard )? => {}
            ref left_val => {
                panic!(r#"
assertion failed: `(left matches right)`
    left: `{:?}`,
    right: `{}`"#, left_val, stringify!($($pattern)|+ $(if $guard)?));
            }
        }
    };

    ($left:expr, $(|)? $( $pattern:pat_param )|+ $( if $guard: expr )?, $msg:literal $(,)?) => {
        match $left {
            $( $pattern )|+ $( if $guard )? => {}
            ref left_val => {
                panic!(concat!(r#"
assertion failed: `(left matches right)`
    left: `{:?}`,
    right: `{}`
"#, $msg), left_val, stringify!($($pattern)|+ $(if $guard)?));
            }
        }
    };
}

pub mod clock;
pub mod event;
pub mod results;
pub mod trace;

mod errors;
pub use errors::{ParseError, ParseErrorKind, SchemaError, TraceError};

mod ids;
pub use ids::{EventId, ObjectId, RoutineId};

pub use clock::{ClockRelation, VectorClock};
pub use event::{Event, EventKind};
pub use results::{Finding, FindingKind, Severity, TraceRef};
pub use trace::{ScheduleIter, Trace};
