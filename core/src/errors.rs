use miette::{Diagnostic, NamedSource, SourceSpan};

use crate::ids::{EventId, ObjectId, RoutineId};

// PARSE ERROR
// ================================================================================================

/// Error raised while parsing the trace text format.
///
/// Carries the trace text as diagnostic source code with the offending record labeled, so the CLI
/// can render a span-annotated report.
#[derive(Debug, thiserror::Error, Diagnostic)]
#[error("failed to parse trace")]
#[diagnostic(code(skein::trace::parse))]
pub struct ParseError {
    #[source_code]
    pub src: NamedSource<String>,
    #[label("{kind}")]
    pub span: SourceSpan,
    pub kind: ParseErrorKind,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseErrorKind {
    #[error("unrecognized record kind '{0}'")]
    UnknownRecordKind(char),
    #[error("empty record")]
    EmptyRecord,
    #[error("record has {found} fields, expected {expected}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid integer in field '{field}': '{value}'")]
    InvalidInt { field: &'static str, value: String },
    #[error("invalid boolean in field '{field}': '{value}' (expected 't' or 'f')")]
    InvalidBool { field: &'static str, value: String },
    #[error("invalid operation code '{value}' for record kind '{record}'")]
    InvalidOpCode { record: char, value: String },
    #[error("position field '{0}' is missing the ':' separator")]
    InvalidPosition(String),
    #[error("invalid select case '{0}'")]
    InvalidSelectCase(String),
    #[error("select chose case {chosen} but only {cases} cases were recorded")]
    ChosenCaseOutOfRange { chosen: i64, cases: usize },
}

// TRACE ERROR
// ================================================================================================

/// Any error that aborts loading of a trace: a syntax error or a schema violation.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum TraceError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Schema(#[from] SchemaError),
}

// SCHEMA ERROR
// ================================================================================================

/// Error raised when a syntactically valid trace violates the structural invariants of the event
/// model.
#[derive(Debug, thiserror::Error, Diagnostic)]
pub enum SchemaError {
    #[error("routine {routine}: event {index} has t_pre {t_pre} not after its predecessor's {prev}")]
    #[diagnostic(code(skein::trace::schema))]
    NonMonotonicTimestamps { routine: RoutineId, index: u32, t_pre: u64, prev: u64 },
    #[error("routine {0} has events but no fork introduces it")]
    #[diagnostic(code(skein::trace::schema))]
    MissingFork(RoutineId),
    #[error("fork at {at} spawns routine {child}, which is outside the trace")]
    #[diagnostic(code(skein::trace::schema))]
    ForkOutOfRange { at: EventId, child: RoutineId },
    #[error("routine {routine} spawned more than once (forks at {first} and {second})")]
    #[diagnostic(code(skein::trace::schema))]
    DuplicateFork { routine: RoutineId, first: EventId, second: EventId },
    #[error(
        "unbuffered channel {object}: completed {op} at {at} (op id {op_id}) has no matching partner"
    )]
    #[diagnostic(code(skein::trace::schema))]
    UnmatchedCommunication { object: ObjectId, op: &'static str, at: EventId, op_id: u64 },
    #[error("event reference {0} points outside the trace")]
    #[diagnostic(code(skein::trace::schema))]
    DanglingReference(EventId),
    #[error("malformed machine result line: {0}")]
    #[diagnostic(code(skein::results::machine))]
    MalformedResultLine(String),
}
