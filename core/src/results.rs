use std::{fmt, sync::Arc};

use crate::{
    errors::SchemaError,
    ids::{EventId, RoutineId},
};

// SEVERITY
// ================================================================================================

/// Severity of a finding, in decreasing order of importance.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Critical,
    Warning,
    Information,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::Warning => "Warning",
            Self::Information => "Information",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "Critical" => Some(Self::Critical),
            "Warning" => Some(Self::Warning),
            "Information" => Some(Self::Information),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// FINDING KIND
// ================================================================================================

/// The bug classes and status records the analysis can report.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FindingKind {
    SendOnClosed,
    RecvOnClosed,
    CloseOnClosed,
    PossibleSendOnClosed,
    PossibleRecvOnClosed,
    UnlockOfNotLockedMutex,
    NegativeWaitGroup,
    ResourceDeadlock,
    MixedDeadlock,
    ConcurrentRecv,
    LeakUnbufferedChannel,
    LeakBufferedChannel,
    LeakSelect,
    LeakMutex,
    LeakCond,
    LeakWaitGroup,
    CancelledOutOfMemory,
    ScenarioInternal,
}

impl FindingKind {
    /// Stable identifier used in the machine result format.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SendOnClosed => "send_on_closed",
            Self::RecvOnClosed => "recv_on_closed",
            Self::CloseOnClosed => "close_on_closed",
            Self::PossibleSendOnClosed => "possible_send_on_closed",
            Self::PossibleRecvOnClosed => "possible_recv_on_closed",
            Self::UnlockOfNotLockedMutex => "unlock_of_not_locked_mutex",
            Self::NegativeWaitGroup => "negative_waitgroup",
            Self::ResourceDeadlock => "resource_deadlock",
            Self::MixedDeadlock => "mixed_deadlock",
            Self::ConcurrentRecv => "concurrent_recv",
            Self::LeakUnbufferedChannel => "leak_unbuffered_channel",
            Self::LeakBufferedChannel => "leak_buffered_channel",
            Self::LeakSelect => "leak_select",
            Self::LeakMutex => "leak_mutex",
            Self::LeakCond => "leak_cond",
            Self::LeakWaitGroup => "leak_waitgroup",
            Self::CancelledOutOfMemory => "cancelled_out_of_memory",
            Self::ScenarioInternal => "scenario_internal",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "send_on_closed" => Self::SendOnClosed,
            "recv_on_closed" => Self::RecvOnClosed,
            "close_on_closed" => Self::CloseOnClosed,
            "possible_send_on_closed" => Self::PossibleSendOnClosed,
            "possible_recv_on_closed" => Self::PossibleRecvOnClosed,
            "unlock_of_not_locked_mutex" => Self::UnlockOfNotLockedMutex,
            "negative_waitgroup" => Self::NegativeWaitGroup,
            "resource_deadlock" => Self::ResourceDeadlock,
            "mixed_deadlock" => Self::MixedDeadlock,
            "concurrent_recv" => Self::ConcurrentRecv,
            "leak_unbuffered_channel" => Self::LeakUnbufferedChannel,
            "leak_buffered_channel" => Self::LeakBufferedChannel,
            "leak_select" => Self::LeakSelect,
            "leak_mutex" => Self::LeakMutex,
            "leak_cond" => Self::LeakCond,
            "leak_waitgroup" => Self::LeakWaitGroup,
            "cancelled_out_of_memory" => Self::CancelledOutOfMemory,
            "scenario_internal" => Self::ScenarioInternal,
            _ => return None,
        })
    }

    /// Severity assigned unless the producing check overrides it.
    pub fn default_severity(&self) -> Severity {
        match self {
            Self::SendOnClosed
            | Self::CloseOnClosed
            | Self::PossibleSendOnClosed
            | Self::UnlockOfNotLockedMutex
            | Self::NegativeWaitGroup
            | Self::ResourceDeadlock => Severity::Critical,
            Self::RecvOnClosed
            | Self::PossibleRecvOnClosed
            | Self::ConcurrentRecv
            | Self::LeakUnbufferedChannel
            | Self::LeakBufferedChannel
            | Self::LeakSelect
            | Self::LeakMutex
            | Self::LeakCond
            | Self::LeakWaitGroup
            | Self::ScenarioInternal => Severity::Warning,
            Self::MixedDeadlock | Self::CancelledOutOfMemory => Severity::Information,
        }
    }

    /// One-line prose description used in the readable report.
    pub fn headline(&self) -> &'static str {
        match self {
            Self::SendOnClosed => "send on closed channel",
            Self::RecvOnClosed => "receive on closed channel",
            Self::CloseOnClosed => "close of closed channel",
            Self::PossibleSendOnClosed => "possible send on closed channel",
            Self::PossibleRecvOnClosed => "possible receive on closed channel",
            Self::UnlockOfNotLockedMutex => "unlock of not locked mutex",
            Self::NegativeWaitGroup => "possible negative wait-group counter",
            Self::ResourceDeadlock => "cyclic lock acquisition (resource deadlock)",
            Self::MixedDeadlock => "channel operation entangled with a shared mutex",
            Self::ConcurrentRecv => "concurrent receives on the same channel",
            Self::LeakUnbufferedChannel => "routine blocked forever on an unbuffered channel",
            Self::LeakBufferedChannel => "routine blocked forever on a buffered channel",
            Self::LeakSelect => "routine blocked forever in a select",
            Self::LeakMutex => "routine blocked forever on a mutex",
            Self::LeakCond => "routine blocked forever in a conditional-variable wait",
            Self::LeakWaitGroup => "routine blocked forever in a wait-group wait",
            Self::CancelledOutOfMemory => "analysis cancelled: memory limit reached",
            Self::ScenarioInternal => "scenario check failed internally",
        }
    }
}

// TRACE REF
// ================================================================================================

/// Provenance of a finding operand: the event plus its source position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceRef {
    pub event: EventId,
    pub file: Arc<str>,
    pub line: u32,
}

impl TraceRef {
    pub fn new(event: EventId, file: Arc<str>, line: u32) -> Self {
        Self { event, file, line }
    }

    fn machine(&self) -> String {
        format!("{}:{}:{}:{}", self.event.routine, self.event.index, self.file, self.line)
    }

    fn parse_machine(text: &str) -> Option<Self> {
        let mut parts = text.splitn(3, ':');
        let routine: u32 = parts.next()?.parse().ok()?;
        let index: u32 = parts.next()?.parse().ok()?;
        let (file, line) = parts.next()?.rsplit_once(':')?;
        Some(Self {
            event: EventId::new(RoutineId::new(routine), index),
            file: Arc::from(file),
            line: line.parse().ok()?,
        })
    }
}

impl fmt::Display for TraceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "routine {} at {}:{}", self.event.routine, self.file, self.line)
    }
}

// FINDING
// ================================================================================================

/// One analysis result: a bug class, its severity, and the trace elements it points at.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub operands: Vec<TraceRef>,
    /// Free-form context shown only in the readable report.
    pub note: Option<String>,
}

impl Finding {
    pub fn new(kind: FindingKind, operands: Vec<TraceRef>) -> Self {
        Self { kind, severity: kind.default_severity(), operands, note: None }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Renders the `kind;severity;operand|operand|…` machine format line.
    pub fn machine_line(&self) -> String {
        let operands: Vec<String> = self.operands.iter().map(TraceRef::machine).collect();
        format!("{};{};{}", self.kind.code(), self.severity, operands.join("|"))
    }

    /// Parses a machine format line back into a finding. The readable-only note is not part of
    /// the machine format and comes back empty.
    pub fn parse_machine_line(line: &str) -> Result<Self, SchemaError> {
        let malformed = || SchemaError::MalformedResultLine(line.to_string());
        let mut parts = line.splitn(3, ';');
        let kind = FindingKind::from_code(parts.next().ok_or_else(malformed)?)
            .ok_or_else(malformed)?;
        let severity =
            Severity::from_str(parts.next().ok_or_else(malformed)?).ok_or_else(malformed)?;
        let operand_text = parts.next().ok_or_else(malformed)?;
        let mut operands = Vec::new();
        for operand in operand_text.split('|').filter(|operand| !operand.is_empty()) {
            operands.push(TraceRef::parse_machine(operand).ok_or_else(malformed)?);
        }
        Ok(Self { kind, severity, operands, note: None })
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn operand(routine: u32, index: u32, file: &str, line: u32) -> TraceRef {
        TraceRef::new(EventId::new(RoutineId::new(routine), index), Arc::from(file), line)
    }

    #[test]
    fn machine_line_round_trips() {
        let finding = Finding::new(
            FindingKind::SendOnClosed,
            vec![operand(2, 4, "pkg/chan.go", 17), operand(1, 1, "main.go", 9)],
        );
        let line = finding.machine_line();
        assert_eq!(line, "send_on_closed;Critical;2:4:pkg/chan.go:17|1:1:main.go:9");
        let reparsed = Finding::parse_machine_line(&line).unwrap();
        assert_eq!(reparsed, finding);
        assert_eq!(reparsed.machine_line(), line);
    }

    #[test]
    fn operand_files_may_contain_colons() {
        let finding =
            Finding::new(FindingKind::ConcurrentRecv, vec![operand(3, 0, "odd:name.go", 4)]);
        let reparsed = Finding::parse_machine_line(&finding.machine_line()).unwrap();
        assert_eq!(reparsed.operands[0].file.as_ref(), "odd:name.go");
        assert_eq!(reparsed.operands[0].line, 4);
    }

    #[test]
    fn zero_operand_findings_render_and_parse() {
        let finding = Finding::new(FindingKind::CancelledOutOfMemory, vec![]);
        let line = finding.machine_line();
        assert_eq!(line, "cancelled_out_of_memory;Information;");
        assert_eq!(Finding::parse_machine_line(&line).unwrap(), finding);
    }

    #[test]
    fn severity_ordering_puts_critical_first() {
        assert!(Severity::Critical < Severity::Warning);
        assert!(Severity::Warning < Severity::Information);
    }
}
