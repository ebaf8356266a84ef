//! Parser and serializer for the line-per-routine trace text format.
//!
//! Each line holds the semicolon-terminated records of one routine; the first character of a
//! record selects the kind, the rest is comma-separated fields. Any unrecognized kind aborts the
//! trace with a labeled diagnostic.

use std::{collections::HashMap, sync::Arc};

use miette::NamedSource;

use crate::{
    errors::{ParseError, ParseErrorKind, TraceError},
    event::{
        AtomicEvent, AtomicOp, ChannelEvent, ChannelOp, CondEvent, CondOp, Event, EventKind,
        ForkEvent, MutexEvent, MutexOp, NewEvent, OnceEvent, SelectCase, SelectEvent, WaitEvent,
        WaitOp,
    },
    ids::{ObjectId, RoutineId},
};

use super::Trace;

impl Trace {
    /// Parses a trace from its text representation.
    ///
    /// `name` identifies the source (usually the trace file path) in diagnostics. Syntax errors
    /// come back labeled against the trace text; schema violations (partner resolution, fork
    /// linkage, timestamp order) follow once the records themselves are well-formed.
    pub fn parse(name: &str, text: &str) -> Result<Self, TraceError> {
        let routines = Parser { name, text, files: HashMap::new() }.run()?;
        Ok(Self::from_streams(routines)?)
    }

    /// Renders the trace back into the text format.
    ///
    /// Parsing the output yields an event-for-event equal trace. Replay markers have no record
    /// form and are not emitted.
    pub fn to_trace_string(&self) -> String {
        let mut out = String::new();
        for (i, routine) in (1..=self.num_routines()).enumerate() {
            if i > 0 {
                out.push('\n');
            }
            for event in self.routine(RoutineId::new(routine as u32)) {
                write_record(&mut out, event);
            }
        }
        out
    }
}

// PARSER
// ================================================================================================

struct Parser<'a> {
    name: &'a str,
    text: &'a str,
    /// Interns file-path strings, which repeat heavily across records.
    files: HashMap<&'a str, Arc<str>>,
}

impl<'a> Parser<'a> {
    fn run(mut self) -> Result<Vec<Vec<Event>>, ParseError> {
        let mut lines: Vec<(usize, &str)> = Vec::new();
        let mut offset = 0;
        for line in self.text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            lines.push((offset, line));
            offset += line.len() + 1;
        }
        while lines.last().is_some_and(|(_, line)| line.trim().is_empty()) {
            lines.pop();
        }

        let mut routines = Vec::with_capacity(lines.len());
        for (line_idx, (line_start, line)) in lines.into_iter().enumerate() {
            let routine = RoutineId::new(line_idx as u32 + 1);
            let mut events = Vec::new();
            let mut rec_start = line_start;
            for record in line.split(';') {
                if !record.trim().is_empty() {
                    let index = events.len() as u32;
                    events.push(self.record(record, routine, index, rec_start)?);
                }
                rec_start += record.len() + 1;
            }
            routines.push(events);
        }
        Ok(routines)
    }

    fn record(
        &mut self,
        record: &'a str,
        routine: RoutineId,
        index: u32,
        offset: usize,
    ) -> Result<Event, ParseError> {
        match self.record_kind(record, routine, index) {
            Ok(event) => Ok(event),
            Err(kind) => Err(ParseError {
                src: NamedSource::new(self.name, self.text.to_string()),
                span: (offset, record.len()).into(),
                kind,
            }),
        }
    }

    fn record_kind(
        &mut self,
        record: &'a str,
        routine: RoutineId,
        index: u32,
    ) -> Result<Event, ParseErrorKind> {
        let fields: Vec<&'a str> = record.split(',').collect();
        let kind_char = {
            let first = fields[0];
            let mut chars = first.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => c,
                (None, _) => return Err(ParseErrorKind::EmptyRecord),
                (Some(c), Some(_)) => return Err(ParseErrorKind::UnknownRecordKind(c)),
            }
        };

        match kind_char {
            'A' => {
                expect_fields(&fields, 5)?;
                let t_post = parse_u64("tPost", fields[1])?;
                let object = ObjectId::new(parse_u64("id", fields[2])?);
                let op = match fields[3] {
                    "L" => AtomicOp::Load,
                    "S" => AtomicOp::Store,
                    "A" => AtomicOp::Add,
                    "W" => AtomicOp::Swap,
                    "C" => AtomicOp::CompSwap,
                    "N" => AtomicOp::And,
                    "O" => AtomicOp::Or,
                    other => {
                        return Err(ParseErrorKind::InvalidOpCode {
                            record: 'A',
                            value: other.to_string(),
                        });
                    },
                };
                let (file, line) = self.position(fields[4])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_post,
                    t_post,
                    file,
                    line,
                    EventKind::Atomic(AtomicEvent { object, op }),
                ))
            },
            'C' => {
                expect_fields(&fields, 9)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let op = channel_op(fields[4])?;
                let closed = parse_bool("closed", fields[5])?;
                let op_id = parse_u64("opId", fields[6])?;
                let q_size = parse_u64("qSize", fields[7])? as u32;
                let (file, line) = self.position(fields[8])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Channel(ChannelEvent {
                        object,
                        op,
                        closed,
                        op_id,
                        q_size,
                        partner: None,
                    }),
                ))
            },
            'S' => {
                expect_fields(&fields, 7)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let chosen_index = parse_i64("chosenIndex", fields[5])?;
                let mut cases = Vec::new();
                let mut has_default = false;
                for case in fields[4].split('~') {
                    match case {
                        "d" | "D" => has_default = true,
                        _ => {
                            let sub: Vec<&str> = case.split('.').collect();
                            if sub.len() != 6 || sub[0] != "C" {
                                return Err(ParseErrorKind::InvalidSelectCase(case.to_string()));
                            }
                            let op = channel_op(sub[2])?;
                            cases.push(SelectCase {
                                channel: ChannelEvent {
                                    object: ObjectId::new(parse_u64("case id", sub[1])?),
                                    op,
                                    closed: parse_bool("case closed", sub[3])?,
                                    op_id: parse_u64("case opId", sub[4])?,
                                    q_size: parse_u64("case qSize", sub[5])? as u32,
                                    partner: None,
                                },
                                chosen: false,
                                vc: None,
                                wvc: None,
                            });
                        },
                    }
                }
                if chosen_index >= 0 {
                    let chosen = chosen_index as usize;
                    if chosen >= cases.len() {
                        return Err(ParseErrorKind::ChosenCaseOutOfRange {
                            chosen: chosen_index,
                            cases: cases.len(),
                        });
                    }
                    cases[chosen].chosen = true;
                }
                let (file, line) = self.position(fields[6])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Select(SelectEvent {
                        object,
                        cases,
                        chosen_index: chosen_index as i32,
                        has_default,
                    }),
                ))
            },
            'M' => {
                expect_fields(&fields, 7)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let op = match fields[4] {
                    "L" => MutexOp::Lock,
                    "U" => MutexOp::Unlock,
                    "R" => MutexOp::RLock,
                    "N" => MutexOp::RUnlock,
                    "T" => MutexOp::TryLock,
                    "Y" => MutexOp::TryRLock,
                    other => {
                        return Err(ParseErrorKind::InvalidOpCode {
                            record: 'M',
                            value: other.to_string(),
                        });
                    },
                };
                let success = parse_bool("success", fields[5])?;
                let (file, line) = self.position(fields[6])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Mutex(MutexEvent { object, op, success }),
                ))
            },
            'W' => {
                expect_fields(&fields, 8)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let op = match fields[4] {
                    "A" => WaitOp::Change,
                    "W" => WaitOp::Wait,
                    other => {
                        return Err(ParseErrorKind::InvalidOpCode {
                            record: 'W',
                            value: other.to_string(),
                        });
                    },
                };
                let delta = parse_i64("delta", fields[5])?;
                let val = parse_i64("val", fields[6])?;
                let (file, line) = self.position(fields[7])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Wait(WaitEvent { object, op, delta, val }),
                ))
            },
            'D' => {
                expect_fields(&fields, 6)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let op = match fields[4] {
                    "W" => CondOp::Wait,
                    "S" => CondOp::Signal,
                    "B" => CondOp::Broadcast,
                    other => {
                        return Err(ParseErrorKind::InvalidOpCode {
                            record: 'D',
                            value: other.to_string(),
                        });
                    },
                };
                let (file, line) = self.position(fields[5])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Cond(CondEvent { object, op }),
                ))
            },
            'O' => {
                expect_fields(&fields, 6)?;
                let t_pre = parse_u64("tPre", fields[1])?;
                let t_post = parse_u64("tPost", fields[2])?;
                let object = ObjectId::new(parse_u64("id", fields[3])?);
                let success = parse_bool("success", fields[4])?;
                let (file, line) = self.position(fields[5])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_pre,
                    t_post,
                    file,
                    line,
                    EventKind::Once(OnceEvent { object, success }),
                ))
            },
            'F' => {
                expect_fields(&fields, 4)?;
                let t_post = parse_u64("tPost", fields[1])?;
                let child = RoutineId::new(parse_u64("childRoutineId", fields[2])? as u32);
                let (file, line) = self.position(fields[3])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_post,
                    t_post,
                    file,
                    line,
                    EventKind::Fork(ForkEvent { child }),
                ))
            },
            'N' => {
                expect_fields(&fields, 4)?;
                let t_post = parse_u64("tPost", fields[1])?;
                let object = ObjectId::new(parse_u64("id", fields[2])?);
                let (file, line) = self.position(fields[3])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_post,
                    t_post,
                    file,
                    line,
                    EventKind::New(NewEvent { object }),
                ))
            },
            'E' => {
                expect_fields(&fields, 2)?;
                let t_post = parse_u64("tPost", fields[1])?;
                Ok(Event::new(
                    routine,
                    index,
                    t_post,
                    t_post,
                    Arc::from(""),
                    0,
                    EventKind::RoutineEnd,
                ))
            },
            other => Err(ParseErrorKind::UnknownRecordKind(other)),
        }
    }

    fn position(&mut self, field: &'a str) -> Result<(Arc<str>, u32), ParseErrorKind> {
        let (file, line) = field
            .rsplit_once(':')
            .ok_or_else(|| ParseErrorKind::InvalidPosition(field.to_string()))?;
        let line = line
            .parse::<u32>()
            .map_err(|_| ParseErrorKind::InvalidPosition(field.to_string()))?;
        let file = self.files.entry(file).or_insert_with(|| Arc::from(file)).clone();
        Ok((file, line))
    }
}

// FIELD HELPERS
// ================================================================================================

fn expect_fields(fields: &[&str], expected: usize) -> Result<(), ParseErrorKind> {
    if fields.len() != expected {
        Err(ParseErrorKind::FieldCount { expected, found: fields.len() })
    } else {
        Ok(())
    }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, ParseErrorKind> {
    value
        .parse()
        .map_err(|_| ParseErrorKind::InvalidInt { field, value: value.to_string() })
}

fn parse_i64(field: &'static str, value: &str) -> Result<i64, ParseErrorKind> {
    value
        .parse()
        .map_err(|_| ParseErrorKind::InvalidInt { field, value: value.to_string() })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ParseErrorKind> {
    match value {
        "t" | "true" => Ok(true),
        "f" | "false" => Ok(false),
        _ => Err(ParseErrorKind::InvalidBool { field, value: value.to_string() }),
    }
}

fn channel_op(value: &str) -> Result<ChannelOp, ParseErrorKind> {
    match value {
        "S" => Ok(ChannelOp::Send),
        "R" => Ok(ChannelOp::Recv),
        "C" => Ok(ChannelOp::Close),
        other => Err(ParseErrorKind::InvalidOpCode { record: 'C', value: other.to_string() }),
    }
}

// SERIALIZER
// ================================================================================================

fn write_record(out: &mut String, event: &Event) {
    use std::fmt::Write;

    let pos = |out: &mut String| {
        let _ = write!(out, ",{}:{};", event.file(), event.line());
    };
    match &event.kind {
        EventKind::Atomic(atomic) => {
            let op = match atomic.op {
                AtomicOp::Load => 'L',
                AtomicOp::Store => 'S',
                AtomicOp::Add => 'A',
                AtomicOp::Swap => 'W',
                AtomicOp::CompSwap => 'C',
                AtomicOp::And => 'N',
                AtomicOp::Or => 'O',
            };
            let _ = write!(out, "A,{},{},{op}", event.t_post(), atomic.object);
            pos(out);
        },
        EventKind::Channel(channel) => {
            let _ = write!(
                out,
                "C,{},{},{},{},{},{},{}",
                event.t_pre(),
                event.t_post(),
                channel.object,
                channel_op_code(channel.op),
                bool_code(channel.closed),
                channel.op_id,
                channel.q_size,
            );
            pos(out);
        },
        EventKind::Select(select) => {
            let _ = write!(
                out,
                "S,{},{},{},",
                event.t_pre(),
                event.t_post(),
                select.object
            );
            for (i, case) in select.cases.iter().enumerate() {
                if i > 0 {
                    out.push('~');
                }
                let channel = &case.channel;
                let _ = write!(
                    out,
                    "C.{}.{}.{}.{}.{}",
                    channel.object,
                    channel_op_code(channel.op),
                    bool_code(channel.closed),
                    channel.op_id,
                    channel.q_size,
                );
            }
            if select.has_default {
                if !select.cases.is_empty() {
                    out.push('~');
                }
                out.push(if select.chosen_index == -1 { 'D' } else { 'd' });
            }
            let _ = write!(out, ",{}", select.chosen_index);
            pos(out);
        },
        EventKind::Mutex(mutex) => {
            let op = match mutex.op {
                MutexOp::Lock => 'L',
                MutexOp::Unlock => 'U',
                MutexOp::RLock => 'R',
                MutexOp::RUnlock => 'N',
                MutexOp::TryLock => 'T',
                MutexOp::TryRLock => 'Y',
            };
            let _ = write!(
                out,
                "M,{},{},{},{op},{}",
                event.t_pre(),
                event.t_post(),
                mutex.object,
                bool_code(mutex.success),
            );
            pos(out);
        },
        EventKind::Wait(wait) => {
            let op = match wait.op {
                WaitOp::Change => 'A',
                WaitOp::Wait => 'W',
            };
            let _ = write!(
                out,
                "W,{},{},{},{op},{},{}",
                event.t_pre(),
                event.t_post(),
                wait.object,
                wait.delta,
                wait.val,
            );
            pos(out);
        },
        EventKind::Cond(cond) => {
            let op = match cond.op {
                CondOp::Wait => 'W',
                CondOp::Signal => 'S',
                CondOp::Broadcast => 'B',
            };
            let _ = write!(out, "D,{},{},{},{op}", event.t_pre(), event.t_post(), cond.object);
            pos(out);
        },
        EventKind::Once(once) => {
            let _ = write!(
                out,
                "O,{},{},{},{}",
                event.t_pre(),
                event.t_post(),
                once.object,
                bool_code(once.success),
            );
            pos(out);
        },
        EventKind::Fork(fork) => {
            let _ = write!(out, "F,{},{}", event.t_post(), fork.child);
            pos(out);
        },
        EventKind::New(new) => {
            let _ = write!(out, "N,{},{}", event.t_post(), new.object);
            pos(out);
        },
        EventKind::RoutineEnd => {
            let _ = write!(out, "E,{};", event.t_post());
        },
        // replay markers are runtime-internal and have no record form
        EventKind::Replay(_) => (),
    }
}

fn channel_op_code(op: ChannelOp) -> char {
    match op {
        ChannelOp::Send => 'S',
        ChannelOp::Recv => 'R',
        ChannelOp::Close => 'C',
    }
}

fn bool_code(value: bool) -> &'static str {
    if value { "t" } else { "f" }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::assert_matches;

    use super::*;

    const TRACE: &str = "\
N,2,5,main.go:10;F,3,2,main.go:11;C,6,9,5,S,f,1,0,main.go:12;M,10,11,7,L,t,main.go:14;M,12,13,7,U,t,main.go:15;E,14;
C,7,9,5,R,f,1,0,worker.go:5;W,15,16,8,A,1,1,worker.go:6;W,17,18,8,A,-1,0,worker.go:7;E,19;";

    #[test]
    fn parses_every_record_kind() {
        let trace = Trace::parse("test.trace", TRACE).unwrap();
        assert_eq!(trace.num_routines(), 2);
        assert_eq!(trace.routine(RoutineId::new(1)).len(), 6);
        assert_eq!(trace.routine(RoutineId::new(2)).len(), 4);

        let send = &trace.routine(RoutineId::new(1))[2];
        assert_matches!(
            &send.kind,
            EventKind::Channel(ch) if ch.op == ChannelOp::Send && ch.is_unbuffered()
        );
    }

    #[test]
    fn select_cases_and_default_round_trip() {
        let text = "S,4,9,3,C.5.R.f.2.0~C.6.S.f.1.1~d,1,sel.go:20;";
        let trace = Trace::parse("test.trace", text).unwrap();
        let event = &trace.routine(RoutineId::new(1))[0];
        let EventKind::Select(select) = &event.kind else { panic!("not a select") };
        assert_eq!(select.cases.len(), 2);
        assert!(select.has_default);
        assert_eq!(select.chosen_index, 1);
        assert!(select.cases[1].chosen);

        assert_eq!(trace.to_trace_string(), text);
    }

    #[test]
    fn round_trip_is_event_for_event_equal() {
        let trace = Trace::parse("test.trace", TRACE).unwrap();
        let rendered = trace.to_trace_string();
        let reparsed = Trace::parse("test.trace", &rendered).unwrap();
        assert_eq!(trace, reparsed);
        assert_eq!(rendered, TRACE);
    }

    fn parse_err(text: &str) -> ParseErrorKind {
        match Trace::parse("test.trace", text).unwrap_err() {
            TraceError::Parse(err) => err.kind,
            other => panic!("expected parse error, got {other}"),
        }
    }

    #[test]
    fn unknown_record_kind_aborts() {
        assert_matches!(parse_err("Q,1,2;"), ParseErrorKind::UnknownRecordKind('Q'));
    }

    #[test]
    fn bad_boolean_is_labeled() {
        assert_matches!(
            parse_err("O,1,2,3,x,main.go:1;"),
            ParseErrorKind::InvalidBool { field: "success", .. }
        );
    }

    #[test]
    fn field_count_is_checked() {
        assert_matches!(
            parse_err("M,1,2,3,L,main.go:4;"),
            ParseErrorKind::FieldCount { expected: 7, found: 6 }
        );
    }
}
