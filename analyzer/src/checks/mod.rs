use std::sync::Arc;

use skein_core::{
    Event, EventId, ObjectId, Trace, TraceRef,
    event::{ChannelOp, EventKind},
};

use crate::{config::AnalyzerConfig, state::HbState};

pub mod channel;
pub mod deadlock;
pub mod leak;
pub mod mutex;
pub mod waitgroup;

pub use deadlock::LockDependencies;

// CHECK CONTEXT
// ================================================================================================

/// Read-only view every scenario check receives: the fully clocked trace, the engine's final
/// shared state, and the run configuration.
pub struct CheckContext<'a> {
    pub trace: &'a Trace,
    pub state: &'a HbState,
    pub cfg: &'a AnalyzerConfig,
}

/// Finding operand for an event, carrying its source provenance.
pub(crate) fn operand(trace: &Trace, id: EventId) -> TraceRef {
    let event = trace.event(id);
    TraceRef::new(id, event.file().clone(), event.line())
}

/// True if the event went through the engine and carries clocks.
pub(crate) fn analyzed(event: &Event) -> bool {
    event.vc.is_some()
}

// CHANNEL OPERATION INDEX
// ================================================================================================

/// One channel operation site: a standalone channel event or one case of a select.
///
/// Select cases share the select's event id and clocks; `executed` is true for standalone
/// operations that ran and for the chosen case of a completed select.
#[derive(Clone, Debug)]
pub(crate) struct ChanOpSite {
    pub id: EventId,
    pub object: ObjectId,
    pub op: ChannelOp,
    pub closed: bool,
    pub q_size: u32,
    pub executed: bool,
    pub is_leak: bool,
    pub file: Arc<str>,
    pub line: u32,
}

/// Collects every channel operation site in the trace, including select cases.
pub(crate) fn channel_sites(trace: &Trace) -> Vec<ChanOpSite> {
    let mut sites = Vec::new();
    for event in trace.events() {
        if !analyzed(event) {
            continue;
        }
        match &event.kind {
            EventKind::Channel(ch) => sites.push(ChanOpSite {
                id: event.id(),
                object: ch.object,
                op: ch.op,
                closed: ch.closed,
                q_size: ch.q_size,
                executed: event.t_post() != 0,
                is_leak: event.is_leak(),
                file: event.file().clone(),
                line: event.line(),
            }),
            EventKind::Select(select) => {
                for case in &select.cases {
                    sites.push(ChanOpSite {
                        id: event.id(),
                        object: case.channel.object,
                        op: case.channel.op,
                        closed: case.channel.closed,
                        q_size: case.channel.q_size,
                        executed: case.chosen && event.t_post() != 0,
                        is_leak: event.is_leak(),
                        file: event.file().clone(),
                        line: event.line(),
                    });
                }
            },
            _ => (),
        }
    }
    sites
}
