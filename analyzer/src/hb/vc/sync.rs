use skein_core::{EventId, Trace, event::CondEvent, event::CondOp, event::WaitEvent, event::WaitOp};

use crate::hb::{EdgeBuf, HbEdge};

use super::VcEngine;

impl VcEngine {
    // CONDITIONAL VARIABLES
    // --------------------------------------------------------------------------------------------

    /// Waits enqueue themselves; signals release the longest-waiting routine, broadcasts release
    /// them all.
    ///
    /// A released wait event gets the signal's clock merged into its cache retroactively: the
    /// wait was analyzed when the routine started blocking, but everything after the wakeup
    /// happens after the signal, including the wait's own completion.
    pub(crate) fn cond(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        cond: &CondEvent,
        edges: &mut EdgeBuf,
    ) {
        match cond.op {
            CondOp::Wait => {
                self.local(trace, id);
                self.state.currently_waiting.entry(cond.object).or_default().push_back(id);
            },
            CondOp::Signal => {
                self.local(trace, id);
                let woken =
                    self.state.currently_waiting.get_mut(&cond.object).and_then(|q| q.pop_front());
                if let Some(waiter) = woken {
                    self.release_waiter(trace, id, waiter, edges);
                }
            },
            CondOp::Broadcast => {
                self.local(trace, id);
                let waiters: Vec<EventId> = self
                    .state
                    .currently_waiting
                    .get_mut(&cond.object)
                    .map(|q| q.drain(..).collect())
                    .unwrap_or_default();
                for waiter in waiters {
                    self.release_waiter(trace, id, waiter, edges);
                }
            },
        }
    }

    fn release_waiter(
        &mut self,
        trace: &mut Trace,
        signal: EventId,
        waiter: EventId,
        edges: &mut EdgeBuf,
    ) {
        let stamp = self.stamp(signal);
        self.merge_both(waiter.routine, &stamp);

        let event = trace.event_mut(waiter);
        if let Some(vc) = event.vc.as_mut() {
            vc.merge(&stamp.clocks.vc);
        }
        if let Some(wvc) = event.wvc.as_mut() {
            wvc.merge(&stamp.clocks.wvc);
        }
        edges.push(HbEdge::new(signal, waiter));
    }

    // WAIT GROUPS
    // --------------------------------------------------------------------------------------------

    /// Counter changes form a chain; waits order themselves after the last observed change.
    pub(crate) fn wait_group(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        wait: &WaitEvent,
        edges: &mut EdgeBuf,
    ) {
        if let Some(last) = self.state.last_change_wg.get(&wait.object).cloned() {
            self.merge_both(id.routine, &last);
            edges.push(HbEdge::new(last.event, id));
        }
        self.local(trace, id);
        if wait.op == WaitOp::Change {
            let stamp = self.stamp(id);
            self.state.last_change_wg.insert(wait.object, stamp);
        }
    }
}
