use skein_core::{
    EventId, EventKind, Trace,
    event::{ChannelEvent, ChannelOp, SelectEvent},
};

use crate::{
    hb::{EdgeBuf, HbEdge},
    state::{ClockPair, Stamp},
};

use super::{Step, VcEngine};

impl VcEngine {
    // CHANNEL ROUTING
    // --------------------------------------------------------------------------------------------

    /// Update rule for a channel operation, standalone or chosen inside a select (`id` then names
    /// the select event).
    pub(crate) fn channel(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        ch: &ChannelEvent,
        edges: &mut EdgeBuf,
    ) -> Step {
        let step = if ch.op == ChannelOp::Close {
            self.close(trace, id, ch);
            Step::done()
        } else if trace.event(id).is_leak() {
            // blocked forever; never communicated, so only the routine advances
            self.local(trace, id);
            Step::done()
        } else if ch.closed && ch.op == ChannelOp::Recv {
            self.closed_recv(trace, id, ch, edges);
            Step::done()
        } else if ch.closed && ch.op == ChannelOp::Send {
            // the actual send-on-closed is reported by the scenario check
            self.local(trace, id);
            Step::done()
        } else if ch.is_unbuffered() {
            self.unbuffered(trace, id, ch, edges)
        } else if ch.op == ChannelOp::Send {
            self.buffered_send(trace, id, ch, edges)
        } else {
            self.buffered_recv(trace, id, ch, edges)
        };

        if !step.deferred {
            self.propagate_select(trace, id);
            if let Some(partner) = step.consumed {
                self.propagate_select(trace, partner);
            }
        }
        step
    }

    /// Update rule for a select: the chosen case runs its channel rule under the select's event;
    /// a chosen default or a select that never completed is only an internal scheduling point.
    pub(crate) fn select(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        select: &SelectEvent,
        edges: &mut EdgeBuf,
    ) -> Step {
        let executed = select.chosen_index >= 0 && trace.event(id).t_post() != 0;
        match select.chosen_case().filter(|_| executed).cloned() {
            Some(case) => self.channel(trace, id, &case.channel, edges),
            None => {
                self.local(trace, id);
                self.propagate_select(trace, id);
                Step::done()
            },
        }
    }

    /// Copies the (now assigned) clocks of a select event onto its case shells so scenario checks
    /// can query the cases directly. No-op for plain channel events.
    fn propagate_select(&self, trace: &mut Trace, id: EventId) {
        let event = trace.event_mut(id);
        let (vc, wvc) = (event.vc.clone(), event.wvc.clone());
        if let EventKind::Select(select) = &mut event.kind {
            for case in &mut select.cases {
                case.vc = vc.clone();
                case.wvc = wvc.clone();
            }
        }
    }

    // CLOSE
    // --------------------------------------------------------------------------------------------

    fn close(&mut self, trace: &mut Trace, id: EventId, ch: &ChannelEvent) {
        self.local(trace, id);
        let stamp = self.stamp(id);
        self.state.close_data.insert(ch.object, stamp);
    }

    /// Receive on a closed channel: ordered after the close, no communication partner.
    fn closed_recv(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        ch: &ChannelEvent,
        edges: &mut EdgeBuf,
    ) {
        if let Some(close) = self.state.close_data.get(&ch.object).cloned() {
            self.merge_both(id.routine, &close);
            edges.push(HbEdge::new(close.event, id));
        }
        self.local(trace, id);
        if self.double_increment_on_closed_recv {
            self.state.clocks[id.routine.as_usize()].inc(id.routine);
        }
        let stamp = self.stamp(id);
        self.state.most_recent_recv[id.routine.as_usize()].insert(ch.object, stamp);
    }

    // UNBUFFERED COMMUNICATION
    // --------------------------------------------------------------------------------------------

    /// Analyzes both halves of an unbuffered communication at once.
    ///
    /// The receive is ordered strictly after the send, and afterwards both routines share one
    /// scheduling moment: the sender's clock is overwritten with the receiver's, since the send
    /// can only complete once the receive has happened.
    fn unbuffered(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        ch: &ChannelEvent,
        edges: &mut EdgeBuf,
    ) -> Step {
        let Some(partner) = ch.partner else {
            self.local(trace, id);
            return Step::done();
        };
        if trace.event(partner).vc.is_some() {
            // partner already carried us through its own rule
            self.local(trace, id);
            return Step::done();
        }

        let (send_id, recv_id) = match ch.op {
            ChannelOp::Send => (id, partner),
            _ => (partner, id),
        };
        let (rs, rr) = (send_id.routine.as_usize(), recv_id.routine.as_usize());

        self.state.tick(send_id.routine);
        self.assign(trace, send_id);

        let sender_clocks = ClockPair {
            vc: self.state.clocks[rs].clone(),
            wvc: self.state.weak_clocks[rs].clone(),
        };
        self.state.clocks[rr].merge(&sender_clocks.vc);
        self.state.weak_clocks[rr].merge(&sender_clocks.wvc);

        self.state.tick(recv_id.routine);
        self.assign(trace, recv_id);

        self.state.clocks[rs] = self.state.clocks[rr].clone();
        self.state.weak_clocks[rs] = self.state.weak_clocks[rr].clone();

        edges.push(HbEdge::new(send_id, recv_id));
        // the sender's clock was overwritten with the receiver's, so everything after the send in
        // the sender's routine is also after the receive; the graphs need that edge explicitly
        let send_next = EventId::new(send_id.routine, send_id.index + 1);
        if (send_next.index as usize) < trace.routine(send_id.routine).len() {
            edges.push(HbEdge::new(recv_id, send_next));
        }

        let send_stamp = Stamp { event: send_id, clocks: event_clocks(trace, send_id) };
        let recv_stamp = Stamp { event: recv_id, clocks: event_clocks(trace, recv_id) };
        self.state.most_recent_send[rs].insert(ch.object, send_stamp);
        self.state.most_recent_recv[rr].insert(ch.object, recv_stamp);

        Step::consumed(partner)
    }

    // BUFFERED COMMUNICATION
    // --------------------------------------------------------------------------------------------

    /// Buffered send: lands in the first free slot, ordered after the sender whose message last
    /// occupied that slot (the capacity constraint) and, under FIFO, after the routine's previous
    /// send on the same channel.
    fn buffered_send(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        ch: &ChannelEvent,
        edges: &mut EdgeBuf,
    ) -> Step {
        let (full, slot, previous) = {
            let buffer = self.state.buffer_mut(ch.object, ch.q_size as usize);
            let slot = buffer.occupancy();
            (buffer.is_full(), slot, buffer.slots.get(slot).and_then(|s| s.sender.clone()))
        };
        if full {
            self.state.hold_send.push_back(id);
            return Step::deferred();
        }

        if let Some(prev) = previous {
            self.merge_both(id.routine, &prev);
            edges.push(HbEdge::new(prev.event, id));
        }
        if self.fifo
            && let Some(prev_send) =
                self.state.most_recent_send[id.routine.as_usize()].get(&ch.object).cloned()
        {
            self.merge_both(id.routine, &prev_send);
            edges.push(HbEdge::new(prev_send.event, id));
        }

        self.local(trace, id);

        let stamp = self.stamp(id);
        let buffer = self.state.buffer_mut(ch.object, ch.q_size as usize);
        let slot = buffer.slot_mut(slot);
        slot.occupied = true;
        slot.sender = Some(stamp.clone());

        let max = self.state.max_op_id.entry(ch.object).or_insert(0);
        *max = (*max).max(ch.op_id);
        self.state.most_recent_send[id.routine.as_usize()].insert(ch.object, stamp);
        Step::done()
    }

    /// Buffered receive: takes the front slot and orders after its sender. Receives that outrun
    /// the highest observed send op id wait for the missing send; receives on an empty buffer
    /// model wait for any send.
    fn buffered_recv(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        ch: &ChannelEvent,
        edges: &mut EdgeBuf,
    ) -> Step {
        let highest = self.state.max_op_id.get(&ch.object).copied().unwrap_or(0);
        if ch.op_id > highest {
            self.state.waiting_recv.push_back(id);
            return Step::deferred();
        }
        let buffer = self.state.buffer_mut(ch.object, ch.q_size as usize);
        let Some(sender) = buffer.pop_front() else {
            self.state.hold_recv.push_back(id);
            return Step::deferred();
        };

        self.merge_both(id.routine, &sender);
        edges.push(HbEdge::new(sender.event, id));

        if self.fifo
            && let Some(prev_recv) =
                self.state.most_recent_recv[id.routine.as_usize()].get(&ch.object).cloned()
        {
            self.merge_both(id.routine, &prev_recv);
            edges.push(HbEdge::new(prev_recv.event, id));
        }

        self.local(trace, id);

        let stamp = self.stamp(id);
        self.state.most_recent_recv[id.routine.as_usize()].insert(ch.object, stamp);
        Step::done()
    }
}

/// The clocks an event's caches hold; callable only after assignment.
fn event_clocks(trace: &Trace, id: EventId) -> ClockPair {
    let event = trace.event(id);
    ClockPair { vc: event.clock().clone(), wvc: event.weak_clock().clone() }
}
