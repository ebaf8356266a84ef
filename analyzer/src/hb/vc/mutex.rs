use skein_core::{EventId, Trace, event::MutexEvent, event::MutexOp};

use crate::{
    hb::{EdgeBuf, HbEdge},
    state::ReleaseSet,
};

use super::VcEngine;

impl VcEngine {
    /// Update rule for every mutex variant.
    ///
    /// Acquires order themselves after the releases recorded for the object; releases publish
    /// themselves. The weak clocks skip the acquire-side sync entirely, which is exactly the
    /// difference between the strong and the weak relation. Failed try operations neither sync
    /// nor publish.
    pub(crate) fn mutex(
        &mut self,
        trace: &mut Trace,
        id: EventId,
        mutex: &MutexEvent,
        edges: &mut EdgeBuf,
    ) {
        match mutex.op {
            MutexOp::Lock | MutexOp::TryLock if mutex.success => {
                self.sync_with_write_release(id, mutex, edges);
                if let Some(releases) = self.state.rel_r.get(&mutex.object).cloned() {
                    self.state.clocks[id.routine.as_usize()].merge(&releases.clocks.vc);
                    for release in releases.events {
                        edges.push(HbEdge::strong_only(release, id));
                    }
                }
            },
            MutexOp::RLock | MutexOp::TryRLock if mutex.success => {
                self.sync_with_write_release(id, mutex, edges);
            },
            _ => (),
        }

        self.local(trace, id);

        match mutex.op {
            MutexOp::Unlock => {
                let stamp = self.stamp(id);
                self.state.rel_w.insert(mutex.object, stamp.clone());
                self.state.rel_r.insert(mutex.object, ReleaseSet::single(stamp));
            },
            MutexOp::RUnlock => {
                let stamp = self.stamp(id);
                self.state
                    .rel_r
                    .entry(mutex.object)
                    .and_modify(|releases| releases.merge(stamp.clone()))
                    .or_insert_with(|| ReleaseSet::single(stamp));
            },
            _ => (),
        }
    }

    fn sync_with_write_release(&mut self, id: EventId, mutex: &MutexEvent, edges: &mut EdgeBuf) {
        if let Some(release) = self.state.rel_w.get(&mutex.object).cloned() {
            self.merge_strong(id.routine, &release);
            edges.push(HbEdge::strong_only(release.event, id));
        }
    }
}
