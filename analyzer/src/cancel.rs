use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    thread,
    time::Duration,
};

use tracing::warn;

use crate::errors::CancelReason;

// CANCEL FLAG
// ================================================================================================

const STATE_RUNNING: u8 = 0;
const STATE_OOM: u8 = 1;
const STATE_USER: u8 = 2;

/// Shared cooperative cancellation flag.
///
/// The analysis thread polls the flag at every dispatcher step; the memory supervisor (or a
/// signal handler) sets it from outside. Setting is sticky and first-writer-wins.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    state: Arc<AtomicU8>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; keeps the first reason if called twice.
    pub fn cancel(&self, reason: CancelReason) {
        let state = match reason {
            CancelReason::OutOfMemory => STATE_OOM,
            CancelReason::UserAbort => STATE_USER,
        };
        let _ = self.state.compare_exchange(
            STATE_RUNNING,
            state,
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Returns the cancellation reason, if one was requested.
    pub fn cancelled(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::Relaxed) {
            STATE_OOM => Some(CancelReason::OutOfMemory),
            STATE_USER => Some(CancelReason::UserAbort),
            _ => None,
        }
    }
}

// MEMORY SUPERVISOR
// ================================================================================================

/// Samples the process's resident set size in the background and trips the cancel flag once it
/// crosses the limit.
///
/// The supervisor thread is detached; it exits on its own once the flag is set or the process
/// ends. On platforms without `/proc` the supervisor logs once and never trips.
pub fn spawn_memory_supervisor(flag: CancelFlag, limit_bytes: u64, interval: Duration) {
    thread::Builder::new()
        .name("skein-mem-supervisor".into())
        .spawn(move || {
            loop {
                if flag.cancelled().is_some() {
                    return;
                }
                match resident_set_bytes() {
                    Some(rss) if rss > limit_bytes => {
                        warn!(rss, limit_bytes, "memory limit exceeded, cancelling analysis");
                        flag.cancel(CancelReason::OutOfMemory);
                        return;
                    },
                    Some(_) => (),
                    None => {
                        warn!("cannot sample process memory on this platform");
                        return;
                    },
                }
                thread::sleep(interval);
            }
        })
        .expect("failed to spawn memory supervisor thread");
}

/// Reads the process RSS from `/proc/self/statm`, in bytes.
fn resident_set_bytes() -> Option<u64> {
    let statm = fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cancellation_reason_sticks() {
        let flag = CancelFlag::new();
        assert_eq!(flag.cancelled(), None);
        flag.cancel(CancelReason::OutOfMemory);
        flag.cancel(CancelReason::UserAbort);
        assert_eq!(flag.cancelled(), Some(CancelReason::OutOfMemory));
    }
}
