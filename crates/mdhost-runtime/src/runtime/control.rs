use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::debug;

use super::types::RuntimeError;

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const ABANDONED: u8 = 2;

/// Runner side of a control request. The request may only be carried out
/// after a successful [`claim`](Self::claim).
pub(crate) struct ControlReply {
    tx: Sender<Result<(), RuntimeError>>,
    state: Arc<AtomicU8>,
}

/// Caller side of a control request.
pub(crate) struct PendingReply {
    rx: Receiver<Result<(), RuntimeError>>,
    state: Arc<AtomicU8>,
}

pub(crate) fn control_reply() -> (ControlReply, PendingReply) {
    let (tx, rx) = bounded(1);
    let state = Arc::new(AtomicU8::new(PENDING));
    (
        ControlReply {
            tx,
            state: Arc::clone(&state),
        },
        PendingReply { rx, state },
    )
}

impl ControlReply {
    /// Returns `false` if the caller already gave up, in which case the
    /// request must be dropped without side effects.
    pub(crate) fn claim(&self, op: &'static str) -> bool {
        let claimed = self
            .state
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            debug!(op, "skipping control request abandoned by its caller");
        }
        claimed
    }

    pub(crate) fn send(self, result: Result<(), RuntimeError>) {
        let _ = self.tx.send(result);
    }
}

impl PendingReply {
    /// Waits for the outcome. On timeout the request is abandoned, unless the
    /// runner has already claimed it, in which case its real outcome is
    /// awaited.
    pub(crate) fn wait(self, op: &'static str, timeout: Duration) -> Result<(), RuntimeError> {
        match self.rx.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                if self
                    .state
                    .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    return Err(RuntimeError::ControlTimeout { op });
                }
                self.rx
                    .recv()
                    .map_err(|_| RuntimeError::ControlChannelDisconnected)?
            }
            Err(RecvTimeoutError::Disconnected) => Err(RuntimeError::ControlChannelDisconnected),
        }
    }
}

/// Requests handled by the runner between frames.
pub(crate) enum ControlMessage {
    Stop,
    /// New frames were queued; wakes an idle runner.
    Wake,
    LoadRom(PathBuf, ControlReply),
    Reset(ControlReply),
    SaveState(PathBuf, ControlReply),
    LoadState(PathBuf, ControlReply),
}

impl ControlMessage {
    pub(crate) fn op(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Wake => "wake",
            Self::LoadRom(..) => "load_rom",
            Self::Reset(_) => "reset",
            Self::SaveState(..) => "save_state",
            Self::LoadState(..) => "load_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_request_cannot_be_claimed() {
        let (reply, pending) = control_reply();
        assert!(matches!(
            pending.wait("reset", Duration::from_millis(5)),
            Err(RuntimeError::ControlTimeout { op: "reset" })
        ));
        assert!(!reply.claim("reset"));
    }

    #[test]
    fn claimed_request_outlives_the_timeout() {
        let (reply, pending) = control_reply();
        assert!(reply.claim("load_rom"));
        let runner = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            reply.send(Err(RuntimeError::NoGameLoaded));
        });

        assert!(matches!(
            pending.wait("load_rom", Duration::from_millis(1)),
            Err(RuntimeError::NoGameLoaded)
        ));
        runner.join().expect("runner thread");
    }
}
