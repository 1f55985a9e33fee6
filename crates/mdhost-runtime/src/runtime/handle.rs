use std::{
    path::PathBuf,
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use mdhost_core::{
    DebugHandle, Debugger, ExecutionCore, FrameCompletion, FrameScheduler, InputState,
    input::MAX_PORTS,
};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    control::{ControlMessage, ControlReply, control_reply},
    pubsub::RuntimePubSub,
    runner::Runner,
    state::RuntimeState,
    types::{RuntimeConfig, RuntimeError, RuntimeEvent},
};

struct RuntimeInner {
    ctrl_tx: Sender<ControlMessage>,
    state: Arc<RuntimeState>,
    scheduler: Arc<FrameScheduler>,
    events: Arc<Mutex<RuntimePubSub>>,
    debugger: DebugHandle,
    config: RuntimeConfig,
}

/// Owns the execution thread. Dropping it stops the thread, releasing the
/// debugger first if it is holding the core paused.
pub struct Runtime {
    inner: Arc<RuntimeInner>,
    join: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn start<C: ExecutionCore>(core: C, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let (ctrl_tx, ctrl_rx) = unbounded::<ControlMessage>();

        let state = Arc::new(RuntimeState::new());
        let scheduler = Arc::new(FrameScheduler::new());
        let events = Arc::new(Mutex::new(RuntimePubSub::default()));
        let debugger = Debugger::new();
        let debug_handle = debugger.handle().with_timeout(config.control_timeout);

        let mut runner = Runner::new(
            core,
            debugger,
            Arc::clone(&scheduler),
            ctrl_rx,
            Arc::clone(&state),
            Arc::clone(&events),
            config,
        );
        let join = thread::Builder::new()
            .name("mdhost-runtime".into())
            .spawn(move || runner.run())
            .map_err(|e| RuntimeError::SpawnFailed {
                error: e.to_string(),
            })?;

        let inner = Arc::new(RuntimeInner {
            ctrl_tx,
            state,
            scheduler,
            events,
            debugger: debug_handle,
            config,
        });

        Ok(Self {
            inner,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.inner.debugger.detach();
        let _ = self.inner.ctrl_tx.send(ControlMessage::Stop);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        debug!("runtime stopped");
    }
}

impl RuntimeHandle {
    fn send_with_reply(
        &self,
        op: &'static str,
        timeout: Duration,
        build: impl FnOnce(ControlReply) -> ControlMessage,
    ) -> Result<(), RuntimeError> {
        let (reply, pending) = control_reply();
        self.inner
            .ctrl_tx
            .send(build(reply))
            .map_err(|_| RuntimeError::ControlChannelDisconnected)?;
        pending.wait(op, timeout)
    }

    fn check_port(port: u32) -> Result<(), RuntimeError> {
        if (port as usize) < MAX_PORTS {
            Ok(())
        } else {
            Err(RuntimeError::InvalidPort { port })
        }
    }

    /// Loads a program image and restarts the frame counter and the debugger
    /// session. Queued frames are kept.
    ///
    /// Handled between frames. While the debugger holds the core paused this
    /// times out, and the abandoned request is then never carried out.
    pub fn load_rom(&self, path: impl Into<PathBuf>) -> Result<(), RuntimeError> {
        let path = path.into();
        self.send_with_reply("load_rom", self.inner.config.load_timeout, |reply| {
            ControlMessage::LoadRom(path, reply)
        })
    }

    pub fn reset(&self) -> Result<(), RuntimeError> {
        self.send_with_reply("reset", self.inner.config.control_timeout, ControlMessage::Reset)
    }

    pub fn save_state(&self, path: impl Into<PathBuf>) -> Result<(), RuntimeError> {
        let path = path.into();
        self.send_with_reply("save_state", self.inner.config.load_timeout, |reply| {
            ControlMessage::SaveState(path, reply)
        })
    }

    pub fn load_state(&self, path: impl Into<PathBuf>) -> Result<(), RuntimeError> {
        let path = path.into();
        self.send_with_reply("load_state", self.inner.config.load_timeout, |reply| {
            ControlMessage::LoadState(path, reply)
        })
    }

    /// Queues `count` frames with `input` on `port` and returns a completion
    /// that resolves with the frame index once they have all run.
    pub fn next(
        &self,
        count: u32,
        input: InputState,
        port: u32,
    ) -> Result<FrameCompletion, RuntimeError> {
        Self::check_port(port)?;
        let completion = self.inner.scheduler.next(count, input, port);
        self.wake();
        Ok(completion)
    }

    /// Queues `count` frames without waiting for them.
    pub fn queue(&self, count: u32, input: InputState, port: u32) -> Result<(), RuntimeError> {
        Self::check_port(port)?;
        self.inner.scheduler.queue(count, input, port);
        self.wake();
        Ok(())
    }

    /// Sets the pad state seen by the core until the next queued frame
    /// overrides it.
    pub fn set_input(&self, port: u32, state: InputState) -> Result<(), RuntimeError> {
        if self.inner.state.set_pad(port, state) {
            Ok(())
        } else {
            Err(RuntimeError::InvalidPort { port })
        }
    }

    pub fn input(&self, port: u32) -> InputState {
        self.inner.state.pad(port)
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Result<Vec<u8>, RuntimeError> {
        Ok(self.inner.debugger.read_memory(address, len)?)
    }

    /// Returns the number of bytes written; writing stops at the end of the
    /// mapped region.
    pub fn write_memory(&self, address: u32, data: Vec<u8>) -> Result<usize, RuntimeError> {
        Ok(self.inner.debugger.write_memory(address, data)?)
    }

    /// Frames executed since the last load or reset.
    pub fn frame_index(&self) -> u64 {
        self.inner.scheduler.current_frame()
    }

    pub fn pending_frames(&self) -> usize {
        self.inner.scheduler.pending_units()
    }

    pub fn is_game_loaded(&self) -> bool {
        self.inner.state.game_loaded.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> Receiver<RuntimeEvent> {
        self.inner.events.lock().subscribe()
    }

    pub fn debugger(&self) -> DebugHandle {
        self.inner.debugger.clone()
    }

    fn wake(&self) {
        let _ = self.inner.ctrl_tx.send(ControlMessage::Wake);
    }
}
