use std::{
    path::Path,
    sync::{Arc, atomic::Ordering},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use mdhost_core::{
    CoreError, CoreHooks, Debugger, ExecutionCore, FrameScheduler, FrameUnit, Machine,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{
    control::ControlMessage,
    pubsub::RuntimePubSub,
    snapshot::{RomHash, SaveStateFile, rom_hash},
    state::RuntimeState,
    types::{FramePacing, RuntimeConfig, RuntimeError, RuntimeEvent},
};

enum WaitOutcome {
    /// Runtime thread should exit (channel disconnected or Stop received).
    Exit,
    /// A control message was received and handled; caller should re-check state/deadlines.
    ControlHandled,
    /// The target deadline has been reached.
    DeadlineReached,
}

// Sleep in small chunks until close to the deadline, then spin.
const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(4);
const SPIN_THRESHOLD: Duration = Duration::from_micros(300);
const SPIN_YIELD_EVERY: u32 = 512;

/// Routes the core's callbacks to the debugger and the pad state.
struct HostHooks<'a> {
    debugger: &'a mut Debugger,
    state: &'a RuntimeState,
}

impl CoreHooks for HostHooks<'_> {
    fn on_instruction(&mut self, machine: &mut dyn Machine) {
        self.debugger.on_instruction(machine);
    }

    fn input_state(&mut self, port: u32, button_id: u32) -> bool {
        self.state.pad(port).is_pressed(button_id)
    }
}

pub(crate) struct Runner<C: ExecutionCore> {
    core: C,
    debugger: Debugger,
    scheduler: Arc<FrameScheduler>,
    ctrl_rx: Receiver<ControlMessage>,
    state: Arc<RuntimeState>,
    events: Arc<Mutex<RuntimePubSub>>,
    config: RuntimeConfig,
    rom_hash: Option<RomHash>,
    next_frame_deadline: Instant,
}

impl<C: ExecutionCore> Runner<C> {
    pub(crate) fn new(
        core: C,
        debugger: Debugger,
        scheduler: Arc<FrameScheduler>,
        ctrl_rx: Receiver<ControlMessage>,
        state: Arc<RuntimeState>,
        events: Arc<Mutex<RuntimePubSub>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            core,
            debugger,
            scheduler,
            ctrl_rx,
            state,
            events,
            config,
            rom_hash: None,
            next_frame_deadline: Instant::now(),
        }
    }

    pub(crate) fn run(&mut self) {
        debug!("runtime thread started");
        loop {
            while let Ok(msg) = self.ctrl_rx.try_recv() {
                if self.handle_control(msg) {
                    debug!("runtime thread stopping");
                    return;
                }
            }
            self.debugger.service_requests(&mut self.core);

            if self.rom_hash.is_none() || self.scheduler.pending_units() == 0 {
                match self.ctrl_rx.recv_timeout(self.config.idle_poll) {
                    Ok(msg) => {
                        if self.handle_control(msg) {
                            return;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return,
                }
                // Don't make the first frame after an idle spell catch up.
                self.next_frame_deadline = self.next_frame_deadline.max(Instant::now());
                continue;
            }

            if let FramePacing::RealTime { frame_duration } = self.config.pacing {
                match self.wait_until_next_deadline() {
                    WaitOutcome::Exit => return,
                    WaitOutcome::ControlHandled => continue,
                    WaitOutcome::DeadlineReached => {}
                }
                self.next_frame_deadline += frame_duration;

                let now = Instant::now();
                if now > self.next_frame_deadline
                    && now.duration_since(self.next_frame_deadline) > frame_duration * 2
                {
                    self.next_frame_deadline = now;
                }
            }

            if let Some(unit) = self.scheduler.pop_unit() {
                self.step_frame(unit);
            }
        }
    }

    fn step_frame(&mut self, unit: FrameUnit) {
        if !self.state.set_pad(unit.port, unit.input) {
            warn!(port = unit.port, "frame queued for a port that does not exist");
        }

        let mut hooks = HostHooks {
            debugger: &mut self.debugger,
            state: &self.state,
        };
        self.core.run_frame(&mut hooks);

        let resolved = self.scheduler.frame_completed();
        trace!(
            frame = self.scheduler.current_frame(),
            resolved, "frame completed"
        );
    }

    fn wait_until_next_deadline(&mut self) -> WaitOutcome {
        loop {
            let now = Instant::now();
            if now >= self.next_frame_deadline {
                return WaitOutcome::DeadlineReached;
            }

            let remaining = self.next_frame_deadline - now;

            // Coarse phase: sleep in chunks while still far from the deadline,
            // but always keep a final spin window.
            if remaining > SPIN_THRESHOLD {
                let sleep_for = (remaining - SPIN_THRESHOLD).min(MAX_SLEEP_CHUNK);
                match self.ctrl_rx.recv_timeout(sleep_for) {
                    Ok(msg) => {
                        if self.handle_control(msg) {
                            return WaitOutcome::Exit;
                        }
                        return WaitOutcome::ControlHandled;
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        self.debugger.service_requests(&mut self.core);
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Exit,
                }
            }

            // Fine phase: spin until the deadline, still polling control messages.
            let mut spins: u32 = 0;
            while Instant::now() < self.next_frame_deadline {
                match self.ctrl_rx.try_recv() {
                    Ok(msg) => {
                        if self.handle_control(msg) {
                            return WaitOutcome::Exit;
                        }
                        return WaitOutcome::ControlHandled;
                    }
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return WaitOutcome::Exit,
                }

                std::hint::spin_loop();
                spins = spins.wrapping_add(1);
                if spins.is_multiple_of(SPIN_YIELD_EVERY) {
                    thread::yield_now();
                }
            }

            return WaitOutcome::DeadlineReached;
        }
    }

    /// Returns `true` when the runner should exit.
    fn handle_control(&mut self, msg: ControlMessage) -> bool {
        let op = msg.op();
        match msg {
            ControlMessage::Stop => return true,
            ControlMessage::Wake => {}
            ControlMessage::LoadRom(path, reply) => {
                if reply.claim(op) {
                    reply.send(self.load_rom(&path));
                }
            }
            ControlMessage::Reset(reply) => {
                if reply.claim(op) {
                    reply.send(self.reset());
                }
            }
            ControlMessage::SaveState(path, reply) => {
                if reply.claim(op) {
                    reply.send(self.save_state(&path));
                }
            }
            ControlMessage::LoadState(path, reply) => {
                if reply.claim(op) {
                    reply.send(self.load_state(&path));
                }
            }
        }

        false
    }

    fn reset(&mut self) -> Result<(), RuntimeError> {
        if self.rom_hash.is_none() {
            return Err(RuntimeError::NoGameLoaded);
        }
        self.core.reset();
        self.restart_session();
        info!("core reset");
        self.broadcast(RuntimeEvent::Reset);
        Ok(())
    }

    fn load_rom(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let result = std::fs::read(path)
            .map_err(CoreError::from)
            .and_then(|bytes| {
                self.core.load_game(path)?;
                Ok(rom_hash(&bytes))
            });

        match result {
            Ok(hash) => {
                self.rom_hash = Some(hash);
                self.state.game_loaded.store(true, Ordering::Release);
                self.restart_session();
                info!(path = %path.display(), "ROM loaded");
                self.broadcast(RuntimeEvent::RomLoaded {
                    path: path.to_path_buf(),
                });
                Ok(())
            }
            Err(e) => {
                self.rom_hash = None;
                self.state.game_loaded.store(false, Ordering::Release);
                warn!(path = %path.display(), error = %e, "ROM load failed");
                self.broadcast(RuntimeEvent::RomLoadFailed {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                });
                Err(RuntimeError::load_rom(path.to_path_buf(), &e))
            }
        }
    }

    fn save_state(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let failed = |error: String| RuntimeError::SaveStateFailed {
            path: path.to_path_buf(),
            error,
        };
        let Some(hash) = self.rom_hash else {
            return Err(RuntimeError::NoGameLoaded);
        };

        let core_state = self.core.serialize().map_err(|e| failed(e.to_string()))?;
        let file = SaveStateFile::new(hash, self.scheduler.current_frame(), core_state);
        let bytes = file
            .to_postcard_bytes()
            .map_err(|e| failed(e.to_string()))?;
        std::fs::write(path, bytes).map_err(|e| failed(e.to_string()))?;

        info!(path = %path.display(), frame = file.frame, "state saved");
        self.broadcast(RuntimeEvent::StateSaved {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn load_state(&mut self, path: &Path) -> Result<(), RuntimeError> {
        let failed = |error: String| RuntimeError::LoadStateFailed {
            path: path.to_path_buf(),
            error,
        };
        let Some(hash) = self.rom_hash else {
            return Err(RuntimeError::NoGameLoaded);
        };

        let bytes = std::fs::read(path).map_err(|e| failed(e.to_string()))?;
        let file =
            SaveStateFile::from_postcard_bytes(&bytes, &hash).map_err(|e| failed(e.to_string()))?;
        self.core
            .unserialize(&file.core_state)
            .map_err(|e| failed(e.to_string()))?;
        self.debugger.reset_session();

        info!(path = %path.display(), frame = file.frame, "state loaded");
        self.broadcast(RuntimeEvent::StateLoaded {
            path: path.to_path_buf(),
        });
        Ok(())
    }

    /// Counters, pads and debugger session restart; queued frames survive.
    fn restart_session(&mut self) {
        self.scheduler.reset_counters();
        self.debugger.reset_session();
        self.state.clear_pads();
        self.next_frame_deadline = Instant::now();
    }

    fn broadcast(&self, event: RuntimeEvent) {
        self.events.lock().broadcast(event);
    }
}
