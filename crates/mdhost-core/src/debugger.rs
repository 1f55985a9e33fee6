//! Debug state machine driven by the core's per-instruction callback.
//!
//! [`Debugger`] lives on the execution thread and is invoked once per
//! instruction. [`DebugHandle`] is the cloneable controller surface used by
//! protocol adapters on other threads: run control goes through shared
//! atomics, while anything that needs the machine itself (expression
//! evaluation, memory transfers, call-stack snapshots) is sent as a
//! [`DebugRequest`] and answered by the execution thread, either while it is
//! parked on a pause or between frames.

pub mod call_stack;

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    eval,
    m68k::{
        Register, WORD_SIZE,
        opcode::{self, InstructionKind},
    },
    machine::{Machine, MachineExt},
};

use self::call_stack::{CallStack, StackFrame};

/// How often a paused execution thread re-checks the run flag.
pub const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(1);
/// How long a [`DebugHandle`] waits for the execution thread to answer.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Reason for pausing execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum PauseReason {
    /// Hit a user-defined breakpoint.
    Breakpoint,
    /// User requested pause.
    Pause,
    /// Completed a step, step-over or step-out.
    Step,
}

/// Debug event broadcast to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugEvent {
    /// Execution paused (`running == false`, with a reason) or resumed.
    StateChanged {
        running: bool,
        reason: Option<PauseReason>,
    },
}

/// Request answered on the execution thread.
#[derive(Debug)]
pub enum DebugRequest {
    Evaluate {
        expr: String,
        reply: Sender<Option<String>>,
    },
    SetExpression {
        name: String,
        value: String,
        reply: Sender<Option<String>>,
    },
    ReadMemory {
        address: u32,
        len: usize,
        reply: Sender<Vec<u8>>,
    },
    WriteMemory {
        address: u32,
        data: Vec<u8>,
        reply: Sender<usize>,
    },
    CallStack {
        reply: Sender<Vec<StackFrame>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("execution thread is gone")]
    Disconnected,
    #[error("execution thread did not answer within {0:?}")]
    Timeout(Duration),
}

/// State shared between the execution thread and controllers.
#[derive(Debug)]
struct DebugShared {
    /// Run/pause bit; the paused execution thread polls it.
    running: AtomicBool,
    /// Set on shutdown; no further pauses are honoured.
    detached: AtomicBool,
    /// PC of the instruction about to execute, captured at callback time.
    pc: AtomicU32,
    sp: AtomicU32,
    /// Length of the call at `pc`, 0 if it is not a call.
    call_length: AtomicU32,
    /// Replaced wholesale so the callback always sees a complete set.
    breakpoints: ArcSwap<BTreeSet<u32>>,
    step_over_target: Mutex<Option<u32>>,
    step_out_target: Mutex<Option<u32>>,
    pending_steps: AtomicU32,
    subscribers: Mutex<Vec<Sender<DebugEvent>>>,
}

impl DebugShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            pc: AtomicU32::new(0),
            sp: AtomicU32::new(0),
            call_length: AtomicU32::new(0),
            breakpoints: ArcSwap::from_pointee(BTreeSet::new()),
            step_over_target: Mutex::new(None),
            step_out_target: Mutex::new(None),
            pending_steps: AtomicU32::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn pause(&self, reason: PauseReason) {
        if self.detached.load(Ordering::Acquire) {
            return;
        }
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!(pc = format_args!("{:#010x}", self.pc.load(Ordering::Relaxed)), %reason, "paused");
            self.broadcast(DebugEvent::StateChanged {
                running: false,
                reason: Some(reason),
            });
        }
    }

    fn resume(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("resumed");
            self.broadcast(DebugEvent::StateChanged {
                running: true,
                reason: None,
            });
        }
    }

    fn broadcast(&self, event: DebugEvent) {
        // Drop subscribers whose receiver has gone away.
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }
}

/// Controller surface of the debugger. Cheap to clone and safe to use from
/// any thread.
#[derive(Debug, Clone)]
pub struct DebugHandle {
    shared: Arc<DebugShared>,
    requests: Sender<DebugRequest>,
    timeout: Duration,
}

impl DebugHandle {
    /// Sets how long execution-thread requests wait for an answer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn subscribe(&self) -> Receiver<DebugEvent> {
        let (tx, rx) = unbounded();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// PC of the instruction about to execute (as captured by the last
    /// instruction callback).
    pub fn pc(&self) -> u32 {
        self.shared.pc.load(Ordering::Acquire)
    }

    /// Live A7: captured by the last callback and refreshed by register
    /// edits made while parked.
    pub fn sp(&self) -> u32 {
        self.shared.sp.load(Ordering::Acquire)
    }

    /// Breaks into the debugger and cancels pending step-over/step-out.
    pub fn pause(&self) {
        self.shared.pause(PauseReason::Pause);
        *self.shared.step_over_target.lock() = None;
        *self.shared.step_out_target.lock() = None;
    }

    pub fn resume(&self) {
        self.shared.resume();
    }

    /// Runs `n` more instructions and pauses again.
    pub fn step(&self, n: u32) {
        self.shared.pending_steps.store(n, Ordering::Release);
        self.shared.resume();
    }

    /// Runs until the instruction following the call at PC. Anything other
    /// than a decodable call degrades to a single step.
    pub fn step_over(&self) {
        let len = self.shared.call_length.load(Ordering::Acquire);
        if len == 0 {
            self.step(1);
            return;
        }
        let target = self.pc().wrapping_add(len);
        *self.shared.step_over_target.lock() = Some(target);
        self.shared.resume();
    }

    /// Runs until the current subroutine's return address has been popped.
    pub fn step_out(&self) {
        let target = self.sp().wrapping_add(WORD_SIZE);
        *self.shared.step_out_target.lock() = Some(target);
        self.shared.resume();
    }

    pub fn breakpoints(&self) -> Arc<BTreeSet<u32>> {
        self.shared.breakpoints.load_full()
    }

    /// Replaces the whole breakpoint set.
    pub fn set_breakpoints(&self, addresses: impl IntoIterator<Item = u32>) {
        let set: BTreeSet<u32> = addresses.into_iter().collect();
        debug!(count = set.len(), "breakpoints replaced");
        self.shared.breakpoints.store(Arc::new(set));
    }

    /// Evaluates `expr` against the live machine. `None` means the
    /// expression could not be evaluated.
    pub fn evaluate(&self, expr: &str) -> Option<String> {
        let expr = expr.to_owned();
        self.request(|reply| DebugRequest::Evaluate { expr, reply })
            .ok()
            .flatten()
    }

    /// Assigns `value` to a register or `PC`, returning the formatted value.
    pub fn set_expression(&self, name: &str, value: &str) -> Option<String> {
        let (name, value) = (name.to_owned(), value.to_owned());
        self.request(|reply| DebugRequest::SetExpression { name, value, reply })
            .ok()
            .flatten()
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Result<Vec<u8>, RequestError> {
        self.request(|reply| DebugRequest::ReadMemory {
            address,
            len,
            reply,
        })
    }

    /// Returns the number of bytes actually written.
    pub fn write_memory(&self, address: u32, data: Vec<u8>) -> Result<usize, RequestError> {
        self.request(|reply| DebugRequest::WriteMemory {
            address,
            data,
            reply,
        })
    }

    /// Shadow call stack, innermost frame first.
    pub fn call_stack(&self) -> Result<Vec<StackFrame>, RequestError> {
        self.request(|reply| DebugRequest::CallStack { reply })
    }

    /// Stops honouring pauses and releases a parked execution thread.
    pub fn detach(&self) {
        self.shared.detached.store(true, Ordering::Release);
        self.shared.resume();
    }

    fn request<T>(
        &self,
        build: impl FnOnce(Sender<T>) -> DebugRequest,
    ) -> Result<T, RequestError> {
        let (reply_tx, reply_rx) = bounded::<T>(1);
        self.requests
            .send(build(reply_tx))
            .map_err(|_| RequestError::Disconnected)?;
        match reply_rx.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "debug request timed out");
                Err(RequestError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(RequestError::Disconnected),
        }
    }
}

/// Execution-thread side of the debugger.
#[derive(Debug)]
pub struct Debugger {
    shared: Arc<DebugShared>,
    requests_tx: Sender<DebugRequest>,
    requests: Receiver<DebugRequest>,
    call_stack: CallStack,
    poll_interval: Duration,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

impl Debugger {
    pub fn new() -> Self {
        let (requests_tx, requests) = unbounded();
        Self {
            shared: Arc::new(DebugShared::new()),
            requests_tx,
            requests,
            call_stack: CallStack::new(),
            poll_interval: PAUSE_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handle(&self) -> DebugHandle {
        DebugHandle {
            shared: Arc::clone(&self.shared),
            requests: self.requests_tx.clone(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    /// Forgets everything tied to the running program. Breakpoints and the
    /// run state survive.
    pub fn reset_session(&mut self) {
        self.call_stack.clear();
        self.shared.pc.store(0, Ordering::Release);
        self.shared.sp.store(0, Ordering::Release);
        self.shared.call_length.store(0, Ordering::Release);
        self.shared.pending_steps.store(0, Ordering::Release);
        *self.shared.step_over_target.lock() = None;
        *self.shared.step_out_target.lock() = None;
    }

    /// Per-instruction callback. Blocks the calling (execution) thread for as
    /// long as the debugger is paused.
    pub fn on_instruction(&mut self, machine: &mut dyn Machine) {
        let (Some(pc), Some(sp)) = (machine.pc(), machine.register(Register::SP)) else {
            return;
        };
        self.shared.pc.store(pc, Ordering::Release);
        self.shared.sp.store(sp, Ordering::Release);

        self.call_stack.observe(pc, sp, |addr| machine.read_u32(addr));

        let step_over_hit = {
            let mut target = self.shared.step_over_target.lock();
            if *target == Some(pc) {
                *target = None;
                true
            } else {
                false
            }
        };
        if step_over_hit {
            self.shared.pause(PauseReason::Step);
        } else if self.shared.breakpoints.load().contains(&pc) {
            self.shared.pause(PauseReason::Breakpoint);
        }

        let word = machine.read_u16(pc);
        let kind = word.map_or(InstructionKind::Other, InstructionKind::classify);
        self.call_stack.latch(kind);
        self.shared
            .call_length
            .store(word.map_or(0, opcode::call_length), Ordering::Release);

        let step_out_hit = {
            let mut target = self.shared.step_out_target.lock();
            match *target {
                Some(out_sp) if sp >= out_sp => {
                    *target = None;
                    true
                }
                _ => false,
            }
        };
        if step_out_hit {
            self.shared.pause(PauseReason::Step);
        }

        if !self.is_running() {
            self.wait_while_paused(machine);
        }

        let stepped = self
            .shared
            .pending_steps
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if stepped == Ok(1) {
            self.shared.pause(PauseReason::Step);
        }
    }

    /// Answers every queued request without blocking. Returns how many were
    /// handled.
    pub fn service_requests(&mut self, machine: &mut dyn Machine) -> usize {
        let mut handled = 0;
        while let Ok(request) = self.requests.try_recv() {
            self.handle_request(request, machine);
            handled += 1;
        }
        handled
    }

    fn wait_while_paused(&mut self, machine: &mut dyn Machine) {
        trace!("execution thread parked");
        while !self.is_running() {
            match self.requests.recv_timeout(self.poll_interval) {
                Ok(request) => self.handle_request(request, machine),
                Err(RecvTimeoutError::Timeout) => {}
                // We hold a sender ourselves, so this cannot happen while alive.
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        trace!("execution thread released");
    }

    fn handle_request(&mut self, request: DebugRequest, machine: &mut dyn Machine) {
        match request {
            DebugRequest::Evaluate { expr, reply } => {
                let pc = self.shared.pc.load(Ordering::Acquire);
                let _ = reply.send(eval::evaluate(&expr, &*machine, pc));
            }
            DebugRequest::SetExpression { name, value, reply } => {
                let written = eval::set_expression(&name, &value, machine);
                // Published SP tracks hand-edited A7; step-out reads it.
                if written.is_some()
                    && let Some(sp) = machine.register(Register::SP)
                {
                    self.shared.sp.store(sp, Ordering::Release);
                }
                let _ = reply.send(written);
            }
            DebugRequest::ReadMemory {
                address,
                len,
                reply,
            } => {
                let _ = reply.send(machine.read_bytes(address, len));
            }
            DebugRequest::WriteMemory {
                address,
                data,
                reply,
            } => {
                let _ = reply.send(machine.write_bytes(address, &data));
            }
            DebugRequest::CallStack { reply } => {
                let _ = reply.send(self.call_stack.frames().copied().collect());
            }
        }
    }
}
