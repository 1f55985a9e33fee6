//! Execution control for a Mega Drive (68000) core driven by a remote client.
//!
//! The crate sits between an opaque execution core (see [`machine::ExecutionCore`])
//! and whatever protocol layer talks to debuggers or automation scripts. It owns
//! the debug state machine, the shadow call stack, the expression evaluator and
//! the frame scheduler; the thread that actually runs frames lives in
//! `mdhost-runtime`.

pub mod debugger;
pub mod error;
pub mod eval;
pub mod input;
pub mod m68k;
pub mod machine;
pub mod scheduler;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use debugger::{
    DebugEvent, DebugHandle, DebugRequest, Debugger, PauseReason, RequestError,
    call_stack::StackFrame,
};
pub use error::CoreError;
pub use input::InputState;
pub use m68k::Register;
pub use machine::{CoreHooks, ExecutionCore, Machine, MachineExt, MemoryRegion};
pub use scheduler::{FrameCompletion, FrameScheduler, FrameUnit};

#[cfg(test)]
mod tests {
    use ctor::ctor;
    use tracing::Level;
    use tracing_subscriber::FmtSubscriber;

    #[ctor]
    fn init_tracing() {
        let subscriber = FmtSubscriber::builder()
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::DEBUG)
            .pretty()
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");
    }
}
