//! Execution thread for an [`mdhost_core::ExecutionCore`]: owns the core,
//! runs queued frames in order and services debugger and control requests.

pub mod runtime;

pub use runtime::{
    FrameCompletion, FramePacing, Runtime, RuntimeConfig, RuntimeError, RuntimeEvent,
    RuntimeHandle,
};
