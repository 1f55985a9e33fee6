mod control;
mod handle;
mod pubsub;
mod runner;
mod snapshot;
mod state;
mod types;

pub use handle::{Runtime, RuntimeHandle};
pub use mdhost_core::FrameCompletion;
pub use types::{
    FRAME_DURATION_NTSC, FRAME_DURATION_PAL, FramePacing, RuntimeConfig, RuntimeError,
    RuntimeEvent,
};
