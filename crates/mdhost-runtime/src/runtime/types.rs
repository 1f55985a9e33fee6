use std::{path::PathBuf, time::Duration};

use mdhost_core::{CoreError, RequestError};

// NTSC: 53_693_175 Hz master clock, 3420 * 262 clocks per frame (~59.92 Hz).
pub const FRAME_DURATION_NTSC: Duration = Duration::from_nanos(16_688_154);
// PAL: 53_203_424 Hz master clock, 3420 * 313 clocks per frame (~49.70 Hz).
pub const FRAME_DURATION_PAL: Duration = Duration::from_nanos(20_120_134);

/// How the host loop spaces consecutive frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePacing {
    /// Run queued frames back to back.
    #[default]
    Unpaced,
    /// Run at most one frame per `frame_duration`.
    RealTime { frame_duration: Duration },
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub pacing: FramePacing,
    /// How long the idle loop waits for control messages before re-checking
    /// the frame queue and debugger requests.
    pub idle_poll: Duration,
    pub control_timeout: Duration,
    /// Timeout for requests that touch the filesystem (ROM and state files).
    pub load_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pacing: FramePacing::Unpaced,
            idle_poll: Duration::from_millis(1),
            control_timeout: CONTROL_REPLY_TIMEOUT,
            load_timeout: LOAD_ROM_REPLY_TIMEOUT,
        }
    }
}

/// Notifications broadcast to every [`subscribe`](crate::RuntimeHandle::subscribe)r.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    RomLoaded { path: PathBuf },
    RomLoadFailed { path: PathBuf, error: String },
    Reset,
    StateSaved { path: PathBuf },
    StateLoaded { path: PathBuf },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime control channel disconnected")]
    ControlChannelDisconnected,
    #[error("runtime did not respond in time for {op}")]
    ControlTimeout { op: &'static str },
    #[error("failed to spawn runtime thread: {error}")]
    SpawnFailed { error: String },
    #[error("failed to load ROM: {path}: {error}")]
    LoadRomFailed { path: PathBuf, error: String },
    #[error("no game loaded")]
    NoGameLoaded,
    #[error("failed to save state: {path}: {error}")]
    SaveStateFailed { path: PathBuf, error: String },
    #[error("failed to load state: {path}: {error}")]
    LoadStateFailed { path: PathBuf, error: String },
    #[error("controller port {port} does not exist")]
    InvalidPort { port: u32 },
    #[error(transparent)]
    Debugger(#[from] RequestError),
}

impl RuntimeError {
    pub(crate) fn load_rom(path: PathBuf, error: &CoreError) -> Self {
        Self::LoadRomFailed {
            path,
            error: error.to_string(),
        }
    }
}

pub(crate) const CONTROL_REPLY_TIMEOUT: Duration = Duration::from_secs(2);
pub(crate) const LOAD_ROM_REPLY_TIMEOUT: Duration = Duration::from_secs(10);
