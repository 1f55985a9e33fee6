use std::path::PathBuf;

/// Failures reported by an [`ExecutionCore`](crate::machine::ExecutionCore).
///
/// Register and memory inspection never produce these; an unmapped address
/// simply yields no value.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// The core rejected the program image.
    #[error("unable to load game: {path}: {reason}")]
    LoadGame { path: PathBuf, reason: String },
    /// The core does not support state serialization.
    #[error("state serialization is not supported by this core")]
    SerializeUnsupported,
    /// The serialized blob was rejected by the core.
    #[error("invalid state data: {0}")]
    InvalidState(String),
    /// Wrapper for I/O errors raised while reading program images.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
