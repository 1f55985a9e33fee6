//! On-disk save-state container.
//!
//! The core's own serialized blob is wrapped together with the SHA-1 of the
//! ROM it was taken from, so a state is never restored into another game.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

pub(crate) const SAVE_STATE_VERSION: u32 = 1;

pub(crate) type RomHash = [u8; 20];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SaveStateFile {
    pub(crate) version: u32,
    pub(crate) rom_hash: RomHash,
    /// Frame counter when the state was taken.
    pub(crate) frame: u64,
    pub(crate) core_state: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SnapshotError {
    #[error("malformed save state: {0}")]
    Decode(#[from] postcard::Error),
    #[error("unsupported save state version {0}")]
    Version(u32),
    #[error("ROM hash mismatch: this save belongs to a different game")]
    RomMismatch,
}

impl SaveStateFile {
    pub(crate) fn new(rom_hash: RomHash, frame: u64, core_state: Vec<u8>) -> Self {
        Self {
            version: SAVE_STATE_VERSION,
            rom_hash,
            frame,
            core_state,
        }
    }

    pub(crate) fn to_postcard_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_stdvec(self)
    }

    /// Decodes a save and checks that it belongs to `expected` ROM.
    pub(crate) fn from_postcard_bytes(
        bytes: &[u8],
        expected: &RomHash,
    ) -> Result<Self, SnapshotError> {
        let file: Self = postcard::from_bytes(bytes)?;
        if file.version != SAVE_STATE_VERSION {
            return Err(SnapshotError::Version(file.version));
        }
        if &file.rom_hash != expected {
            return Err(SnapshotError::RomMismatch);
        }
        Ok(file)
    }
}

pub(crate) fn rom_hash(bytes: &[u8]) -> RomHash {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_state_from_another_rom() {
        let file = SaveStateFile::new(rom_hash(b"game a"), 12, vec![1, 2, 3]);
        let bytes = file.to_postcard_bytes().expect("encode");

        let decoded = SaveStateFile::from_postcard_bytes(&bytes, &rom_hash(b"game a"));
        assert_eq!(decoded.ok(), Some(file));

        let other = SaveStateFile::from_postcard_bytes(&bytes, &rom_hash(b"game b"));
        assert!(matches!(other, Err(SnapshotError::RomMismatch)));
    }

    #[test]
    fn rejects_garbage_and_future_versions() {
        let hash = rom_hash(b"game");
        assert!(matches!(
            SaveStateFile::from_postcard_bytes(&[0xFF; 3], &hash),
            Err(SnapshotError::Decode(_))
        ));

        let mut file = SaveStateFile::new(hash, 0, Vec::new());
        file.version = SAVE_STATE_VERSION + 1;
        let bytes = file.to_postcard_bytes().expect("encode");
        assert!(matches!(
            SaveStateFile::from_postcard_bytes(&bytes, &hash),
            Err(SnapshotError::Version(v)) if v == SAVE_STATE_VERSION + 1
        ));
    }
}
