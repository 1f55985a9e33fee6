use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ctor::ctor;
use mdhost_core::testing::ScriptedCore;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

pub const TIMEOUT: Duration = Duration::from_secs(2);

/// `nop; nop; bra.s *-4`: spins through 0x200..0x204 forever.
pub const SPIN_LOOP: &[u16] = &[0x4E71, 0x4E71, 0x60FA];

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

pub fn write_rom(dir: &Path, name: &str, words: &[u16]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, ScriptedCore::rom_image(0x200, words)).expect("write rom image");
    path
}
