//! A tiny scripted stand-in for the execution core.
//!
//! [`ScriptedCore`] understands just enough 68000 control flow to exercise
//! the debugger and the host loop: `NOP`, `JSR (xxx).L`, `BSR`, `RTS`,
//! `BRA` and `LEA (d16,A7),A7`. Every other word is skipped as a one-word
//! instruction. Words live in host (little-endian) order, like the real
//! core's regions.

use std::{path::Path, sync::Arc};

use parking_lot::Mutex;

use crate::{
    error::CoreError,
    input::{InputState, MAX_PORTS},
    m68k::{CONTEXT_LEN, Register},
    machine::{CoreHooks, ExecutionCore, Machine, MachineExt, MemoryRegion},
};

pub const ROM_LEN: usize = 0x1_0000;
pub const RAM_LEN: usize = 0x1_0000;
pub const DEFAULT_ENTRY: u32 = 0x200;
pub const DEFAULT_STACK: u32 = 0xFFFF_FE00;

pub const NOP: u16 = 0x4E71;
pub const RTS: u16 = 0x4E75;
pub const JSR_ABS_L: u16 = 0x4EB9;
pub const LEA_D16_SP_SP: u16 = 0x4FEF;

/// Pad state polled at the start of each frame, per port. Shared so tests
/// can inspect it after the core has moved to another thread.
pub type InputLog = Arc<Mutex<Vec<[InputState; MAX_PORTS]>>>;

#[derive(Debug, Clone)]
pub struct ScriptedCore {
    context: Vec<u8>,
    rom: Option<Vec<u8>>,
    ram: Option<Vec<u8>>,
    instructions_per_frame: usize,
    executed: u64,
    frames_run: u64,
    input_log: InputLog,
}

impl Default for ScriptedCore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedCore {
    pub fn new() -> Self {
        let mut core = Self {
            context: vec![0; CONTEXT_LEN],
            rom: Some(vec![0; ROM_LEN]),
            ram: Some(vec![0; RAM_LEN]),
            instructions_per_frame: 16,
            executed: 0,
            frames_run: 0,
            input_log: InputLog::default(),
        };
        core.boot(DEFAULT_ENTRY, DEFAULT_STACK);
        core
    }

    pub fn with_instructions_per_frame(mut self, n: usize) -> Self {
        self.instructions_per_frame = n;
        self
    }

    /// Sets PC and SP.
    pub fn boot(&mut self, pc: u32, sp: u32) {
        self.set_pc(pc);
        self.set_register(Register::SP, sp);
    }

    /// Writes instruction words into ROM starting at `origin`.
    pub fn load_program(&mut self, origin: u32, words: &[u16]) {
        for (i, word) in words.iter().enumerate() {
            self.write_u16(origin + 2 * i as u32, *word);
        }
    }

    /// Builds a cartridge image: reset vectors for [`DEFAULT_STACK`] and
    /// `entry`, followed by `words` placed at `entry`.
    pub fn rom_image(entry: u32, words: &[u16]) -> Vec<u8> {
        let mut core = Self::new();
        core.write_u32(0, DEFAULT_STACK);
        core.write_u32(4, entry);
        core.load_program(entry, words);
        let len = entry as usize + 2 * words.len();
        core.rom.map(|mut rom| {
            rom.truncate(len);
            rom
        })
        .unwrap_or_default()
    }

    pub fn rom_mut(&mut self) -> &mut [u8] {
        self.rom.as_deref_mut().unwrap_or_default()
    }

    pub fn ram_mut(&mut self) -> &mut [u8] {
        self.ram.as_deref_mut().unwrap_or_default()
    }

    /// Removes a region so that every access to it fails.
    pub fn unmap(&mut self, region: MemoryRegion) {
        match region {
            MemoryRegion::SystemRam => self.ram = None,
            MemoryRegion::Cartridge => self.rom = None,
        }
    }

    pub fn executed(&self) -> u64 {
        self.executed
    }

    pub fn frames_run(&self) -> u64 {
        self.frames_run
    }

    pub fn input_log(&self) -> InputLog {
        Arc::clone(&self.input_log)
    }

    fn push(&mut self, value: u32) {
        let sp = self.register(Register::SP).unwrap_or(DEFAULT_STACK).wrapping_sub(4);
        self.set_register(Register::SP, sp);
        self.write_u32(sp, value);
    }

    fn execute_one(&mut self) {
        self.executed += 1;
        let Some(pc) = self.pc() else {
            return;
        };
        let word = self.read_u16(pc).unwrap_or(NOP);
        let next = match word {
            JSR_ABS_L => {
                let target = self.read_u32(pc + 2).unwrap_or(pc + 6);
                self.push(pc + 6);
                target
            }
            RTS => {
                let sp = self.register(Register::SP).unwrap_or(DEFAULT_STACK);
                let ret = self.read_u32(sp).unwrap_or(pc + 2);
                self.set_register(Register::SP, sp.wrapping_add(4));
                ret
            }
            LEA_D16_SP_SP => {
                let disp = self.read_u16(pc + 2).unwrap_or(0) as i16;
                let sp = self.register(Register::SP).unwrap_or(DEFAULT_STACK);
                self.set_register(Register::SP, sp.wrapping_add_signed(disp.into()));
                pc + 4
            }
            w if w & 0xFE00 == 0x6000 => {
                let (disp, len) = self.branch_displacement(pc, w);
                let target = (pc + 2).wrapping_add_signed(disp);
                if w & 0x0100 != 0 {
                    self.push(pc + len);
                }
                target
            }
            _ => pc + 2,
        };
        self.set_pc(next);
    }

    /// Displacement and instruction length of a `BRA`/`BSR`.
    fn branch_displacement(&self, pc: u32, word: u16) -> (i32, u32) {
        match word & 0xFF {
            0x00 => (self.read_u16(pc + 2).unwrap_or(0) as i16 as i32, 4),
            0xFF => (self.read_u32(pc + 2).unwrap_or(0) as i32, 6),
            byte => (byte as u8 as i8 as i32, 2),
        }
    }
}

impl Machine for ScriptedCore {
    fn cpu_context(&self) -> Option<&[u8]> {
        Some(&self.context)
    }

    fn cpu_context_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.context)
    }

    fn memory(&self, region: MemoryRegion) -> Option<&[u8]> {
        match region {
            MemoryRegion::SystemRam => self.ram.as_deref(),
            MemoryRegion::Cartridge => self.rom.as_deref(),
        }
    }

    fn memory_mut(&mut self, region: MemoryRegion) -> Option<&mut [u8]> {
        match region {
            MemoryRegion::SystemRam => self.ram.as_deref_mut(),
            MemoryRegion::Cartridge => self.rom.as_deref_mut(),
        }
    }
}

impl ExecutionCore for ScriptedCore {
    fn load_game(&mut self, path: &Path) -> Result<(), CoreError> {
        let image = std::fs::read(path)?;
        if image.is_empty() {
            return Err(CoreError::LoadGame {
                path: path.to_path_buf(),
                reason: "empty image".into(),
            });
        }
        let mut rom = vec![0; ROM_LEN];
        let len = image.len().min(ROM_LEN);
        rom[..len].copy_from_slice(&image[..len]);
        self.rom = Some(rom);
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.context.fill(0);
        if let Some(ram) = self.ram.as_mut() {
            ram.fill(0);
        }
        let sp = self.read_u32(0).filter(|&sp| sp != 0).unwrap_or(DEFAULT_STACK);
        let pc = self.read_u32(4).filter(|&pc| pc != 0).unwrap_or(DEFAULT_ENTRY);
        self.boot(pc, sp);
        self.executed = 0;
        self.frames_run = 0;
        self.input_log.lock().clear();
    }

    fn run_frame(&mut self, hooks: &mut dyn CoreHooks) {
        hooks.on_input_poll();
        let mut seen = [InputState::empty(); MAX_PORTS];
        for (port, state) in seen.iter_mut().enumerate() {
            *state = InputState::from_pressed(|id| hooks.input_state(port as u32, id));
        }
        self.input_log.lock().push(seen);

        for _ in 0..self.instructions_per_frame {
            hooks.on_instruction(self);
            self.execute_one();
        }
        self.frames_run += 1;
    }

    fn serialize(&mut self) -> Result<Vec<u8>, CoreError> {
        let mut out = self.context.clone();
        out.extend_from_slice(self.ram.as_deref().unwrap_or_default());
        Ok(out)
    }

    fn unserialize(&mut self, data: &[u8]) -> Result<(), CoreError> {
        let ram_len = self.ram.as_ref().map_or(0, Vec::len);
        if data.len() != self.context.len() + ram_len {
            return Err(CoreError::InvalidState(format!(
                "expected {} bytes, got {}",
                self.context.len() + ram_len,
                data.len()
            )));
        }
        let (context, ram) = data.split_at(self.context.len());
        self.context.copy_from_slice(context);
        if let Some(dst) = self.ram.as_mut() {
            dst.copy_from_slice(ram);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHooks;

    impl CoreHooks for NoHooks {
        fn on_instruction(&mut self, _machine: &mut dyn Machine) {}

        fn input_state(&mut self, _port: u32, _button_id: u32) -> bool {
            false
        }
    }

    #[test]
    fn jsr_and_rts_move_the_stack() {
        let mut core = ScriptedCore::new().with_instructions_per_frame(1);
        core.load_program(0x200, &[JSR_ABS_L, 0x0000, 0x0400, NOP]);
        core.load_program(0x400, &[RTS]);

        core.run_frame(&mut NoHooks);
        assert_eq!(core.pc(), Some(0x400));
        assert_eq!(core.register(Register::SP), Some(DEFAULT_STACK - 4));
        assert_eq!(core.read_u32(DEFAULT_STACK - 4), Some(0x206));

        core.run_frame(&mut NoHooks);
        assert_eq!(core.pc(), Some(0x206));
        assert_eq!(core.register(Register::SP), Some(DEFAULT_STACK));
    }

    #[test]
    fn bsr_pushes_the_following_address() {
        let mut core = ScriptedCore::new().with_instructions_per_frame(1);
        core.load_program(0x200, &[0x6100, 0x0010]);

        core.run_frame(&mut NoHooks);
        assert_eq!(core.pc(), Some(0x212));
        assert_eq!(core.read_u32(DEFAULT_STACK - 4), Some(0x204));
    }

    #[test]
    fn image_sets_reset_vectors() -> anyhow::Result<()> {
        let image = ScriptedCore::rom_image(0x300, &[NOP, RTS]);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("image.bin");
        std::fs::write(&path, &image)?;

        let mut core = ScriptedCore::new();
        core.load_game(&path)?;
        assert_eq!(core.pc(), Some(0x300));
        assert_eq!(core.register(Register::SP), Some(DEFAULT_STACK));
        assert_eq!(core.read_u16(0x302), Some(RTS));
        Ok(())
    }

    #[test]
    fn empty_image_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"")?;

        let mut core = ScriptedCore::new();
        assert!(matches!(
            core.load_game(&path),
            Err(CoreError::LoadGame { .. })
        ));
        assert!(matches!(
            core.load_game(&dir.path().join("missing.bin")),
            Err(CoreError::Io(_))
        ));
        Ok(())
    }

    #[test]
    fn state_round_trips() -> anyhow::Result<()> {
        let mut core = ScriptedCore::new();
        core.set_register(Register::D1, 7);
        let saved = core.serialize()?;
        core.set_register(Register::D1, 9);
        core.unserialize(&saved)?;
        assert_eq!(core.register(Register::D1), Some(7));
        assert!(core.unserialize(&saved[1..]).is_err());
        Ok(())
    }
}
