//! Collaborator contract with the execution core and the register/memory
//! facade layered on top of it.
//!
//! The core is opaque: it runs whole frames, exposes a few raw memory regions
//! and a raw CPU context, and calls back into [`CoreHooks`] synchronously from
//! inside [`ExecutionCore::run_frame`].

use std::path::Path;

use crate::{
    error::CoreError,
    m68k::{CONTEXT_LEN, PC_OFFSET, Register, opcode},
};

/// Memory regions the core exposes by numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// 64 KiB of 68000 work RAM (`0xFF0000..`).
    SystemRam,
    /// Cartridge ROM mapped from address 0.
    Cartridge,
}

impl MemoryRegion {
    /// Region id used by the core's memory query interface.
    pub const fn id(self) -> u32 {
        match self {
            Self::SystemRam => 2,
            Self::Cartridge => 256,
        }
    }

    /// Maps a 68000 address onto a region and a byte offset inside it.
    ///
    /// Any address with a non-zero high byte is treated as work RAM and masked
    /// to 16 bits; everything else is read from the cartridge.
    #[inline]
    pub const fn route(address: u32) -> (Self, usize) {
        if address & 0xFF00_0000 != 0 {
            (Self::SystemRam, (address & 0xFFFF) as usize)
        } else {
            (Self::Cartridge, address as usize)
        }
    }
}

/// Raw state the core exposes to the host.
pub trait Machine {
    /// Raw CPU context; register values live at fixed byte offsets
    /// (see [`crate::m68k`]).
    fn cpu_context(&self) -> Option<&[u8]>;

    fn cpu_context_mut(&mut self) -> Option<&mut [u8]>;

    /// Live contents of a memory region, or `None` if the region is absent.
    fn memory(&self, region: MemoryRegion) -> Option<&[u8]>;

    fn memory_mut(&mut self, region: MemoryRegion) -> Option<&mut [u8]>;
}

/// Callbacks the core issues while running a frame.
pub trait CoreHooks {
    /// Called once per instruction, before the instruction at the current PC
    /// executes. The core cannot make progress until this returns.
    fn on_instruction(&mut self, machine: &mut dyn Machine);

    fn on_input_poll(&mut self) {}

    /// Whether `button_id` (libretro joypad numbering) is held on `port`.
    fn input_state(&mut self, port: u32, button_id: u32) -> bool;
}

/// The external emulation core.
pub trait ExecutionCore: Machine + Send + 'static {
    /// Loads a program image. Failure is fatal to the load request.
    fn load_game(&mut self, path: &Path) -> Result<(), CoreError>;

    fn reset(&mut self);

    /// Emulates exactly one video frame.
    fn run_frame(&mut self, hooks: &mut dyn CoreHooks);

    fn serialize(&mut self) -> Result<Vec<u8>, CoreError> {
        Err(CoreError::SerializeUnsupported)
    }

    fn unserialize(&mut self, _data: &[u8]) -> Result<(), CoreError> {
        Err(CoreError::SerializeUnsupported)
    }
}

/// Register and memory access in 68000 terms.
///
/// Region bytes hold 68000 words in host (little-endian) order, so 16-bit
/// accesses are plain little-endian loads and 32-bit accesses swap the two
/// halves. Every accessor returns `None` (or `false`) instead of faulting
/// when the target does not fit inside the live region.
pub trait MachineExt: Machine {
    fn register(&self, reg: Register) -> Option<u32> {
        let ctx = self.cpu_context().filter(|ctx| ctx.len() >= CONTEXT_LEN)?;
        read_ne_u32(ctx, reg.offset())
    }

    fn set_register(&mut self, reg: Register, value: u32) -> bool {
        match self.cpu_context_mut().filter(|ctx| ctx.len() >= CONTEXT_LEN) {
            Some(ctx) => write_ne_u32(ctx, reg.offset(), value),
            None => false,
        }
    }

    /// Program counter as stored in the live context.
    fn pc(&self) -> Option<u32> {
        let ctx = self.cpu_context().filter(|ctx| ctx.len() >= CONTEXT_LEN)?;
        read_ne_u32(ctx, PC_OFFSET)
    }

    fn set_pc(&mut self, value: u32) -> bool {
        match self.cpu_context_mut().filter(|ctx| ctx.len() >= CONTEXT_LEN) {
            Some(ctx) => write_ne_u32(ctx, PC_OFFSET, value),
            None => false,
        }
    }

    fn read_u8(&self, address: u32) -> Option<u8> {
        let (region, offset) = MemoryRegion::route(address);
        self.memory(region)?.get(offset).copied()
    }

    fn read_u16(&self, address: u32) -> Option<u16> {
        let (region, offset) = MemoryRegion::route(address);
        let bytes = self.memory(region)?.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&self, address: u32) -> Option<u32> {
        let (region, offset) = MemoryRegion::route(address);
        let bytes = self.memory(region)?.get(offset..offset.checked_add(4)?)?;
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Some(raw.rotate_left(16))
    }

    fn write_u8(&mut self, address: u32, value: u8) -> bool {
        let (region, offset) = MemoryRegion::route(address);
        match self.memory_mut(region).and_then(|mem| mem.get_mut(offset)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn write_u16(&mut self, address: u32, value: u16) -> bool {
        let (region, offset) = MemoryRegion::route(address);
        let Some(end) = offset.checked_add(2) else {
            return false;
        };
        match self.memory_mut(region).and_then(|mem| mem.get_mut(offset..end)) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    fn write_u32(&mut self, address: u32, value: u32) -> bool {
        let (region, offset) = MemoryRegion::route(address);
        let Some(end) = offset.checked_add(4) else {
            return false;
        };
        match self.memory_mut(region).and_then(|mem| mem.get_mut(offset..end)) {
            Some(slot) => {
                slot.copy_from_slice(&value.rotate_left(16).to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Reads up to `len` consecutive bytes, stopping at the first unmapped one.
    fn read_bytes(&self, address: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let Some(byte) = self.read_u8(address.wrapping_add(i as u32)) else {
                break;
            };
            out.push(byte);
        }
        out
    }

    /// Writes consecutive bytes, stopping at the first unmapped one. Returns
    /// the number of bytes written.
    fn write_bytes(&mut self, address: u32, data: &[u8]) -> usize {
        data.iter()
            .enumerate()
            .take_while(|&(i, &byte)| self.write_u8(address.wrapping_add(i as u32), byte))
            .count()
    }

    /// Length of the call instruction at `address`; 0 when it is not a call or
    /// the code cannot be read.
    fn call_length_at(&self, address: u32) -> u32 {
        self.read_u16(address).map_or(0, opcode::call_length)
    }
}

impl<M: Machine + ?Sized> MachineExt for M {}

#[inline]
fn read_ne_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let raw = bytes.get(offset..offset + 4)?;
    Some(u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

#[inline]
fn write_ne_u32(bytes: &mut [u8], offset: usize, value: u32) -> bool {
    match bytes.get_mut(offset..offset + 4) {
        Some(slot) => {
            slot.copy_from_slice(&value.to_ne_bytes());
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testing::ScriptedCore;

    #[test]
    fn routes_high_addresses_into_work_ram() {
        assert_eq!(
            MemoryRegion::route(0xFF00_1000),
            (MemoryRegion::SystemRam, 0x1000)
        );
        assert_eq!(
            MemoryRegion::route(0x00FF_1000),
            (MemoryRegion::Cartridge, 0xFF_1000)
        );
        assert_eq!(
            MemoryRegion::route(0x0000_1000),
            (MemoryRegion::Cartridge, 0x1000)
        );
    }

    #[test]
    fn reads_resolve_into_the_routed_region() {
        let mut core = ScriptedCore::new();
        core.rom_mut()[0x1000..0x1002].copy_from_slice(&0xBEEFu16.to_le_bytes());
        core.ram_mut()[0x1000..0x1002].copy_from_slice(&0x1234u16.to_le_bytes());

        assert_eq!(core.read_u16(0x0000_1000), Some(0xBEEF));
        assert_eq!(core.read_u16(0xFF00_1000), Some(0x1234));
        // Only the low 16 bits select the RAM offset.
        assert_eq!(core.read_u16(0xFFFF_1000), Some(0x1234));
    }

    #[test]
    fn long_reads_swap_word_halves() {
        let mut core = ScriptedCore::new();
        let ram = core.ram_mut();
        ram[0x20..0x22].copy_from_slice(&0x0012u16.to_le_bytes());
        ram[0x22..0x24].copy_from_slice(&0x3456u16.to_le_bytes());

        assert_eq!(core.read_u32(0xFF00_0020), Some(0x0012_3456));
        assert_eq!(core.read_u16(0xFF00_0020), Some(0x0012));
        assert_eq!(core.read_u16(0xFF00_0022), Some(0x3456));
    }

    #[test]
    fn out_of_range_access_is_absent_not_fatal() {
        let mut core = ScriptedCore::new();
        let rom_len = core.rom_mut().len() as u32;

        assert_eq!(core.read_u8(rom_len), None);
        assert_eq!(core.read_u16(rom_len - 1), None);
        assert_eq!(core.read_u32(rom_len - 2), None);
        assert!(!core.write_u16(rom_len - 1, 0xFFFF));
        assert_eq!(core.read_u8(rom_len - 1), Some(0));
        assert_eq!(core.read_u32(0xFF00_FFFE), None);
    }

    #[test]
    fn missing_region_yields_no_value() {
        let mut core = ScriptedCore::new();
        core.unmap(MemoryRegion::Cartridge);

        assert_eq!(core.read_u8(0x100), None);
        assert_eq!(core.call_length_at(0x100), 0);
        assert!(core.read_bytes(0x100, 4).is_empty());
    }

    #[test]
    fn byte_transfers_truncate_at_region_end() {
        let mut core = ScriptedCore::new();

        assert_eq!(core.write_bytes(0xFF00_FFFE, &[1, 2, 3, 4]), 2);
        assert_eq!(core.read_bytes(0xFF00_FFFE, 4), vec![1, 2]);
    }

    #[test]
    fn registers_use_raw_context_offsets() {
        let mut core = ScriptedCore::new();

        assert!(core.set_register(Register::A7, 0x00FF_0000));
        assert!(core.set_pc(0x200));

        let ctx = core.cpu_context().unwrap_or_default();
        assert_eq!(&ctx[0x2850..0x2854], &0x00FF_0000u32.to_ne_bytes());
        assert_eq!(core.register(Register::SP), Some(0x00FF_0000));
        assert_eq!(core.pc(), Some(0x200));
    }

    proptest! {
        #[test]
        fn long_writes_round_trip_through_word_swap(offset in 0u32..0xFFFC, value in any::<u32>()) {
            let mut core = ScriptedCore::new();
            let address = 0xFF00_0000 | offset;

            prop_assert!(core.write_u32(address, value));
            prop_assert_eq!(core.read_u32(address), Some(value));
            prop_assert_eq!(core.read_u16(address), Some((value >> 16) as u16));
            prop_assert_eq!(core.read_u16(address + 2), Some(value as u16));
        }
    }
}
