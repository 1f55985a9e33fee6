//! 68000 register naming and the raw register layout exposed by the core.

pub mod opcode;

/// Byte offset of `D0` inside the core's raw CPU context.
pub const REGISTER_BASE_OFFSET: usize = 0x2814;
/// Byte offset of the program counter inside the raw CPU context.
pub const PC_OFFSET: usize = 0x2854;
/// Smallest raw context that holds every register we address.
pub const CONTEXT_LEN: usize = PC_OFFSET + 4;
/// Size of a return address pushed by `BSR`/`JSR`.
pub const WORD_SIZE: u32 = 4;

/// General purpose registers in raw-context order (`D0..D7`, then `A0..A7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr)]
pub enum Register {
    D0,
    D1,
    D2,
    D3,
    D4,
    D5,
    D6,
    D7,
    A0,
    A1,
    A2,
    A3,
    A4,
    A5,
    A6,
    A7,
}

impl Register {
    /// The stack pointer is the last address register.
    pub const SP: Register = Register::A7;

    /// Resolves `D0..D7`, `A0..A7` or the `SP` alias, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Self> {
        use strum::IntoEnumIterator;

        let name = name.trim();
        if name.eq_ignore_ascii_case("SP") {
            return Some(Self::SP);
        }
        Self::iter().find(|reg| reg.name().eq_ignore_ascii_case(name))
    }

    #[inline]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Byte offset of this register inside the raw context.
    #[inline]
    pub fn offset(self) -> usize {
        REGISTER_BASE_OFFSET + (self as usize) * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_case_insensitively() {
        assert_eq!(Register::from_name("d3"), Some(Register::D3));
        assert_eq!(Register::from_name("A0"), Some(Register::A0));
        assert_eq!(Register::from_name("sp"), Some(Register::A7));
        assert_eq!(Register::from_name(" A7 "), Some(Register::A7));
        assert_eq!(Register::from_name("D8"), None);
        assert_eq!(Register::from_name("PC"), None);
    }

    #[test]
    fn offsets_follow_raw_layout() {
        assert_eq!(Register::D0.offset(), 0x2814);
        assert_eq!(Register::A0.offset(), 0x2834);
        assert_eq!(Register::A7.offset(), 0x2850);
        assert_eq!(Register::A7.offset() + 4, PC_OFFSET);
    }
}
