//! Call/return classification and call-instruction length decoding.
//!
//! Only the first instruction word is inspected. The tracker needs to know
//! whether the next callback follows a subroutine call or a return, and
//! step-over needs to know how many bytes the call occupies.

const BSR_MASK: u16 = 0xFF00;
const BSR: u16 = 0b0110_0001_0000_0000;
const JSR_MASK: u16 = 0b1111_1111_1100_0000;
const JSR: u16 = 0b0100_1110_1000_0000;
const RTS: u16 = 0b0100_1110_0111_0101;

/// EA mode 7 register 1: `(xxx).L`.
const EA_ABSOLUTE_LONG: u16 = 0b111_001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstructionKind {
    /// `BSR` or `JSR`.
    Call,
    /// `RTS`.
    Return,
    #[default]
    Other,
}

impl InstructionKind {
    pub fn classify(word: u16) -> Self {
        if word & BSR_MASK == BSR || word & JSR_MASK == JSR {
            Self::Call
        } else if word == RTS {
            Self::Return
        } else {
            Self::Other
        }
    }
}

/// Length in bytes of the call instruction starting with `word`, or 0 when
/// `word` is not a call.
pub fn call_length(word: u16) -> u32 {
    if word & JSR_MASK == JSR {
        let ea = word & 0b111_111;
        let mode = ea >> 3;
        let mut size = 2;
        // (d16,An), (d8,An,Xn) and every mode-7 form carry extension words.
        if mode >= 0b101 {
            size += 2;
            if ea == EA_ABSOLUTE_LONG {
                size += 2;
            }
        }
        size
    } else if word & BSR_MASK == BSR {
        match word & 0x00FF {
            0x00 => 4,
            0xFF => 6,
            _ => 2,
        }
    } else {
        0
    }
}
