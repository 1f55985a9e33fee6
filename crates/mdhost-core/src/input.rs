//! Three-button pad state as exchanged with remote clients.
//!
//! The bit layout is a fixed contract with clients and does not follow the
//! core's joypad numbering; [`InputState::from_joypad_id`] bridges the two.

use bitflags::bitflags;

/// Controller ports the host drives.
pub const MAX_PORTS: usize = 2;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputState: u32 {
        const UP = 1 << 0;
        const DOWN = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const B = 1 << 4;
        const C = 1 << 5;
        const A = 1 << 6;
        const START = 1 << 7;
    }
}

// libretro RETRO_DEVICE_ID_JOYPAD_* numbering.
const JOYPAD_B: u32 = 0;
const JOYPAD_Y: u32 = 1;
const JOYPAD_START: u32 = 3;
const JOYPAD_UP: u32 = 4;
const JOYPAD_DOWN: u32 = 5;
const JOYPAD_LEFT: u32 = 6;
const JOYPAD_RIGHT: u32 = 7;
const JOYPAD_A: u32 = 8;

impl InputState {
    /// Pad button the core means by joypad id `id`, if any.
    ///
    /// The core lays the Mega Drive A/B/C buttons over the Y/B/A positions.
    pub fn from_joypad_id(id: u32) -> Option<Self> {
        Some(match id {
            JOYPAD_B => Self::B,
            JOYPAD_Y => Self::A,
            JOYPAD_A => Self::C,
            JOYPAD_START => Self::START,
            JOYPAD_UP => Self::UP,
            JOYPAD_DOWN => Self::DOWN,
            JOYPAD_LEFT => Self::LEFT,
            JOYPAD_RIGHT => Self::RIGHT,
            _ => return None,
        })
    }

    /// Whether the core's joypad button `id` is held in this state.
    #[inline]
    pub fn is_pressed(self, id: u32) -> bool {
        Self::from_joypad_id(id).is_some_and(|button| self.contains(button))
    }

    /// Rebuilds a pad state by querying every mapped joypad id.
    pub fn from_pressed(mut pressed: impl FnMut(u32) -> bool) -> Self {
        (0..16)
            .filter_map(|id| Self::from_joypad_id(id).filter(|_| pressed(id)))
            .fold(Self::empty(), |acc, button| acc | button)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_layout_is_fixed() {
        assert_eq!(InputState::UP.bits(), 0x01);
        assert_eq!(InputState::B.bits(), 0x10);
        assert_eq!(InputState::C.bits(), 0x20);
        assert_eq!(InputState::A.bits(), 0x40);
        assert_eq!(InputState::START.bits(), 0x80);
    }

    #[test]
    fn joypad_ids_map_onto_pad_buttons() {
        let state = InputState::A | InputState::RIGHT;
        assert!(state.is_pressed(JOYPAD_Y));
        assert!(state.is_pressed(JOYPAD_RIGHT));
        assert!(!state.is_pressed(JOYPAD_A));
        assert!(!state.is_pressed(2)); // select has no pad button
    }

    #[test]
    fn from_pressed_inverts_is_pressed() {
        let state = InputState::B | InputState::C | InputState::START | InputState::DOWN;
        assert_eq!(InputState::from_pressed(|id| state.is_pressed(id)), state);
    }
}
