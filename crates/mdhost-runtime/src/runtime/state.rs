use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use mdhost_core::{InputState, input::MAX_PORTS};

pub(crate) struct RuntimeState {
    /// Current pad state per controller port, as `InputState` bits.
    pub(crate) pad_masks: [AtomicU32; MAX_PORTS],
    pub(crate) game_loaded: AtomicBool,
}

impl RuntimeState {
    pub(crate) fn new() -> Self {
        Self {
            pad_masks: std::array::from_fn(|_| AtomicU32::new(0)),
            game_loaded: AtomicBool::new(false),
        }
    }

    pub(crate) fn pad(&self, port: u32) -> InputState {
        self.pad_masks
            .get(port as usize)
            .map_or(InputState::empty(), |slot| {
                InputState::from_bits_truncate(slot.load(Ordering::Acquire))
            })
    }

    pub(crate) fn set_pad(&self, port: u32, state: InputState) -> bool {
        match self.pad_masks.get(port as usize) {
            Some(slot) => {
                slot.store(state.bits(), Ordering::Release);
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_pads(&self) {
        for mask in &self.pad_masks {
            mask.store(0, Ordering::Release);
        }
    }
}
