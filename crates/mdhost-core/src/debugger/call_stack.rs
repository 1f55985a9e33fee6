//! Shadow call stack rebuilt from observed calls, returns and SP movement.

use crate::m68k::opcode::InstructionKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// SP right after the call pushed its return address.
    pub stack_pointer: u32,
    /// First instruction of the called subroutine.
    pub callee: u32,
    pub return_address: u32,
}

/// Frames are kept bottom-first; the top of stack is the last element and
/// always has the lowest `stack_pointer`.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<StackFrame>,
    /// Class of the instruction seen on the previous callback.
    latched: InstructionKind,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the effect of the previously latched instruction now that the
    /// core is about to execute `pc` with stack pointer `sp`.
    ///
    /// `read_return` is only consulted after a call and reads the long at SP.
    pub fn observe(&mut self, pc: u32, sp: u32, read_return: impl FnOnce(u32) -> Option<u32>) {
        match std::mem::take(&mut self.latched) {
            InstructionKind::Call => self.frames.push(StackFrame {
                stack_pointer: sp,
                callee: pc,
                return_address: read_return(sp).unwrap_or(0),
            }),
            InstructionKind::Return => {
                self.frames.pop();
            }
            InstructionKind::Other => {}
        }

        // SP edits or unmodelled control flow: anything above the live SP is gone.
        while self.frames.last().is_some_and(|top| top.stack_pointer < sp) {
            self.frames.pop();
        }
    }

    /// Records the class of the instruction at the current PC for the next
    /// [`observe`](Self::observe).
    #[inline]
    pub fn latch(&mut self, kind: InstructionKind) {
        self.latched = kind;
    }

    pub fn latched(&self) -> InstructionKind {
        self.latched
    }

    /// Frames from the innermost call outwards.
    pub fn frames(&self) -> impl Iterator<Item = &StackFrame> {
        self.frames.iter().rev()
    }

    pub fn top(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.latched = InstructionKind::Other;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn no_memory(_: u32) -> Option<u32> {
        None
    }

    #[test]
    fn call_pushes_frame_with_return_address() {
        let mut stack = CallStack::new();
        stack.latch(InstructionKind::Call);
        stack.observe(0x400, 0xFFFF_FDFC, |sp| {
            assert_eq!(sp, 0xFFFF_FDFC);
            Some(0x206)
        });

        assert_eq!(
            stack.top(),
            Some(&StackFrame {
                stack_pointer: 0xFFFF_FDFC,
                callee: 0x400,
                return_address: 0x206,
            })
        );
    }

    #[test]
    fn unreadable_return_address_records_zero() {
        let mut stack = CallStack::new();
        stack.latch(InstructionKind::Call);
        stack.observe(0x400, 0x1000, no_memory);
        assert_eq!(stack.top().map(|f| f.return_address), Some(0));
    }

    #[test]
    fn return_pops_exactly_one_frame() {
        let mut stack = CallStack::new();
        for sp in [0x1000, 0x0FFC] {
            stack.latch(InstructionKind::Call);
            stack.observe(0x400, sp, no_memory);
        }
        stack.latch(InstructionKind::Return);
        // SP still equals the outer frame, so only the explicit pop applies.
        stack.observe(0x500, 0x1000, no_memory);
        assert_eq!(stack.depth(), 1);

        stack.latch(InstructionKind::Return);
        stack.observe(0x600, 0x1000, no_memory);
        stack.latch(InstructionKind::Return);
        stack.observe(0x600, 0x1000, no_memory);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn rising_stack_pointer_heals_without_return() {
        let mut stack = CallStack::new();
        for sp in [0x1000, 0x0FF0, 0x0FE0] {
            stack.latch(InstructionKind::Call);
            stack.observe(0x400, sp, no_memory);
        }
        assert_eq!(stack.depth(), 3);

        stack.observe(0x800, 0x0FF8, no_memory);
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.top().map(|f| f.stack_pointer), Some(0x1000));
    }

    #[test]
    fn frames_iterate_innermost_first() {
        let mut stack = CallStack::new();
        for (pc, sp) in [(0x100, 0x1000), (0x200, 0x0FFC)] {
            stack.latch(InstructionKind::Call);
            stack.observe(pc, sp, no_memory);
        }
        let callees: Vec<u32> = stack.frames().map(|f| f.callee).collect();
        assert_eq!(callees, vec![0x200, 0x100]);
    }

    proptest! {
        /// Balanced call/return traces leave `calls - returns` frames, and each
        /// frame keeps the return address stored at its SP when it was pushed.
        #[test]
        fn depth_tracks_net_calls(ops in prop::collection::vec(any::<bool>(), 0..64)) {
            let mut stack = CallStack::new();
            let mut sp = 0x8000u32;
            let mut expected: Vec<(u32, u32)> = Vec::new();

            for (i, is_call) in ops.into_iter().enumerate() {
                if is_call {
                    sp -= 4;
                    let ret = 0x1000 + i as u32 * 2;
                    stack.latch(InstructionKind::Call);
                    stack.observe(0x4000 + i as u32, sp, |_| Some(ret));
                    expected.push((sp, ret));
                } else if !expected.is_empty() {
                    sp += 4;
                    stack.latch(InstructionKind::Return);
                    stack.observe(0x6000, sp, no_memory);
                    expected.pop();
                }
            }

            prop_assert_eq!(stack.depth(), expected.len());
            let got: Vec<(u32, u32)> = stack
                .frames()
                .map(|f| (f.stack_pointer, f.return_address))
                .collect();
            let want: Vec<(u32, u32)> = expected.into_iter().rev().collect();
            prop_assert_eq!(got, want);
        }
    }
}
