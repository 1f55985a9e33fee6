//! Watch/hover expression evaluation against the live machine.
//!
//! ```text
//! EXPR   := REGNAME | "PC" | MEMORY | NUMBER
//! MEMORY := "[" ADDR ("," FORMAT)? "]" | "[" ADDR "]" "," FORMAT
//! ADDR   := NUMBER | REGNAME
//! FORMAT := any mix of l / w / b (width) and h (hex)
//! ```
//!
//! Numbers are decimal, `0x`-prefixed or `$`-prefixed hex.

use crate::{
    m68k::Register,
    machine::{Machine, MachineExt},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Word,
    Long,
}

/// Evaluates `expr`, returning its display string or `None` when it cannot
/// be evaluated. `pc` is the PC captured for the current instruction.
pub fn evaluate(expr: &str, machine: &dyn Machine, pc: u32) -> Option<String> {
    let expr = expr.trim();
    if let Some(inner) = expr.strip_prefix('[').and_then(|e| e.strip_suffix(']')) {
        return match inner.rsplit_once(',') {
            Some((addr, format)) => evaluate_memory(addr, format, machine),
            None => evaluate_memory(inner, "", machine),
        };
    }
    if let Some((addr, format)) = expr.rsplit_once(',').and_then(|(lhs, format)| {
        let addr = lhs.trim_end().strip_prefix('[')?.strip_suffix(']')?;
        Some((addr, format))
    }) {
        return evaluate_memory(addr, format, machine);
    }
    if expr.eq_ignore_ascii_case("PC") {
        return Some(format_long(pc));
    }
    if let Some(reg) = Register::from_name(expr) {
        return machine.register(reg).map(format_long);
    }
    parse_number(expr).map(format_long)
}

/// Writes `value` to the register or `PC` named by `name`.
pub fn set_expression(name: &str, value: &str, machine: &mut dyn Machine) -> Option<String> {
    let value = parse_number(value)?;
    let name = name.trim();
    let written = if name.eq_ignore_ascii_case("PC") {
        machine.set_pc(value)
    } else {
        machine.set_register(Register::from_name(name)?, value)
    };
    written.then(|| format_long(value))
}

/// Parses a decimal, `0x` or `$` hex literal. Negative decimals wrap.
pub fn parse_number(text: &str) -> Option<u32> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .or_else(|| text.strip_prefix('$'))
    {
        return u32::from_str_radix(hex, 16).ok();
    }
    if let Some(neg) = text.strip_prefix('-') {
        let magnitude = neg.parse::<u32>().ok()?;
        return (magnitude <= 1 << 31).then(|| magnitude.wrapping_neg());
    }
    text.parse::<u32>().ok()
}

fn evaluate_memory(addr: &str, format: &str, machine: &dyn Machine) -> Option<String> {
    let format = format.trim().to_ascii_lowercase();
    let address = match Register::from_name(addr) {
        Some(reg) => machine.register(reg)?,
        None => parse_number(addr)?,
    };

    let width = if format.contains('l') {
        Width::Long
    } else if format.contains('w') {
        Width::Word
    } else if format.contains('b') {
        Width::Byte
    } else {
        Width::Word
    };
    let hex = format.contains('h');

    Some(match width {
        Width::Long => {
            let value = machine.read_u32(address)?;
            if hex { format!("0x{value:02X}") } else { (value as i32).to_string() }
        }
        Width::Word => {
            let value = machine.read_u16(address)?;
            if hex { format!("0x{value:02X}") } else { (value as i16).to_string() }
        }
        Width::Byte => {
            let value = machine.read_u8(address)?;
            if hex { format!("0x{value:02X}") } else { value.to_string() }
        }
    })
}

#[inline]
fn format_long(value: u32) -> String {
    format!("0x{value:08X}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCore;

    #[test]
    fn register_assignment_round_trips() {
        let mut core = ScriptedCore::new();

        assert_eq!(
            set_expression("D3", "0x1234", &mut core).as_deref(),
            Some("0x00001234")
        );
        assert_eq!(evaluate("D3", &core, 0).as_deref(), Some("0x00001234"));
        assert_eq!(evaluate("d3", &core, 0).as_deref(), Some("0x00001234"));
    }

    #[test]
    fn sp_aliases_a7() {
        let mut core = ScriptedCore::new();
        assert!(set_expression("A7", "0x00FF0000", &mut core).is_some());
        assert_eq!(evaluate("SP", &core, 0).as_deref(), Some("0x00FF0000"));
    }

    #[test]
    fn pc_reports_the_captured_value() {
        let mut core = ScriptedCore::new();
        assert!(core.set_pc(0x300));
        assert_eq!(evaluate("PC", &core, 0x206).as_deref(), Some("0x00000206"));

        assert_eq!(set_expression("pc", "$400", &mut core).as_deref(), Some("0x00000400"));
        assert_eq!(core.pc(), Some(0x400));
    }

    #[test]
    fn memory_formats_select_width_and_radix() {
        let mut core = ScriptedCore::new();
        assert!(core.write_u32(0xFF00_0010, 0xFFFE_0080));

        assert_eq!(evaluate("[0xFF000010]", &core, 0).as_deref(), Some("-2"));
        assert_eq!(evaluate("[0xFF000010,h]", &core, 0).as_deref(), Some("0xFFFE"));
        assert_eq!(evaluate("[0xFF000010,l]", &core, 0).as_deref(), Some("-130944"));
        assert_eq!(evaluate("[0xFF000010, lh]", &core, 0).as_deref(), Some("0xFFFE0080"));
        // Byte reads see the raw host-order byte.
        assert_eq!(evaluate("[0xFF000012,b]", &core, 0).as_deref(), Some("128"));
        assert_eq!(evaluate("[0xFF000012,bh]", &core, 0).as_deref(), Some("0x80"));
    }

    #[test]
    fn format_may_follow_the_closing_bracket() {
        let mut core = ScriptedCore::new();
        assert!(core.write_u32(0xFF00_0010, 0xFFFE_0080));

        assert_eq!(evaluate("[0xFF000010],l", &core, 0).as_deref(), Some("-130944"));
        assert_eq!(evaluate("[0xFF000010], lh", &core, 0).as_deref(), Some("0xFFFE0080"));
        assert_eq!(evaluate("[0xFF000010],l", &core, 0), evaluate("[0xFF000010,l]", &core, 0));
        assert_eq!(evaluate("0xFF000010,l", &core, 0), None);
    }

    #[test]
    fn memory_address_may_come_from_a_register() {
        let mut core = ScriptedCore::new();
        assert!(core.set_register(Register::A0, 0xFF00_0100));
        assert!(core.write_u16(0xFF00_0100, 0x0042));

        assert_eq!(evaluate("[A0,w]", &core, 0).as_deref(), Some("66"));
    }

    #[test]
    fn bare_numbers_echo_as_long_hex() {
        let core = ScriptedCore::new();
        assert_eq!(evaluate("0x10", &core, 0).as_deref(), Some("0x00000010"));
        assert_eq!(evaluate("255", &core, 0).as_deref(), Some("0x000000FF"));
    }

    #[test]
    fn unknown_or_unreadable_yields_none() {
        let mut core = ScriptedCore::new();
        assert_eq!(evaluate("D9", &core, 0), None);
        assert_eq!(evaluate("[0x00FFFFFF,l]", &core, 0), None);
        assert_eq!(evaluate("[nonsense]", &core, 0), None);
        assert_eq!(set_expression("D9", "1", &mut core), None);
        assert_eq!(set_expression("D0", "zz", &mut core), None);
    }

    #[test]
    fn parses_number_literals() {
        assert_eq!(parse_number("0x1F"), Some(0x1F));
        assert_eq!(parse_number("$ff"), Some(0xFF));
        assert_eq!(parse_number(" 42 "), Some(42));
        assert_eq!(parse_number("-1"), Some(u32::MAX));
        assert_eq!(parse_number("0xG"), None);
    }
}
