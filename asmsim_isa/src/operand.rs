use crate::error::IsaError;
use crate::register::{Gpr, GprSet, Register};
use crate::Mode;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A memory reference of the form `size ptr [base + index*scale + disp]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemOperand {
    /// Access width in bits, if spelled out with a `ptr` qualifier
    pub size: Option<u32>,
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub scale: u8,
    pub disp: i64,
}

impl MemOperand {
    /// Registers read to compute the effective address
    pub fn address_registers(&self) -> GprSet {
        self.base
            .iter()
            .chain(self.index.iter())
            .map(Register::full)
            .collect()
    }
}

impl Display for MemOperand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(size) = self.size {
            write!(f, "{} ptr ", size_name(size))?;
        }
        write!(f, "[")?;
        let mut first = true;
        if let Some(base) = self.base {
            write!(f, "{base}")?;
            first = false;
        }
        if let Some(index) = self.index {
            if !first {
                write!(f, " + ")?;
            }
            write!(f, "{index}*{}", self.scale)?;
            first = false;
        }
        if self.disp != 0 || first {
            match (first, self.disp < 0) {
                (true, _) => write!(f, "{:#x}", self.disp)?,
                (false, true) => write!(f, " - {:#x}", self.disp.unsigned_abs())?,
                (false, false) => write!(f, " + {:#x}", self.disp)?,
            }
        }
        write!(f, "]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Reg(Register),
    Imm(i64),
    Mem(MemOperand),
    /// A symbolic jump target, resolved against the labels of the whole source
    Label(String),
}

impl Operand {
    /// Width in bits, when the operand determines it by itself
    pub fn width(&self) -> Option<u32> {
        match self {
            Operand::Reg(r) => Some(r.width()),
            Operand::Mem(m) => m.size,
            Operand::Imm(_) | Operand::Label(_) => None,
        }
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Operand::Reg(_) | Operand::Mem(_))
    }

    pub fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    /// Registers that have to be read to evaluate this operand as a source
    pub fn registers_read(&self) -> GprSet {
        match self {
            Operand::Reg(r) => [r.full()].into_iter().collect(),
            Operand::Mem(m) => m.address_registers(),
            Operand::Imm(_) | Operand::Label(_) => GprSet::empty(),
        }
    }

    /// Registers that have to be read to use this operand as a destination
    pub fn registers_read_as_destination(&self) -> GprSet {
        match self {
            Operand::Mem(m) => m.address_registers(),
            _ => GprSet::empty(),
        }
    }

    pub fn register_written(&self) -> Option<Gpr> {
        self.as_register().map(|r| r.full())
    }

    pub fn parse(text: &str, mode: Mode) -> Result<Operand, IsaError> {
        let trimmed = text.trim();
        let lower = trimmed.to_ascii_lowercase();
        let (size, rest) = strip_size_qualifier(&lower);
        if rest.starts_with('[') {
            return parse_memory(rest, size, mode).map(Operand::Mem);
        }
        if size.is_some() {
            // a size qualifier without a memory reference
            return Err(IsaError::InvalidOperand(trimmed.to_string()));
        }
        if let Some(reg) = Register::parse(rest) {
            if !reg.is_available(mode) {
                return Err(IsaError::RegisterUnavailable(reg.to_string()));
            }
            return Ok(Operand::Reg(reg));
        }
        if let Some(value) = parse_immediate(rest) {
            return Ok(Operand::Imm(value));
        }
        if is_identifier(trimmed) {
            return Ok(Operand::Label(trimmed.to_string()));
        }
        Err(IsaError::InvalidOperand(trimmed.to_string()))
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(i) if *i < 0 => write!(f, "-{:#x}", i.unsigned_abs()),
            Operand::Imm(i) => write!(f, "{i:#x}"),
            Operand::Mem(m) => write!(f, "{m}"),
            Operand::Label(l) => write!(f, "{l}"),
        }
    }
}

fn size_name(bits: u32) -> &'static str {
    match bits {
        8 => "byte",
        16 => "word",
        32 => "dword",
        _ => "qword",
    }
}

fn strip_size_qualifier(text: &str) -> (Option<u32>, &str) {
    for (name, bits) in [("byte", 8), ("word", 16), ("dword", 32), ("qword", 64)] {
        if let Some(rest) = text.strip_prefix(name) {
            if !rest.starts_with(|c: char| c.is_whitespace() || c == '[') {
                continue;
            }
            let rest = rest.trim_start();
            let rest = rest.strip_prefix("ptr").unwrap_or(rest).trim_start();
            return (Some(bits), rest);
        }
    }
    (None, text)
}

fn parse_memory(text: &str, size: Option<u32>, mode: Mode) -> Result<MemOperand, IsaError> {
    let invalid = || IsaError::InvalidOperand(text.to_string());
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(invalid)?;
    let mut mem = MemOperand {
        size,
        base: None,
        index: None,
        scale: 1,
        disp: 0,
    };
    for (negative, term) in split_terms(inner) {
        let term = term.trim();
        if term.is_empty() {
            return Err(invalid());
        }
        if let Some((left, right)) = term.split_once('*') {
            let (reg, scale) = match (Register::parse(left), Register::parse(right)) {
                (Some(reg), None) => (reg, parse_immediate(right.trim()).ok_or_else(invalid)?),
                (None, Some(reg)) => (reg, parse_immediate(left.trim()).ok_or_else(invalid)?),
                _ => return Err(invalid()),
            };
            if negative || mem.index.is_some() {
                return Err(invalid());
            }
            if !matches!(scale, 1 | 2 | 4 | 8) {
                return Err(IsaError::InvalidScale(scale as u64));
            }
            mem.index = Some(check_address_register(reg, mode)?);
            mem.scale = scale as u8;
        } else if let Some(reg) = Register::parse(term) {
            let reg = check_address_register(reg, mode)?;
            match (negative, mem.base, mem.index) {
                (false, None, _) => mem.base = Some(reg),
                (false, Some(_), None) => mem.index = Some(reg),
                _ => return Err(invalid()),
            }
        } else {
            let value = parse_immediate(term).ok_or_else(invalid)?;
            mem.disp = if negative {
                mem.disp.wrapping_sub(value)
            } else {
                mem.disp.wrapping_add(value)
            };
        }
    }
    Ok(mem)
}

fn check_address_register(reg: Register, mode: Mode) -> Result<Register, IsaError> {
    if !reg.is_available(mode) {
        return Err(IsaError::RegisterUnavailable(reg.to_string()));
    }
    if reg.width() < 32 {
        return Err(IsaError::InvalidOperand(reg.to_string()));
    }
    Ok(reg)
}

/// Splits `a + b - c` into `[(false, a), (false, b), (true, c)]`
fn split_terms(text: &str) -> Vec<(bool, &str)> {
    let mut terms = Vec::new();
    let mut negative = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if c == '+' || c == '-' {
            if i > start || !terms.is_empty() {
                terms.push((negative, &text[start..i]));
            }
            negative = c == '-';
            start = i + 1;
        }
    }
    terms.push((negative, &text[start..]));
    terms
}

/// Parses decimal, `0x` hexadecimal, `h`-suffixed hexadecimal and `0b` binary literals.
pub fn parse_immediate(text: &str) -> Option<i64> {
    let text = text.trim().to_ascii_lowercase();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, text.as_str()),
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()?
    } else if let Some(bin) = digits.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()?
    } else if let Some(hex) = digits.strip_suffix('h') {
        if !hex.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        u64::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse::<u64>().ok()?
    };
    let value = magnitude as i64;
    Some(if negative { value.wrapping_neg() } else { value })
}

pub(crate) fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '@' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::RegSlice;

    #[test]
    fn parses_immediates() {
        assert_eq!(parse_immediate("42"), Some(42));
        assert_eq!(parse_immediate("-1"), Some(-1));
        assert_eq!(parse_immediate("0x10"), Some(16));
        assert_eq!(parse_immediate("0FFh"), Some(255));
        assert_eq!(parse_immediate("0b101"), Some(5));
        assert_eq!(parse_immediate("ffh"), None);
        assert_eq!(parse_immediate("x"), None);
    }

    #[test]
    fn parses_memory_operands() {
        let op = Operand::parse("dword ptr [rbx + rcx*4 - 8]", Mode::Bits64).unwrap();
        let Operand::Mem(mem) = op else {
            panic!("expected a memory operand")
        };
        assert_eq!(mem.size, Some(32));
        assert_eq!(mem.base, Some(Register::new(Gpr::Rbx, RegSlice::Qword)));
        assert_eq!(mem.index, Some(Register::new(Gpr::Rcx, RegSlice::Qword)));
        assert_eq!(mem.scale, 4);
        assert_eq!(mem.disp, -8);

        let op = Operand::parse("[0x1000]", Mode::Bits64).unwrap();
        assert_eq!(op.width(), None);
        assert!(op.registers_read().is_empty());
    }

    #[test]
    fn rejects_bad_operands() {
        assert!(matches!(
            Operand::parse("[rbx*3]", Mode::Bits64),
            Err(IsaError::InvalidScale(3))
        ));
        assert!(matches!(
            Operand::parse("rax", Mode::Bits32),
            Err(IsaError::RegisterUnavailable(_))
        ));
        assert!(Operand::parse("[rax", Mode::Bits64).is_err());
        assert!(Operand::parse("dword eax", Mode::Bits64).is_err());
    }

    #[test]
    fn identifiers_become_labels() {
        assert_eq!(
            Operand::parse("loop_start", Mode::Bits64).unwrap(),
            Operand::Label("loop_start".to_string())
        );
    }
}
