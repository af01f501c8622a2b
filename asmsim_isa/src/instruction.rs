use crate::error::IsaError;
use crate::flags::{Flag, FlagSet};
use crate::mnemonic::{Condition, Mnemonic};
use crate::operand::Operand;
use crate::parse::ParsedLine;
use crate::register::{Gpr, GprSet, RegSlice, Register};
use crate::{Mode, Parameters};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A validated instruction the simulator knows how to execute.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub operands: Vec<Operand>,
    /// Operation width in bits. For instructions without a data operand this is the stack
    /// width of the current mode.
    pub width: u32,
    pub mode: Mode,
}

/// What the opcode factory made of a line
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Modeled(Instruction),
    /// A real mnemonic the simulator has no semantics for; executed as a no-op
    NotImplemented(Mnemonic),
    /// A recognized mnemonic whose operands do not make sense
    Malformed { mnemonic: Mnemonic, message: String },
}

impl Opcode {
    pub fn mnemonic(&self) -> Mnemonic {
        match self {
            Opcode::Modeled(i) => i.mnemonic,
            Opcode::NotImplemented(m) => *m,
            Opcode::Malformed { mnemonic, .. } => *mnemonic,
        }
    }

    pub fn instruction(&self) -> Option<&Instruction> {
        match self {
            Opcode::Modeled(i) => Some(i),
            _ => None,
        }
    }

    pub fn syntax_error(&self) -> Option<&str> {
        match self {
            Opcode::Malformed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Turns a tokenized line into an [`Opcode`]. Returns `None` when the line holds no recognized
/// mnemonic at all.
pub fn instantiate(line: &ParsedLine, params: &Parameters) -> Option<Opcode> {
    let mnemonic = line.mnemonic;
    if mnemonic.is_none() {
        return None;
    }
    if !mnemonic.is_modeled() {
        return Some(Opcode::NotImplemented(mnemonic));
    }
    let opcode = match build(mnemonic, &line.args, params.mode) {
        Ok(instruction) => Opcode::Modeled(instruction),
        Err(e) => {
            tracing::debug!("malformed {mnemonic}: {e}");
            Opcode::Malformed {
                mnemonic,
                message: e.to_string(),
            }
        }
    };
    Some(opcode)
}

fn build(mnemonic: Mnemonic, args: &[String], mode: Mode) -> Result<Instruction, IsaError> {
    let operands = args
        .iter()
        .map(|a| Operand::parse(a, mode))
        .collect::<Result<Vec<_>, _>>()?;
    let width = match mnemonic {
        Mnemonic::Mov
        | Mnemonic::Add
        | Mnemonic::Adc
        | Mnemonic::Sub
        | Mnemonic::Sbb
        | Mnemonic::Cmp
        | Mnemonic::And
        | Mnemonic::Or
        | Mnemonic::Xor
        | Mnemonic::Test
        | Mnemonic::Xchg
        | Mnemonic::Cmovcc(_) => {
            expect_count(&operands, 2)?;
            let (dst, src) = (&operands[0], &operands[1]);
            expect_data(dst)?;
            expect_data(src)?;
            if !dst.is_writable() {
                return Err(IsaError::NotWritable(dst.to_string()));
            }
            if matches!((dst, src), (Operand::Mem(_), Operand::Mem(_))) {
                return Err(IsaError::TwoMemoryOperands);
            }
            if matches!(mnemonic, Mnemonic::Xchg) && !src.is_writable() {
                return Err(IsaError::NotWritable(src.to_string()));
            }
            if matches!(mnemonic, Mnemonic::Cmovcc(_)) && dst.as_register().is_none() {
                return Err(IsaError::InvalidOperand(dst.to_string()));
            }
            let width = resolve_width(dst, src)?;
            check_immediate(src, width, mnemonic == Mnemonic::Mov)?;
            width
        }
        Mnemonic::Movzx | Mnemonic::Movsx => {
            expect_count(&operands, 2)?;
            let dst = operands[0]
                .as_register()
                .ok_or_else(|| IsaError::InvalidOperand(operands[0].to_string()))?;
            let src_width = match &operands[1] {
                Operand::Reg(r) => r.width(),
                Operand::Mem(m) => m.size.ok_or(IsaError::MissingOperandSize)?,
                other => return Err(IsaError::InvalidOperand(other.to_string())),
            };
            if src_width >= dst.width() {
                return Err(IsaError::SizeMismatch(dst.width(), src_width));
            }
            dst.width()
        }
        Mnemonic::Lea => {
            expect_count(&operands, 2)?;
            let dst = operands[0]
                .as_register()
                .filter(|r| r.width() >= 16)
                .ok_or_else(|| IsaError::InvalidOperand(operands[0].to_string()))?;
            if !matches!(operands[1], Operand::Mem(_)) {
                return Err(IsaError::InvalidOperand(operands[1].to_string()));
            }
            dst.width()
        }
        Mnemonic::Inc | Mnemonic::Dec | Mnemonic::Neg | Mnemonic::Not => {
            expect_count(&operands, 1)?;
            let dst = &operands[0];
            if !dst.is_writable() {
                return Err(IsaError::NotWritable(dst.to_string()));
            }
            dst.width().ok_or(IsaError::MissingOperandSize)?
        }
        Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar => {
            if operands.is_empty() || operands.len() > 2 {
                return Err(IsaError::OperandCount {
                    expected: 2,
                    found: operands.len(),
                });
            }
            let dst = &operands[0];
            if !dst.is_writable() {
                return Err(IsaError::NotWritable(dst.to_string()));
            }
            let width = dst.width().ok_or(IsaError::MissingOperandSize)?;
            match operands.get(1) {
                None | Some(Operand::Imm(_)) => {}
                Some(Operand::Reg(r)) if *r == Register::new(Gpr::Rcx, RegSlice::Low8) => {}
                Some(_) => return Err(IsaError::InvalidShiftCount),
            }
            width
        }
        Mnemonic::Push => {
            expect_count(&operands, 1)?;
            let stack = mode.stack_width();
            match &operands[0] {
                Operand::Imm(_) => {
                    check_immediate(&operands[0], stack, false)?;
                }
                Operand::Label(l) => return Err(IsaError::InvalidOperand(l.clone())),
                other => {
                    let width = other.width().ok_or(IsaError::MissingOperandSize)?;
                    if width != stack {
                        return Err(IsaError::SizeMismatch(stack, width));
                    }
                }
            }
            stack
        }
        Mnemonic::Pop => {
            expect_count(&operands, 1)?;
            let stack = mode.stack_width();
            let dst = &operands[0];
            if !dst.is_writable() {
                return Err(IsaError::NotWritable(dst.to_string()));
            }
            let width = dst.width().ok_or(IsaError::MissingOperandSize)?;
            if width != stack {
                return Err(IsaError::SizeMismatch(stack, width));
            }
            stack
        }
        Mnemonic::Jmp | Mnemonic::Jcc(_) => {
            expect_count(&operands, 1)?;
            if !matches!(operands[0], Operand::Label(_)) {
                return Err(IsaError::InvalidOperand(operands[0].to_string()));
            }
            mode.stack_width()
        }
        Mnemonic::Setcc(_) => {
            expect_count(&operands, 1)?;
            let dst = &operands[0];
            if !dst.is_writable() {
                return Err(IsaError::NotWritable(dst.to_string()));
            }
            match dst.width() {
                Some(8) => 8,
                Some(w) => return Err(IsaError::SizeMismatch(8, w)),
                None => 8,
            }
        }
        Mnemonic::Rdrand => {
            expect_count(&operands, 1)?;
            operands[0]
                .as_register()
                .filter(|r| r.width() >= 16)
                .ok_or_else(|| IsaError::InvalidOperand(operands[0].to_string()))?
                .width()
        }
        Mnemonic::Clc | Mnemonic::Stc | Mnemonic::Cmc => {
            expect_count(&operands, 0)?;
            mode.stack_width()
        }
        // multi-byte nops carry an operand we do not care about
        Mnemonic::Nop => mode.stack_width(),
        other => unreachable!("{other} is not modeled"),
    };
    let mut operands = operands;
    if matches!(mnemonic, Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar) && operands.len() == 1 {
        operands.push(Operand::Imm(1));
    }
    Ok(Instruction {
        mnemonic,
        operands,
        width,
        mode,
    })
}

fn expect_count(operands: &[Operand], expected: usize) -> Result<(), IsaError> {
    if operands.len() != expected {
        return Err(IsaError::OperandCount {
            expected,
            found: operands.len(),
        });
    }
    Ok(())
}

fn expect_data(op: &Operand) -> Result<(), IsaError> {
    match op {
        Operand::Label(l) => Err(IsaError::InvalidOperand(l.clone())),
        _ => Ok(()),
    }
}

fn resolve_width(dst: &Operand, src: &Operand) -> Result<u32, IsaError> {
    match (dst.width(), src.width()) {
        (Some(a), Some(b)) if a != b => Err(IsaError::SizeMismatch(a, b)),
        (Some(a), _) | (None, Some(a)) => Ok(a),
        (None, None) => Err(IsaError::MissingOperandSize),
    }
}

/// Immediates are sign-extended from at most 32 bits, except for `mov r64, imm64`
fn check_immediate(src: &Operand, width: u32, allow_wide: bool) -> Result<(), IsaError> {
    let Operand::Imm(value) = src else {
        return Ok(());
    };
    let value = *value;
    let limit = if width == 64 && !allow_wide { 32 } else { width };
    if limit >= 64 {
        return Ok(());
    }
    let min = -(1i64 << (limit - 1));
    let max = (1i64 << limit) - 1;
    if value < min || value > max {
        return Err(IsaError::ImmediateTooLarge(value as u64, limit));
    }
    Ok(())
}

impl Instruction {
    pub fn dst(&self) -> Option<&Operand> {
        self.operands.first()
    }

    pub fn src(&self) -> Option<&Operand> {
        self.operands.get(1)
    }

    pub fn condition(&self) -> Option<Condition> {
        match self.mnemonic {
            Mnemonic::Jcc(c) | Mnemonic::Setcc(c) | Mnemonic::Cmovcc(c) => Some(c),
            _ => None,
        }
    }

    /// The label this instruction jumps to, if it is a jump
    pub fn jump_target(&self) -> Option<&str> {
        match (self.mnemonic.is_jump(), self.operands.first()) {
            (true, Some(Operand::Label(l))) => Some(l),
            _ => None,
        }
    }

    /// `xor eax, eax` and `sub eax, eax` produce zero regardless of the register's content
    pub fn is_zeroing_idiom(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Xor | Mnemonic::Sub)
            && matches!(
                (self.dst(), self.src()),
                (Some(Operand::Reg(a)), Some(Operand::Reg(b))) if a == b
            )
    }

    fn stack_pointer(&self) -> GprSet {
        [Gpr::Rsp].into_iter().collect()
    }

    /// Registers this instruction reads, at 64-bit granularity
    pub fn regs_read_static(&self) -> GprSet {
        let mut set = GprSet::empty();
        let dst = self.dst();
        let src = self.src();
        let dst_address = dst.map(Operand::registers_read_as_destination).unwrap_or_default();
        match self.mnemonic {
            Mnemonic::Mov | Mnemonic::Movzx | Mnemonic::Movsx | Mnemonic::Setcc(_) => {
                set.union_with(&dst_address);
                if let Some(src) = src {
                    set.union_with(&src.registers_read());
                }
            }
            Mnemonic::Lea => {
                if let Some(src) = src {
                    set.union_with(&src.registers_read_as_destination());
                }
            }
            Mnemonic::Xor | Mnemonic::Sub if self.is_zeroing_idiom() => {}
            Mnemonic::Add
            | Mnemonic::Adc
            | Mnemonic::Sub
            | Mnemonic::Sbb
            | Mnemonic::Cmp
            | Mnemonic::And
            | Mnemonic::Or
            | Mnemonic::Xor
            | Mnemonic::Test
            | Mnemonic::Xchg
            | Mnemonic::Cmovcc(_)
            | Mnemonic::Inc
            | Mnemonic::Dec
            | Mnemonic::Neg
            | Mnemonic::Not
            | Mnemonic::Shl
            | Mnemonic::Shr
            | Mnemonic::Sar => {
                for op in &self.operands {
                    set.union_with(&op.registers_read());
                }
            }
            Mnemonic::Push => {
                set.union_with(&self.stack_pointer());
                if let Some(dst) = dst {
                    set.union_with(&dst.registers_read());
                }
            }
            Mnemonic::Pop => {
                set.union_with(&self.stack_pointer());
                set.union_with(&dst_address);
            }
            _ => {}
        }
        set
    }

    /// Registers this instruction writes, at 64-bit granularity
    pub fn regs_written_static(&self) -> GprSet {
        let mut set = GprSet::empty();
        match self.mnemonic {
            Mnemonic::Cmp | Mnemonic::Test | Mnemonic::Jmp | Mnemonic::Jcc(_) => {}
            Mnemonic::Xchg => {
                for op in &self.operands {
                    if let Some(gpr) = op.register_written() {
                        set.insert(gpr);
                    }
                }
            }
            Mnemonic::Push => set.insert(Gpr::Rsp),
            Mnemonic::Pop => {
                set.insert(Gpr::Rsp);
                if let Some(gpr) = self.dst().and_then(Operand::register_written) {
                    set.insert(gpr);
                }
            }
            Mnemonic::Clc | Mnemonic::Stc | Mnemonic::Cmc | Mnemonic::Nop => {}
            _ => {
                if let Some(gpr) = self.dst().and_then(Operand::register_written) {
                    set.insert(gpr);
                }
            }
        }
        set
    }

    /// Registers this instruction references in any way
    pub fn regs_referenced(&self) -> GprSet {
        let mut set = self.regs_read_static();
        set.union_with(&self.regs_written_static());
        set
    }

    pub fn flags_read_static(&self) -> FlagSet {
        match self.mnemonic {
            Mnemonic::Adc | Mnemonic::Sbb | Mnemonic::Cmc => FlagSet::of(&[Flag::CF]),
            Mnemonic::Jcc(c) | Mnemonic::Setcc(c) | Mnemonic::Cmovcc(c) => c.flags_read(),
            _ => FlagSet::empty(),
        }
    }

    pub fn flags_written_static(&self) -> FlagSet {
        match self.mnemonic {
            Mnemonic::Add
            | Mnemonic::Adc
            | Mnemonic::Sub
            | Mnemonic::Sbb
            | Mnemonic::Cmp
            | Mnemonic::Neg
            | Mnemonic::And
            | Mnemonic::Or
            | Mnemonic::Xor
            | Mnemonic::Test
            | Mnemonic::Shl
            | Mnemonic::Shr
            | Mnemonic::Sar
            | Mnemonic::Rdrand => FlagSet::arithmetic(),
            Mnemonic::Inc | Mnemonic::Dec => {
                let mut flags = FlagSet::arithmetic();
                flags.remove(Flag::CF);
                flags
            }
            Mnemonic::Clc | Mnemonic::Stc | Mnemonic::Cmc => FlagSet::of(&[Flag::CF]),
            _ => FlagSet::empty(),
        }
    }

    pub fn flags_referenced(&self) -> FlagSet {
        let mut set = self.flags_read_static();
        set.union_with(&self.flags_written_static());
        set
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic.to_string().to_ascii_lowercase())?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{op}")?;
        }
        Ok(())
    }
}
