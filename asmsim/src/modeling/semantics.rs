use super::{ADDRESS_BITS, MachineLane, SharedValues};
use crate::AsmSimError;
use asmsim_isa::{Flag, Gpr, Instruction, IsaError, Mnemonic, Operand, RegSlice, Register};
use z3::ast::{Ast, BV, Bool};

fn msb(bv: &BV) -> BV {
    let top = bv.get_size() - 1;
    bv.extract(top, top)
}

fn bit(bv: &BV, i: u32) -> BV {
    bv.extract(i, i)
}

fn is_zero(bv: &BV) -> Bool {
    bv.eq(&BV::from_u64(0, bv.get_size()))
}

/// PF is set when the low byte of the result has an even number of set bits
fn parity(bv: &BV) -> BV {
    let mut acc = bit(bv, 0);
    for i in 1..8.min(bv.get_size()) {
        acc = acc.bvxor(&bit(bv, i));
    }
    acc.bvnot()
}

fn aux_carry(a: &BV, b: &BV, r: &BV) -> BV {
    bit(&a.bvxor(b).bvxor(r), 4)
}

/// Which arithmetic operation produced a result, for flag computation
enum Arith {
    Add,
    Sub,
}

impl MachineLane {
    /// Execute one instruction in this lane. `shared` supplies values both lanes must agree on.
    pub fn execute(
        &mut self,
        instr: &Instruction,
        shared: &mut SharedValues,
    ) -> Result<(), AsmSimError> {
        let width = instr.width;
        let dst = instr.dst();
        let src = instr.src();
        match instr.mnemonic {
            Mnemonic::Mov => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let value = self.read_operand(src, width)?;
                self.write_operand(dst, &value)?;
            }
            Mnemonic::Movzx | Mnemonic::Movsx => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let value = self.read_operand(src, width)?;
                let extra = width - value.get_size();
                let value = if instr.mnemonic == Mnemonic::Movzx {
                    value.zero_ext(extra)
                } else {
                    value.sign_ext(extra)
                };
                self.write_operand(dst, &value)?;
            }
            Mnemonic::Lea => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let Operand::Mem(mem) = src else {
                    return Err(AsmSimError::UnmodeledInstruction(instr.mnemonic));
                };
                let address = self.address_of(mem).extract(width - 1, 0);
                self.write_operand(dst, &address)?;
            }
            Mnemonic::Xchg => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let a = self.read_operand(dst, width)?;
                let b = self.read_operand(src, width)?;
                self.write_operand(dst, &b)?;
                self.write_operand(src, &a)?;
            }
            Mnemonic::Add | Mnemonic::Adc => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let a = self.read_operand(dst, width)?;
                let b = self.read_operand(src, width)?;
                let carry = match instr.mnemonic {
                    Mnemonic::Adc => self.flag(Flag::CF).clone(),
                    _ => BV::from_u64(0, 1),
                };
                let r = self.arith(Arith::Add, &a, &b, &carry, true);
                self.write_operand(dst, &r)?;
            }
            Mnemonic::Sub | Mnemonic::Sbb | Mnemonic::Cmp => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let a = self.read_operand(dst, width)?;
                let b = self.read_operand(src, width)?;
                let borrow = match instr.mnemonic {
                    Mnemonic::Sbb => self.flag(Flag::CF).clone(),
                    _ => BV::from_u64(0, 1),
                };
                let r = self.arith(Arith::Sub, &a, &b, &borrow, true);
                if instr.mnemonic != Mnemonic::Cmp {
                    self.write_operand(dst, &r)?;
                }
            }
            Mnemonic::Inc | Mnemonic::Dec => {
                let dst = operand(dst)?;
                let a = self.read_operand(dst, width)?;
                let one = BV::from_u64(1, width);
                let zero = BV::from_u64(0, 1);
                let op = match instr.mnemonic {
                    Mnemonic::Inc => Arith::Add,
                    _ => Arith::Sub,
                };
                let r = self.arith(op, &a, &one, &zero, false);
                self.write_operand(dst, &r)?;
            }
            Mnemonic::Neg => {
                let dst = operand(dst)?;
                let a = self.read_operand(dst, width)?;
                let zero = BV::from_u64(0, width);
                let r = self.arith(Arith::Sub, &zero, &a, &BV::from_u64(0, 1), true);
                self.set_flag_bool(Flag::CF, &is_zero(&a).not());
                self.write_operand(dst, &r)?;
            }
            Mnemonic::Not => {
                let dst = operand(dst)?;
                let a = self.read_operand(dst, width)?;
                self.write_operand(dst, &a.bvnot())?;
            }
            Mnemonic::And | Mnemonic::Or | Mnemonic::Xor | Mnemonic::Test => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let a = self.read_operand(dst, width)?;
                let b = self.read_operand(src, width)?;
                let r = match instr.mnemonic {
                    Mnemonic::Or => a.bvor(&b),
                    Mnemonic::Xor => a.bvxor(&b),
                    _ => a.bvand(&b),
                };
                self.logic_flags(&r);
                if instr.mnemonic != Mnemonic::Test {
                    self.write_operand(dst, &r)?;
                }
            }
            Mnemonic::Shl | Mnemonic::Shr | Mnemonic::Sar => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                self.shift(instr.mnemonic, dst, src, width)?;
            }
            Mnemonic::Push => {
                let src = operand(dst)?;
                let value = self.read_operand(src, width)?;
                let sp = self.adjust_stack(false);
                self.memory.write(&value, &sp)?;
            }
            Mnemonic::Pop => {
                let dst = operand(dst)?;
                let sp = self.stack_address();
                let value = self.memory.read(&sp, (width / 8) as usize)?;
                self.adjust_stack(true);
                self.write_operand(dst, &value)?;
            }
            // control flow is handled by the engine through path constraints
            Mnemonic::Jmp | Mnemonic::Jcc(_) | Mnemonic::Nop => {}
            Mnemonic::Setcc(cond) => {
                let dst = operand(dst)?;
                let value = self
                    .condition(cond)
                    .ite(&BV::from_u64(1, 8), &BV::from_u64(0, 8));
                self.write_operand(dst, &value)?;
            }
            Mnemonic::Cmovcc(cond) => {
                let (dst, src) = (operand(dst)?, operand(src)?);
                let old = self.read_operand(dst, width)?;
                let new = self.read_operand(src, width)?;
                let value = self.condition(cond).ite(&new, &old);
                self.write_operand(dst, &value)?;
            }
            Mnemonic::Clc => self.set_flag(Flag::CF, BV::from_u64(0, 1)),
            Mnemonic::Stc => self.set_flag(Flag::CF, BV::from_u64(1, 1)),
            Mnemonic::Cmc => {
                let cf = self.flag(Flag::CF).bvnot();
                self.set_flag(Flag::CF, cf);
            }
            Mnemonic::Rdrand => {
                let dst = operand(dst)?;
                let ok = shared.next("rdrand_ok", 1);
                let random = shared.next("rdrand", width);
                let value = ok
                    .eq(&BV::from_u64(1, 1))
                    .ite(&random, &BV::from_u64(0, width));
                self.write_operand(dst, &value)?;
                self.set_flag(Flag::CF, ok);
                for flag in [Flag::PF, Flag::AF, Flag::ZF, Flag::SF, Flag::OF] {
                    self.set_flag(flag, BV::from_u64(0, 1));
                }
            }
            other => return Err(AsmSimError::UnmodeledInstruction(other)),
        }
        Ok(())
    }

    /// Compute `a + b + carry` or `a - b - carry`, set the arithmetic flags and return the
    /// result. CF is left alone unless `write_cf` is set.
    fn arith(&mut self, op: Arith, a: &BV, b: &BV, carry: &BV, write_cf: bool) -> BV {
        let w = a.get_size();
        let wide_a = a.zero_ext(1);
        let wide_b = b.zero_ext(1);
        let wide_c = carry.zero_ext(w);
        let (wide, of) = match op {
            Arith::Add => {
                let wide = wide_a.bvadd(&wide_b).bvadd(&wide_c);
                let r = wide.extract(w - 1, 0);
                let of = msb(&a.bvxor(&r).bvand(&b.bvxor(&r)));
                (wide, of)
            }
            Arith::Sub => {
                let wide = wide_a.bvsub(&wide_b).bvsub(&wide_c);
                let r = wide.extract(w - 1, 0);
                let of = msb(&a.bvxor(b).bvand(&a.bvxor(&r)));
                (wide, of)
            }
        };
        let r = wide.extract(w - 1, 0);
        if write_cf {
            self.set_flag(Flag::CF, bit(&wide, w));
        }
        self.set_flag(Flag::OF, of);
        self.set_flag(Flag::AF, aux_carry(a, b, &r));
        self.result_flags(&r);
        r
    }

    fn result_flags(&mut self, r: &BV) {
        self.set_flag_bool(Flag::ZF, &is_zero(r));
        self.set_flag(Flag::SF, msb(r));
        self.set_flag(Flag::PF, parity(r));
    }

    fn logic_flags(&mut self, r: &BV) {
        self.set_flag(Flag::CF, BV::from_u64(0, 1));
        self.set_flag(Flag::OF, BV::from_u64(0, 1));
        let af = self.undefined("af", 1);
        self.set_flag(Flag::AF, af);
        self.result_flags(r);
    }

    fn shift(
        &mut self,
        mnemonic: Mnemonic,
        dst: &Operand,
        count: &Operand,
        width: u32,
    ) -> Result<(), AsmSimError> {
        let a = self.read_operand(dst, width)?;
        let mask = if width == 64 { 0x3f } else { 0x1f };
        match count {
            Operand::Imm(c) => {
                let c = (*c as u64 & mask) as u32;
                if c == 0 {
                    return Ok(());
                }
                let amount = BV::from_u64(c as u64, width);
                let r = apply_shift(mnemonic, &a, &amount);
                let cf = match mnemonic {
                    Mnemonic::Shl if c <= width => Some(bit(&a, width - c)),
                    Mnemonic::Shr if c <= width => Some(bit(&a, c - 1)),
                    Mnemonic::Sar => Some(bit(&a, (c - 1).min(width - 1))),
                    _ => None,
                };
                let cf = cf.unwrap_or_else(|| self.undefined("cf", 1));
                let of = match (c, mnemonic) {
                    (1, Mnemonic::Shl) => msb(&r).bvxor(&cf),
                    (1, Mnemonic::Shr) => msb(&a),
                    (1, _) => BV::from_u64(0, 1),
                    _ => self.undefined("of", 1),
                };
                let af = self.undefined("af", 1);
                self.set_flag(Flag::CF, cf);
                self.set_flag(Flag::OF, of);
                self.set_flag(Flag::AF, af);
                self.result_flags(&r);
                self.write_operand(dst, &r)?;
            }
            Operand::Reg(r) => {
                let cl = self.read_register(*r);
                let amount = cl.bvand(&BV::from_u64(mask, 8)).zero_ext(width - 8);
                let skip = is_zero(&amount);
                let shifted = apply_shift(mnemonic, &a, &amount);
                let result = skip.ite(&a, &shifted);
                let before: Vec<BV> = Flag::ALL.iter().map(|f| self.flag(*f).clone()).collect();
                for flag in [Flag::CF, Flag::OF, Flag::AF] {
                    let undefined = self.undefined(&flag.name().to_ascii_lowercase(), 1);
                    self.set_flag(flag, undefined);
                }
                self.result_flags(&shifted);
                for flag in Flag::ALL {
                    let new = self.flag(flag).clone();
                    self.set_flag(flag, skip.ite(&before[flag.index()], &new));
                }
                self.write_operand(dst, &result)?;
            }
            _ => return Err(AsmSimError::UnmodeledInstruction(mnemonic)),
        }
        Ok(())
    }

    fn stack_pointer(&self) -> Register {
        match self.mode.stack_width() {
            64 => Register::new(Gpr::Rsp, RegSlice::Qword),
            _ => Register::new(Gpr::Rsp, RegSlice::Dword),
        }
    }

    fn stack_address(&self) -> BV {
        let sp = self.read_register(self.stack_pointer());
        if sp.get_size() < ADDRESS_BITS {
            sp.zero_ext(ADDRESS_BITS - sp.get_size())
        } else {
            sp
        }
    }

    /// Move the stack pointer by one slot and return the new top of stack
    fn adjust_stack(&mut self, release: bool) -> BV {
        let reg = self.stack_pointer();
        let sp = self.read_register(reg);
        let slot = BV::from_u64(self.mode.stack_bytes(), sp.get_size());
        let sp = if release { sp.bvadd(&slot) } else { sp.bvsub(&slot) };
        self.write_register(reg, &sp);
        self.stack_address()
    }
}

fn apply_shift(mnemonic: Mnemonic, a: &BV, amount: &BV) -> BV {
    match mnemonic {
        Mnemonic::Shl => a.bvshl(amount),
        Mnemonic::Shr => a.bvlshr(amount),
        _ => a.bvashr(amount),
    }
}

fn operand(op: Option<&Operand>) -> Result<&Operand, AsmSimError> {
    op.ok_or(AsmSimError::Isa(IsaError::OperandCount {
        expected: 1,
        found: 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modeling::ModeledMemory;
    use asmsim_isa::{Mode, Opcode, Parameters, instantiate, parse_line};

    fn run(lines: &[&str]) -> MachineLane {
        let memory = ModeledMemory::fresh_const("mem");
        let mut lane = MachineLane::window_entry("a", Mode::Bits64, &memory);
        let mut shared = SharedValues::new();
        for line in lines {
            let Some(Opcode::Modeled(instr)) =
                instantiate(&parse_line(line), &Parameters::default())
            else {
                panic!("{line} is not modeled")
            };
            lane.execute(&instr, &mut shared).unwrap();
        }
        lane
    }

    fn value(lane: &MachineLane, gpr: Gpr) -> Option<u64> {
        lane.gpr(gpr).simplify().as_u64()
    }

    fn flag(lane: &MachineLane, flag: Flag) -> Option<u64> {
        lane.flag(flag).simplify().as_u64()
    }

    #[test]
    fn add_sets_carry_and_zero() {
        let lane = run(&["mov eax, 0xffffffff", "add eax, 1"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(0));
        assert_eq!(flag(&lane, Flag::CF), Some(1));
        assert_eq!(flag(&lane, Flag::ZF), Some(1));
        assert_eq!(flag(&lane, Flag::OF), Some(0));
        assert_eq!(flag(&lane, Flag::AF), Some(1));
        assert_eq!(flag(&lane, Flag::PF), Some(1));
    }

    #[test]
    fn sub_sets_borrow_and_overflow() {
        let lane = run(&["mov al, 0x80", "sub al, 1"]);
        assert_eq!(
            lane.read_register(Register::parse("al").unwrap())
                .simplify()
                .as_u64(),
            Some(0x7f)
        );
        assert_eq!(flag(&lane, Flag::CF), Some(0));
        assert_eq!(flag(&lane, Flag::OF), Some(1));
        assert_eq!(flag(&lane, Flag::SF), Some(0));

        let lane = run(&["mov ebx, 1", "cmp ebx, 2"]);
        assert_eq!(flag(&lane, Flag::CF), Some(1));
        assert_eq!(flag(&lane, Flag::SF), Some(1));
        assert_eq!(value(&lane, Gpr::Rbx), Some(1));
    }

    #[test]
    fn inc_keeps_carry() {
        let lane = run(&["stc", "mov ecx, 15", "inc ecx"]);
        assert_eq!(value(&lane, Gpr::Rcx), Some(16));
        assert_eq!(flag(&lane, Flag::CF), Some(1));
        assert_eq!(flag(&lane, Flag::AF), Some(1));
    }

    #[test]
    fn logic_clears_carry_and_leaves_af_undefined() {
        let lane = run(&["xor eax, eax"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(0));
        assert_eq!(flag(&lane, Flag::CF), Some(0));
        assert_eq!(flag(&lane, Flag::ZF), Some(1));
        assert_eq!(flag(&lane, Flag::AF), None);
    }

    #[test]
    fn shifts() {
        let lane = run(&["mov eax, 0x80000001", "shl eax, 1"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(2));
        assert_eq!(flag(&lane, Flag::CF), Some(1));
        assert_eq!(flag(&lane, Flag::OF), Some(1));

        let lane = run(&["mov eax, 5", "shr eax, 1"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(2));
        assert_eq!(flag(&lane, Flag::CF), Some(1));

        let lane = run(&["mov eax, -8", "sar eax, 2"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(0xffff_fffe));

        let lane = run(&["mov eax, 3", "mov cl, 4", "shl eax, cl"]);
        assert_eq!(value(&lane, Gpr::Rax), Some(0x30));
        assert_eq!(flag(&lane, Flag::ZF), Some(0));
    }

    #[test]
    fn stack_round_trip() {
        let lane = run(&[
            "mov rsp, 0x8000",
            "mov rbx, 0x1234",
            "push rbx",
            "mov rbx, 0",
            "pop rcx",
        ]);
        assert_eq!(value(&lane, Gpr::Rcx), Some(0x1234));
        assert_eq!(value(&lane, Gpr::Rsp), Some(0x8000));
    }

    #[test]
    fn conditional_moves_and_sets() {
        let lane = run(&["mov eax, 1", "cmp eax, 1", "sete bl", "mov ecx, 9", "cmovne ecx, eax"]);
        assert_eq!(
            lane.read_register(Register::parse("bl").unwrap())
                .simplify()
                .as_u64(),
            Some(1)
        );
        assert_eq!(value(&lane, Gpr::Rcx), Some(9));
    }

    #[test]
    fn movzx_and_lea() {
        let lane = run(&[
            "mov bl, 0xff",
            "movsx eax, bl",
            "movzx ecx, bl",
            "lea rdx, [rcx + rcx*2 + 1]",
        ]);
        assert_eq!(value(&lane, Gpr::Rax), Some(0xffff_ffff));
        assert_eq!(value(&lane, Gpr::Rcx), Some(0xff));
        assert_eq!(value(&lane, Gpr::Rdx), Some(0x2fe));
    }
}
