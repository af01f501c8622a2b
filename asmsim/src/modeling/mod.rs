mod semantics;
mod space;

pub use space::{ADDRESS_BITS, ModeledMemory};

use crate::AsmSimError;
use asmsim_isa::{Condition, Flag, Gpr, MemOperand, Mode, Operand, RegSlice, Register};
use z3::ast::{Ast, BV, Bool};

/// Values that are defined but unknown at the point they are introduced, such as `rdrand`
/// results. Both lanes of an execution must see the same constant for the same introduction,
/// so the first lane records them and the second replays them in order.
#[derive(Debug, Default)]
pub struct SharedValues {
    values: Vec<BV>,
    cursor: usize,
}

impl SharedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, prefix: &str, size: u32) -> BV {
        let value = match self.values.get(self.cursor) {
            Some(v) if v.get_size() == size => v.clone(),
            _ => {
                let v = BV::fresh_const(prefix, size);
                self.values.truncate(self.cursor);
                self.values.push(v.clone());
                v
            }
        };
        self.cursor += 1;
        value
    }

    /// Start replaying from the first recorded value
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// One copy of the machine state. The engine runs two lanes over the same path to tell values
/// that are undefined apart from values that are merely unknown.
#[derive(Clone, Debug)]
pub struct MachineLane {
    name: String,
    mode: Mode,
    regs: Vec<BV>,
    flags: Vec<BV>,
    memory: ModeledMemory,
}

impl MachineLane {
    /// A lane at the entry of a lookback window: registers and flags hold nothing anything in
    /// the window wrote, memory is the given (shared) array.
    pub fn window_entry(name: &str, mode: Mode, memory: &ModeledMemory) -> Self {
        let regs = Gpr::ALL
            .iter()
            .map(|g| BV::fresh_const(&format!("{name}_{g}"), 64))
            .collect();
        let flags = Flag::ALL
            .iter()
            .map(|f| BV::fresh_const(&format!("{name}_{f}"), 1))
            .collect();
        Self {
            name: name.to_string(),
            mode,
            regs,
            flags,
            memory: memory.clone(),
        }
    }

    pub fn gpr(&self, gpr: Gpr) -> &BV {
        &self.regs[gpr.index()]
    }

    pub fn flag(&self, flag: Flag) -> &BV {
        &self.flags[flag.index()]
    }

    /// A fresh constant that is private to this lane
    pub(crate) fn undefined(&self, what: &str, size: u32) -> BV {
        BV::fresh_const(&format!("{}_undef_{what}", self.name), size)
    }

    pub(crate) fn set_flag(&mut self, flag: Flag, value: BV) {
        self.flags[flag.index()] = value;
    }

    pub(crate) fn set_flag_bool(&mut self, flag: Flag, value: &Bool) {
        self.flags[flag.index()] = bool_to_bit(value);
    }

    pub(crate) fn flag_is_set(&self, flag: Flag) -> Bool {
        self.flag(flag).eq(&BV::from_u64(1, 1))
    }

    pub fn read_register(&self, reg: Register) -> BV {
        let (high, low) = reg.slice.bit_range();
        let full = self.gpr(reg.gpr);
        if reg.slice == RegSlice::Qword {
            full.clone()
        } else {
            full.extract(high, low)
        }
    }

    /// Qword writes replace the register, dword writes zero-extend in 64-bit mode, narrower
    /// writes merge into the old value.
    pub fn write_register(&mut self, reg: Register, value: &BV) {
        let old = self.gpr(reg.gpr).clone();
        let new = match (reg.slice, self.mode) {
            (RegSlice::Qword, _) => value.clone(),
            (RegSlice::Dword, Mode::Bits64) => value.zero_ext(32),
            (RegSlice::Dword, Mode::Bits32) => old.extract(63, 32).concat(value),
            (RegSlice::Word, _) => old.extract(63, 16).concat(value),
            (RegSlice::Low8, _) => old.extract(63, 8).concat(value),
            (RegSlice::High8, _) => old
                .extract(63, 16)
                .concat(value)
                .concat(&old.extract(7, 0)),
        };
        self.regs[reg.gpr.index()] = new;
    }

    /// The effective address of a memory operand, always [`ADDRESS_BITS`] wide
    pub fn address_of(&self, mem: &MemOperand) -> BV {
        let width = self.mode.stack_width();
        let term = |reg: Register| {
            let value = self.read_register(reg);
            if value.get_size() < width {
                value.zero_ext(width - value.get_size())
            } else {
                value
            }
        };
        let mut address = BV::from_i64(mem.disp, width);
        if let Some(base) = mem.base {
            address = address.bvadd(&term(base));
        }
        if let Some(index) = mem.index {
            let scaled = term(index).bvmul(&BV::from_u64(mem.scale as u64, width));
            address = address.bvadd(&scaled);
        }
        if width < ADDRESS_BITS {
            address.zero_ext(ADDRESS_BITS - width)
        } else {
            address
        }
    }

    /// Evaluate an operand as a source of the given width. Immediates are sign-extended.
    pub fn read_operand(&self, op: &Operand, width: u32) -> Result<BV, AsmSimError> {
        match op {
            Operand::Reg(r) => Ok(self.read_register(*r)),
            Operand::Imm(i) => Ok(BV::from_i64(*i, width)),
            Operand::Mem(m) => {
                let size = m.size.unwrap_or(width);
                self.memory.read(&self.address_of(m), (size / 8) as usize)
            }
            Operand::Label(_) => Err(AsmSimError::LabelAsData),
        }
    }

    pub fn write_operand(&mut self, op: &Operand, value: &BV) -> Result<(), AsmSimError> {
        match op {
            Operand::Reg(r) => {
                self.write_register(*r, value);
                Ok(())
            }
            Operand::Mem(m) => {
                let address = self.address_of(m);
                self.memory.write(value, &address)
            }
            Operand::Imm(_) => Err(AsmSimError::ImmediateWrite),
            Operand::Label(_) => Err(AsmSimError::LabelAsData),
        }
    }

    /// Whether the condition code holds in this lane
    pub fn condition(&self, cond: Condition) -> Bool {
        let cf = self.flag_is_set(Flag::CF);
        let zf = self.flag_is_set(Flag::ZF);
        let sf = self.flag(Flag::SF);
        let of = self.flag(Flag::OF);
        let sf_ne_of = sf.eq(of).not();
        match cond {
            Condition::O => self.flag_is_set(Flag::OF),
            Condition::NO => self.flag_is_set(Flag::OF).not(),
            Condition::B => cf,
            Condition::AE => cf.not(),
            Condition::E => zf,
            Condition::NE => zf.not(),
            Condition::BE => Bool::or(&[cf, zf]),
            Condition::A => Bool::or(&[cf, zf]).not(),
            Condition::S => self.flag_is_set(Flag::SF),
            Condition::NS => self.flag_is_set(Flag::SF).not(),
            Condition::P => self.flag_is_set(Flag::PF),
            Condition::NP => self.flag_is_set(Flag::PF).not(),
            Condition::L => sf_ne_of,
            Condition::GE => sf_ne_of.not(),
            Condition::LE => Bool::or(&[zf, sf_ne_of]),
            Condition::G => Bool::or(&[zf, sf_ne_of]).not(),
        }
    }
}

pub(crate) fn bool_to_bit(b: &Bool) -> BV {
    b.ite(&BV::from_u64(1, 1), &BV::from_u64(0, 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lane() -> MachineLane {
        MachineLane::window_entry("a", Mode::Bits64, &ModeledMemory::fresh_const("mem"))
    }

    fn reg(name: &str) -> Register {
        Register::parse(name).unwrap()
    }

    #[test]
    fn partial_register_writes() {
        let mut lane = lane();
        lane.write_register(reg("rax"), &BV::from_u64(0x1122_3344_5566_7788, 64));
        lane.write_register(reg("ah"), &BV::from_u64(0xaa, 8));
        assert_eq!(
            lane.gpr(Gpr::Rax).simplify().as_u64(),
            Some(0x1122_3344_5566_aa88)
        );
        lane.write_register(reg("ax"), &BV::from_u64(0xbeef, 16));
        assert_eq!(
            lane.gpr(Gpr::Rax).simplify().as_u64(),
            Some(0x1122_3344_5566_beef)
        );
        lane.write_register(reg("eax"), &BV::from_u64(0xdead_beef, 32));
        assert_eq!(lane.gpr(Gpr::Rax).simplify().as_u64(), Some(0xdead_beef));
        assert_eq!(lane.read_register(reg("al")).simplify().as_u64(), Some(0xef));
    }

    #[test]
    fn effective_addresses() {
        let mut lane = lane();
        lane.write_register(reg("rbx"), &BV::from_u64(0x1000, 64));
        lane.write_register(reg("rcx"), &BV::from_u64(3, 64));
        let Operand::Mem(mem) = Operand::parse("[rbx + rcx*4 - 8]", Mode::Bits64).unwrap() else {
            panic!("expected memory")
        };
        assert_eq!(lane.address_of(&mem).simplify().as_u64(), Some(0x1004));
    }

    #[test]
    fn shared_values_replay() {
        let mut shared = SharedValues::new();
        let a = shared.next("r", 32);
        let b = shared.next("r", 32);
        shared.rewind();
        assert_eq!(shared.next("r", 32).to_string(), a.to_string());
        assert_eq!(shared.next("r", 32).to_string(), b.to_string());
    }
}
