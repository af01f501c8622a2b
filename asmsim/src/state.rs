use crate::bits::{BitValue, JoinSemiLattice};
use crate::display::{bits_to_binary, bits_to_hex};
use asmsim_isa::{Flag, Gpr, Register};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Whether a state describes the machine before or after its line executes
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Position {
    Before,
    After,
}

impl Display for Position {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Position::Before => write!(f, "before"),
            Position::After => write!(f, "after"),
        }
    }
}

/// An immutable snapshot of what is known about the machine at one program point.
///
/// Register bits are stored least significant first. Solver terms never leave the engine, so
/// the path constraints are kept in rendered SMT-LIB form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolicState {
    line: usize,
    position: Position,
    version: u64,
    registers: Vec<Vec<BitValue>>,
    flags: Vec<BitValue>,
    constraints: Vec<String>,
    paths: usize,
}

impl SymbolicState {
    /// A state in which nothing is known to be defined
    pub fn undefined(line: usize, position: Position, version: u64) -> Self {
        Self {
            line,
            position,
            version,
            registers: vec![vec![BitValue::Undefined; 64]; Gpr::ALL.len()],
            flags: vec![BitValue::Undefined; Flag::ALL.len()],
            constraints: Vec::new(),
            paths: 0,
        }
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Version of the control flow model this state was computed against
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of feasible paths that contributed to this state
    pub fn paths(&self) -> usize {
        self.paths
    }

    pub fn constraints(&self) -> &[String] {
        &self.constraints
    }

    pub fn gpr_bits(&self, gpr: Gpr) -> &[BitValue] {
        &self.registers[gpr.index()]
    }

    /// The bits of a (possibly partial) register, least significant first
    pub fn register_bits(&self, reg: Register) -> &[BitValue] {
        let (high, low) = reg.slice.bit_range();
        &self.gpr_bits(reg.gpr)[low as usize..=high as usize]
    }

    /// `None` past the 64th bit
    pub fn bit(&self, gpr: Gpr, index: usize) -> Option<BitValue> {
        self.registers[gpr.index()].get(index).copied()
    }

    pub fn flag(&self, flag: Flag) -> BitValue {
        self.flags[flag.index()]
    }

    pub fn has_undefined(&self, reg: Register) -> bool {
        self.register_bits(reg).iter().any(BitValue::is_undefined)
    }

    /// The value of a register if every one of its bits is concrete
    pub fn concrete_value(&self, reg: Register) -> Option<u64> {
        self.register_bits(reg)
            .iter()
            .enumerate()
            .try_fold(0u64, |acc, (i, b)| {
                b.as_bool().map(|set| acc | (u64::from(set) << i))
            })
    }

    pub fn is_concrete(&self, reg: Register) -> bool {
        self.register_bits(reg).iter().all(BitValue::is_concrete)
    }

    pub(crate) fn set_gpr_bits(&mut self, gpr: Gpr, bits: Vec<BitValue>) {
        self.registers[gpr.index()] = bits;
    }

    pub(crate) fn set_flag(&mut self, flag: Flag, value: BitValue) {
        self.flags[flag.index()] = value;
    }

    /// The same bits, attributed to a different program point
    pub(crate) fn relocated(mut self, line: usize, position: Position, version: u64) -> Self {
        self.line = line;
        self.position = position;
        self.version = version;
        self
    }

    pub(crate) fn add_path(&mut self, constraints: Vec<String>) {
        self.paths += 1;
        self.constraints.extend(constraints);
    }

    /// Merge the result of another path into this one
    pub(crate) fn merge(&mut self, other: &SymbolicState) {
        self.registers.join(&other.registers);
        self.flags.join(&other.flags);
        self.paths += other.paths;
        for c in &other.constraints {
            if !self.constraints.contains(c) {
                self.constraints.push(c.clone());
            }
        }
    }

    /// `rax = 0x... = 0b...`
    pub fn register_summary(&self, gpr: Gpr) -> String {
        let bits = self.gpr_bits(gpr);
        format!("{gpr} = {} = {}", bits_to_hex(bits), bits_to_binary(bits))
    }

    /// `CF=0 PF=U ...`
    pub fn flags_summary(&self) -> String {
        Flag::ALL
            .iter()
            .map(|f| format!("{f}={}", self.flag(*f)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for SymbolicState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "state {} line {} (version {})", self.position, self.line, self.version)?;
        for gpr in Gpr::ALL {
            if self.gpr_bits(gpr).iter().all(BitValue::is_undefined) {
                continue;
            }
            writeln!(f, "  {}", self.register_summary(gpr))?;
        }
        writeln!(f, "  {}", self.flags_summary())?;
        for c in &self.constraints {
            writeln!(f, "  assume {c}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(name: &str) -> Register {
        Register::parse(name).unwrap()
    }

    fn with_eax(value: u32) -> SymbolicState {
        let mut state = SymbolicState::undefined(0, Position::After, 1);
        let mut bits = vec![BitValue::Zero; 64];
        for (i, bit) in bits.iter_mut().enumerate().take(32) {
            *bit = BitValue::from_bool(value >> i & 1 == 1);
        }
        state.set_gpr_bits(Gpr::Rax, bits);
        state
    }

    #[test]
    fn reads_partial_registers() {
        let state = with_eax(0x1234);
        assert_eq!(state.concrete_value(reg("eax")), Some(0x1234));
        assert_eq!(state.concrete_value(reg("ah")), Some(0x12));
        assert_eq!(state.concrete_value(reg("rax")), Some(0x1234));
        assert_eq!(state.concrete_value(reg("ebx")), None);
        assert!(state.has_undefined(reg("bl")));
        assert!(!state.has_undefined(reg("ax")));
    }

    #[test]
    fn merging_joins_bits() {
        let mut a = with_eax(1);
        a.add_path(vec!["(= x 1)".to_string()]);
        let mut b = with_eax(3);
        b.add_path(vec!["(= x 2)".to_string()]);
        a.merge(&b);
        assert_eq!(a.bit(Gpr::Rax, 0), Some(BitValue::One));
        assert_eq!(a.bit(Gpr::Rax, 1), Some(BitValue::Unknown));
        assert_eq!(a.bit(Gpr::Rax, 64), None);
        assert_eq!(a.paths(), 2);
        assert_eq!(a.constraints().len(), 2);
    }

    #[test]
    fn summaries() {
        let state = with_eax(0xf);
        assert!(state.register_summary(Gpr::Rax).starts_with("rax = 0x000000000000000f = 0b"));
        assert_eq!(state.flags_summary(), "CF=U PF=U AF=U ZF=U SF=U OF=U");
        assert!(state.to_string().contains("rax"));
        assert!(!state.to_string().contains("rbx"));
    }
}
