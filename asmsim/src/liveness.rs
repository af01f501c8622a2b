use crate::cfg::ControlFlowModel;
use asmsim_isa::{Flag, FlagSet, Gpr, GprSet};
use serde::{Deserialize, Serialize};

/// Which registers and flags the engine models symbolically. Everything else is reported as
/// undefined without asking the solver.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessConfig {
    registers: GprSet,
    flags: FlagSet,
}

impl LivenessConfig {
    pub fn all_on() -> Self {
        Self {
            registers: GprSet::all(),
            flags: FlagSet::all(),
        }
    }

    pub fn new(registers: GprSet, flags: FlagSet) -> Self {
        Self { registers, flags }
    }

    /// Marks every register and flag referenced by an instruction in `from_line..=to_line`.
    /// Written registers count as referenced, so the value a line writes shows up in the state
    /// after it.
    pub fn compute(model: &ControlFlowModel, from_line: usize, to_line: usize) -> Self {
        let mut config = Self::default();
        let Some(last) = model.last_line() else {
            return config;
        };
        for i in from_line..=to_line.min(last) {
            if let Some(instr) = model.instruction(i) {
                config.registers.union_with(&instr.regs_referenced());
                config.flags.union_with(&instr.flags_referenced());
            }
        }
        config
    }

    pub fn is_reg_on(&self, gpr: Gpr) -> bool {
        self.registers.contains(gpr)
    }

    pub fn is_flag_on(&self, flag: Flag) -> bool {
        self.flags.contains(flag)
    }

    pub fn registers(&self) -> GprSet {
        self.registers
    }

    pub fn flags(&self) -> FlagSet {
        self.flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asmsim_isa::Parameters;

    #[test]
    fn marks_read_and_written_registers() {
        let model = ControlFlowModel::from_source(
            "mov eax, 1\nadd eax, ebx\nmov ecx, eax",
            Parameters::default(),
        );
        let config = LivenessConfig::compute(&model, 0, 2);
        assert!(config.is_reg_on(Gpr::Rax));
        assert!(config.is_reg_on(Gpr::Rbx));
        assert!(config.is_reg_on(Gpr::Rcx));
        assert!(!config.is_reg_on(Gpr::Rdx));
        assert!(config.is_flag_on(Flag::CF));
        assert_eq!(config.registers().len(), 3);
    }

    #[test]
    fn respects_the_range() {
        let model = ControlFlowModel::from_source(
            "mov eax, 1\nmov ebx, 2\njz out\nout:",
            Parameters::default(),
        );
        let config = LivenessConfig::compute(&model, 0, 0);
        assert!(config.is_reg_on(Gpr::Rax));
        assert!(!config.is_reg_on(Gpr::Rbx));
        assert!(config.flags().is_empty());

        let config = LivenessConfig::compute(&model, 1, 99);
        assert!(!config.is_reg_on(Gpr::Rax));
        assert!(config.is_flag_on(Flag::ZF));
        assert!(!config.is_flag_on(Flag::CF));
    }

    #[test]
    fn sub_registers_mark_the_full_register() {
        let model = ControlFlowModel::from_source("mov al, bh", Parameters::default());
        let config = LivenessConfig::compute(&model, 0, 0);
        assert!(config.is_reg_on(Gpr::Rax));
        assert!(config.is_reg_on(Gpr::Rbx));
    }
}
