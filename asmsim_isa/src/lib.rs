mod error;
mod flags;
mod instruction;
mod mnemonic;
mod operand;
mod parse;
mod register;

pub use error::IsaError;
pub use flags::{Flag, FlagSet};
pub use instruction::{instantiate, Instruction, Opcode};
pub use mnemonic::{Condition, Mnemonic};
pub use operand::{parse_immediate, MemOperand, Operand};
pub use parse::{parse_line, ParsedLine};
pub use register::{Gpr, GprSet, RegSlice, Register};

use serde::{Deserialize, Serialize};

/// The processor mode assembly is interpreted in.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Bits32,
    #[default]
    Bits64,
}

impl Mode {
    /// Width of a stack slot and of the stack pointer, in bits
    pub fn stack_width(self) -> u32 {
        match self {
            Mode::Bits32 => 32,
            Mode::Bits64 => 64,
        }
    }

    pub fn stack_bytes(self) -> u64 {
        self.stack_width() as u64 / 8
    }
}

/// Everything the opcode factory needs to know besides the line itself
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parameters {
    pub mode: Mode,
}

impl Parameters {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}
