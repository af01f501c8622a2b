use thiserror::Error;

/// A problem with the operands of an otherwise recognized instruction.
///
/// The `Display` text of these errors is what ends up as the "malformed line" message shown to
/// the user, so keep them short.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IsaError {
    #[error("expected {expected} operand(s) but found {found}")]
    OperandCount { expected: usize, found: usize },
    #[error("could not parse operand \"{0}\"")]
    InvalidOperand(String),
    #[error("register {0} is not available in 32-bit mode")]
    RegisterUnavailable(String),
    #[error("operand \"{0}\" cannot be written")]
    NotWritable(String),
    #[error("operand size mismatch: {0} bits and {1} bits")]
    SizeMismatch(u32, u32),
    #[error("operand size is not specified; use byte/word/dword/qword ptr")]
    MissingOperandSize,
    #[error("at most one operand may reference memory")]
    TwoMemoryOperands,
    #[error("immediate {0:#x} does not fit in {1} bits")]
    ImmediateTooLarge(u64, u32),
    #[error("jump target \"{0}\" is not a known label")]
    UnknownLabel(String),
    #[error("invalid scale {0} in memory operand; expected 1, 2, 4 or 8")]
    InvalidScale(u64),
    #[error("shift count must be an immediate or cl")]
    InvalidShiftCount,
}
