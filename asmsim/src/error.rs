use asmsim_isa::{IsaError, Mnemonic};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsmSimError {
    #[error("Error in instruction metadata")]
    Isa(#[from] IsaError),
    #[error("The solver session faulted: {0}")]
    SolverFault(String),
    #[error("Invalid value \"{value}\" for solver option \"{key}\"")]
    InvalidSolverOption { key: String, value: String },
    #[error("A z3 array selection operation returned something other than a bitvector")]
    UnexpectedArraySort,
    #[error("Attempted a memory access of zero bytes")]
    ZeroSizedAccess,
    #[error("Attempted to access memory using the wrong size of address")]
    MismatchedAddressSize,
    #[error("Cannot write values into an immediate")]
    ImmediateWrite,
    #[error("Jump targets cannot be evaluated as data")]
    LabelAsData,
    #[error("asmsim does not model {0} as a data operation")]
    UnmodeledInstruction(Mnemonic),
}
