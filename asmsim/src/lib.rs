pub mod bits;
pub mod cache;
pub mod cfg;
pub mod config;
pub mod display;
pub mod engine;
mod error;
pub mod liveness;
pub mod modeling;
pub mod registry;
pub mod scheduler;
pub mod simulator;
mod solver;
pub mod state;

pub use asmsim_isa as isa;

pub use bits::BitValue;
pub use cache::StateCache;
pub use cfg::ControlFlowModel;
pub use config::{SimulatorConfig, SolverSettings};
pub use engine::BoundedExecutionEngine;
pub use error::AsmSimError;
pub use liveness::LivenessConfig;
pub use registry::SimulatorRegistry;
pub use scheduler::SimulationScheduler;
pub use simulator::{AsmSimulator, SyntaxInfo};
pub use state::{Position, SymbolicState};
